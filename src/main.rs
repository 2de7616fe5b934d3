use anyhow::Result;
use clap::Parser;
use dropshrink::app::App;
use dropshrink::models::Config;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dropshrink")]
#[command(about = "Shrink JPEG and PNG images for the web")]
struct CliArgs {
    /// JPEG or PNG image to compress.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Quality percent (0-100). Repeat to re-run at several qualities; the
    /// last one is saved.
    #[arg(short, long = "quality", value_name = "PERCENT", value_parser = parse_quality_arg)]
    qualities: Vec<f64>,

    /// Directory for the compressed copy.
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Seconds to wait for the first compression pass.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,

    /// Print reports as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_quality_arg(input: &str) -> std::result::Result<f64, String> {
    match input.trim().trim_end_matches('%').parse::<u8>() {
        Ok(percent) if percent <= 100 => Ok(percent as f64 / 100.0),
        _ => Err(format!(
            "Invalid quality '{}'. Expected a percentage from 0 to 100",
            input
        )),
    }
}

fn build_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(secs) = args.timeout_secs {
        config.codec_timeout = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dropshrink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let qualities = if args.qualities.is_empty() {
        vec![config.default_quality as f64 / 100.0]
    } else {
        args.qualities.clone()
    };

    let app = match App::new(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize compressor: {}", e);
            std::process::exit(1);
        }
    };

    match app.run(&args.input, &qualities).await {
        Ok(summary) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary.reports)?);
            } else {
                for report in &summary.reports {
                    println!("[{:.0}%] {}", report.quality * 100.0, report.summary);
                }
                println!("Saved to {}", summary.output_path.display());
            }
            info!("Done");
            Ok(())
        }
        Err(e) => {
            error!("Compression failed: {}", e);
            std::process::exit(1);
        }
    }
}
