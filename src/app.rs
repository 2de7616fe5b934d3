//! Caller-side glue: validates the selected file, runs the compressor for each
//! requested quality and writes the download copy.

use crate::codec::{CodecService, ImageCodec};
use crate::compressor::Compressor;
use crate::mime::detect_image_mime;
use crate::models::{CompressionReport, CompressionResult, Config, MimeType, SourceImage};
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Loads one image, compresses it and saves `compressed_<name>`.
pub struct App {
    compressor: Compressor,
    output_dir: PathBuf,
    max_input_bytes: u64,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub codec: Arc<dyn CodecService>,
}

/// Outcome of [`App::run`]: one report per quality, plus where the last
/// result was saved.
#[derive(Debug)]
pub struct RunSummary {
    pub reports: Vec<CompressionReport>,
    pub output_path: PathBuf,
}

impl App {
    /// Build an app from concrete service dependencies without checking
    /// codec readiness.
    pub fn with_services(services: AppServices, config: &Config) -> Self {
        Self {
            compressor: Compressor::new(services.codec).with_timeout(config.codec_timeout),
            output_dir: config.output_dir.clone(),
            max_input_bytes: config.max_input_bytes(),
        }
    }

    /// Build an app once the codec reports it is ready.
    pub async fn start(services: AppServices, config: &Config) -> Result<Self> {
        services.codec.ready().await.map_err(|e| match e {
            Error::CodecUnavailable(_) => e,
            other => Error::CodecUnavailable(other.to_string()),
        })?;
        info!("Codec ready");

        Ok(Self::with_services(services, config))
    }

    /// Construct an app backed by the `image` crate codec.
    pub async fn new(config: &Config) -> Result<Self> {
        Self::start(
            AppServices {
                codec: Arc::new(ImageCodec::new()),
            },
            config,
        )
        .await
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Read and validate an image from disk.
    pub fn load_source(&self, path: &Path) -> Result<SourceImage> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Validation(format!("Invalid file path: {}", path.display())))?
            .to_string();

        let len = fs::metadata(path)?.len();
        if len > self.max_input_bytes {
            return Err(too_large(self.max_input_bytes));
        }

        validate_source(&name, fs::read(path)?, self.max_input_bytes)
    }

    /// Compress `input` once per quality, always from the original file, and
    /// save the last result. Mirrors a user dragging the quality slider.
    pub async fn run(&self, input: &Path, qualities: &[f64]) -> Result<RunSummary> {
        let (&last_quality, earlier) = qualities
            .split_last()
            .ok_or_else(|| Error::Validation("At least one quality value is required".to_string()))?;

        let source = self.load_source(input)?;
        info!(
            "Loaded {} ({} bytes, {})",
            source.name,
            source.size(),
            source.mime_type
        );

        let mut reports = Vec::with_capacity(qualities.len());
        for &quality in earlier {
            let result = self.compress_and_report(&source, quality).await;
            reports.push(CompressionReport::new(&source.name, quality, &result));
        }

        let result = self.compress_and_report(&source, last_quality).await;
        reports.push(CompressionReport::new(&source.name, last_quality, &result));

        let output_path = self.write_download(&source, &result)?;
        info!("Saved {}", output_path.display());

        Ok(RunSummary {
            reports,
            output_path,
        })
    }

    async fn compress_and_report(&self, source: &SourceImage, quality: f64) -> CompressionResult {
        let result = self.compressor.compress(source, quality).await;
        if let Some(note) = result.note() {
            warn!("[quality {:.2}] {}", quality, note);
        }
        result
    }

    /// Write the chosen bytes to `<output_dir>/compressed_<name>` atomically.
    fn write_download(&self, source: &SourceImage, result: &CompressionResult) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(source.download_name());

        let mut tmp = tempfile::NamedTempFile::new_in(&self.output_dir)?;
        tmp.write_all(&result.data)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        Ok(path)
    }
}

fn too_large(max_bytes: u64) -> Error {
    Error::Validation(format!(
        "File is too large, please choose an image under {} MB",
        max_bytes / (1024 * 1024)
    ))
}

/// Accept only non-empty JPEG/PNG data within the size limit.
///
/// The type comes from the file signature when recognizable, otherwise from
/// the file extension.
pub fn validate_source(name: &str, data: Vec<u8>, max_bytes: u64) -> Result<SourceImage> {
    if data.is_empty() {
        return Err(Error::Validation(format!("{} is empty", name)));
    }
    if data.len() as u64 > max_bytes {
        return Err(too_large(max_bytes));
    }

    let from_extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(MimeType::from_extension);

    let mime_type = detect_image_mime(&data)
        .or(from_extension)
        .ok_or_else(|| Error::Validation("Please upload a PNG or JPG image".to_string()))?;

    Ok(SourceImage::new(name, mime_type, data))
}
