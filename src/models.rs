//! Data models and structures
//!
//! Defines the source image, the parameters handed to the codec, and the
//! result returned to callers after a compression request.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            MimeType::Jpeg => image::ImageFormat::Jpeg,
            MimeType::Png => image::ImageFormat::Png,
        }
    }

    /// Map a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MimeType::Jpeg),
            "png" => Some(MimeType::Png),
            _ => None,
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MimeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Ok(MimeType::Jpeg),
            "image/png" => Ok(MimeType::Png),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// An image as selected by the user. Never modified by the compressor.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub mime_type: MimeType,
    pub data: Vec<u8>,
}

impl SourceImage {
    pub fn new(name: impl Into<String>, mime_type: MimeType, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Suggested download name for the compressed variant.
    pub fn download_name(&self) -> String {
        format!("compressed_{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionParameters {
    pub target_size_ceiling_mb: f64,
    pub target_quality: f64,
    pub initial_quality: f64,
    pub max_dimension_px: u32,
    pub output_format_hint: Option<MimeType>,
    /// Upper bound on encode passes the codec may spend chasing the size ceiling.
    pub max_iterations: u32,
}

impl CompressionParameters {
    /// Format the codec should write given the format it is fed.
    pub fn output_format(&self, input: MimeType) -> MimeType {
        self.output_format_hint.unwrap_or(input)
    }

    /// Quality the first encode pass starts from.
    pub fn starting_quality(&self) -> f64 {
        self.initial_quality.min(self.target_quality)
    }

    pub fn target_size_ceiling_bytes(&self) -> u64 {
        (self.target_size_ceiling_mb * BYTES_PER_MB) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    UnsupportedFormat,
    InvalidResult,
    CodecError(String),
}

impl FailureKind {
    pub fn note(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "processing took too long — try a smaller image",
            FailureKind::UnsupportedFormat => "this image format is not supported by the browser",
            FailureKind::InvalidResult | FailureKind::CodecError(_) => {
                "compression failed, please retry"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Compressed { attempts: u8 },
    KeptOriginal,
    Fallback { failure: FailureKind },
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub data: Vec<u8>,
    pub size: u64,
    pub original_size: u64,
    pub mime_type: MimeType,
    pub outcome: Outcome,
}

impl CompressionResult {
    pub fn compressed(data: Vec<u8>, original_size: u64, mime_type: MimeType, attempts: u8) -> Self {
        Self {
            size: data.len() as u64,
            data,
            original_size,
            mime_type,
            outcome: Outcome::Compressed { attempts },
        }
    }

    pub fn original(source: &SourceImage, outcome: Outcome) -> Self {
        Self {
            data: source.data.clone(),
            size: source.size(),
            original_size: source.size(),
            mime_type: source.mime_type,
            outcome,
        }
    }

    pub fn original_retained(&self) -> bool {
        !matches!(self.outcome, Outcome::Compressed { .. })
    }

    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.size as f64 / self.original_size as f64
    }

    pub fn savings_percent(&self) -> f64 {
        (1.0 - self.ratio()) * 100.0
    }

    /// User-facing advisory, if any.
    pub fn note(&self) -> Option<&'static str> {
        match &self.outcome {
            Outcome::Compressed { .. } => None,
            Outcome::KeptOriginal => Some("kept original size"),
            Outcome::Fallback { failure } => Some(failure.note()),
        }
    }

    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Compressed { .. } => format!(
                "{} -> {} (compression: {:.1}%)",
                format_file_size(self.original_size),
                format_file_size(self.size),
                self.savings_percent()
            ),
            Outcome::KeptOriginal => format!(
                "{} (kept original size)",
                format_file_size(self.original_size)
            ),
            Outcome::Fallback { failure } => format!(
                "{} (original size): {}",
                format_file_size(self.original_size),
                failure.note()
            ),
        }
    }
}

/// Serializable view of a result, without the image bytes.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionReport {
    pub name: String,
    pub quality: f64,
    pub original_size: u64,
    pub compressed_size: u64,
    pub savings_percent: f64,
    pub original_retained: bool,
    pub mime_type: MimeType,
    pub outcome: Outcome,
    pub note: Option<String>,
    pub summary: String,
}

impl CompressionReport {
    pub fn new(name: &str, quality: f64, result: &CompressionResult) -> Self {
        Self {
            name: name.to_string(),
            quality,
            original_size: result.original_size,
            compressed_size: result.size,
            savings_percent: (result.savings_percent() * 10.0).round() / 10.0,
            original_retained: result.original_retained(),
            mime_type: result.mime_type,
            outcome: result.outcome.clone(),
            note: result.note().map(str::to_string),
            summary: result.summary(),
        }
    }
}

/// Human-readable byte size with up to two decimals, e.g. `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut exponent = 0;
    while value >= 1024.0 && exponent < UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exponent])
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub codec_timeout: Duration,
    pub output_dir: PathBuf,
    pub default_quality: u8,
    pub max_input_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            codec_timeout: Duration::from_secs(30),
            output_dir: PathBuf::from("output"),
            default_quality: 80,
            max_input_mb: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        load_dotenv(Path::new(".env"))?;
        let defaults = Self::default();

        let config = Self {
            codec_timeout: Duration::from_secs(env_or(
                "DROPSHRINK_TIMEOUT_SECS",
                defaults.codec_timeout.as_secs(),
            )?),
            output_dir: std::env::var("DROPSHRINK_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            default_quality: env_or("DROPSHRINK_DEFAULT_QUALITY", defaults.default_quality)?,
            max_input_mb: env_or("DROPSHRINK_MAX_INPUT_MB", defaults.max_input_mb)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every request fail or misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.codec_timeout.is_zero() {
            return Err(Error::Config(
                "DROPSHRINK_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.default_quality > 100 {
            return Err(Error::Config(format!(
                "DROPSHRINK_DEFAULT_QUALITY must be 0-100, got {}",
                self.default_quality
            )));
        }
        if self.max_input_mb == 0 {
            return Err(Error::Config(
                "DROPSHRINK_MAX_INPUT_MB must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_input_bytes(&self) -> u64 {
        self.max_input_mb.saturating_mul(1024 * 1024)
    }
}

/// Load a dotenv file if present. A missing file is fine; a malformed one is not.
pub fn load_dotenv(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::EnvVar(e)),
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}
