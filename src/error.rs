//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
