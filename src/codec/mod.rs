//! Lossy image codec boundary
//!
//! The compressor only talks to a [`CodecService`]; the production backend
//! resizes and re-encodes with the `image` crate, while tests inject
//! [`MockCodec`] to script sizes, failures and hangs.

pub mod mock;
pub mod processor;

pub use mock::{MockCodec, MockResponse};
pub use processor::ImageCodec;

use crate::models::{CompressionParameters, MimeType};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait CodecService: Send + Sync {
    /// Compress `image` (encoded as `mime_type`) according to `params`.
    ///
    /// Best effort: the output may overshoot `target_size_ceiling_mb`.
    async fn compress(
        &self,
        image: &[u8],
        mime_type: MimeType,
        params: &CompressionParameters,
    ) -> Result<Vec<u8>>;

    /// Resolve once at startup; an error means the codec cannot be used at all.
    async fn ready(&self) -> Result<()> {
        Ok(())
    }
}
