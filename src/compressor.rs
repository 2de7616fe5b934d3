//! Compression orchestration
//!
//! Runs one planned codec pass under a timeout, escalates once to a chained
//! second pass when the first result barely shrank the image, and falls back
//! to the untouched source whenever compression fails or does not help.

use crate::codec::CodecService;
use crate::models::{CompressionResult, FailureKind, Outcome, SourceImage};
use crate::planner::{escalate, plan};
use crate::Error;
use image::ImageError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_CODEC_TIMEOUT: Duration = Duration::from_secs(30);

/// First results above this fraction of the source trigger the second pass.
const ESCALATION_THRESHOLD: f64 = 0.8;

/// Drives the codec for a single request. Holds no per-request state, so one
/// instance can serve overlapping requests.
#[derive(Clone)]
pub struct Compressor {
    codec: Arc<dyn CodecService>,
    timeout: Duration,
}

impl Compressor {
    pub fn new(codec: Arc<dyn CodecService>) -> Self {
        Self {
            codec,
            timeout: DEFAULT_CODEC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Compress `source` at `requested_quality` (0 to 1).
    ///
    /// Always returns a usable image: codec failures become a fallback to the
    /// original bytes with a user-facing note, and the returned size never
    /// exceeds `source.size()`. Every call plans from `source` itself, so
    /// repeated calls with new qualities never compound earlier results.
    pub async fn compress(&self, source: &SourceImage, requested_quality: f64) -> CompressionResult {
        let span = tracing::info_span!(
            "compress",
            request_id = %Uuid::new_v4(),
            name = %source.name,
        );

        async {
            info!(
                "Compressing {} ({} bytes, {}) at quality {:.2}",
                source.name,
                source.size(),
                source.mime_type,
                requested_quality
            );

            let result = match self.run(source, requested_quality).await {
                Ok(result) => result,
                Err(failure) => {
                    warn!("Compression failed ({:?}), keeping original", failure);
                    CompressionResult::original(source, Outcome::Fallback { failure })
                }
            };

            info!("{}", result.summary());
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        source: &SourceImage,
        requested_quality: f64,
    ) -> std::result::Result<CompressionResult, FailureKind> {
        let params = plan(source.size(), source.mime_type, requested_quality);
        debug!(
            "Planned parameters: {}",
            serde_json::to_string(&params).unwrap_or_default()
        );

        // Dropping the codec future on timeout cancels it.
        let first = tokio::time::timeout(
            self.timeout,
            self.codec.compress(&source.data, source.mime_type, &params),
        )
        .await
        .map_err(|_| FailureKind::Timeout)?
        .map_err(classify)?;

        if first.is_empty() {
            return Err(FailureKind::InvalidResult);
        }

        let output_mime = params.output_format(source.mime_type);
        let source_size = source.size();

        let (candidate, attempts) = if first.len() as f64 > source_size as f64 * ESCALATION_THRESHOLD
        {
            let escalated = escalate(&params);
            warn!(
                "First pass kept {} of {} bytes, escalating to quality {:.2} at {}px",
                first.len(),
                source_size,
                escalated.target_quality,
                escalated.max_dimension_px
            );

            // Chained onto the first output; awaited without a timeout.
            let second = self
                .codec
                .compress(&first, output_mime, &escalated)
                .await
                .map_err(classify)?;
            if second.is_empty() {
                return Err(FailureKind::InvalidResult);
            }
            (second, 2)
        } else {
            (first, 1)
        };

        if candidate.len() as u64 >= source_size {
            info!(
                "Compressed output ({} bytes) is not smaller than the original, keeping original",
                candidate.len()
            );
            return Ok(CompressionResult::original(source, Outcome::KeptOriginal));
        }

        Ok(CompressionResult::compressed(
            candidate,
            source_size,
            output_mime,
            attempts,
        ))
    }
}

fn classify(error: Error) -> FailureKind {
    match error {
        Error::UnsupportedFormat(_) | Error::Image(ImageError::Unsupported(_)) => {
            FailureKind::UnsupportedFormat
        }
        other => {
            let message = other.to_string();
            if message.contains("not supported") {
                FailureKind::UnsupportedFormat
            } else {
                FailureKind::CodecError(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MockCodec, MockResponse};
    use crate::models::MimeType;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    fn source(len: usize, mime_type: MimeType) -> SourceImage {
        SourceImage::new("photo", mime_type, vec![0x42; len])
    }

    fn compressor(codec: &MockCodec) -> Compressor {
        Compressor::new(Arc::new(codec.clone()))
    }

    #[tokio::test]
    async fn test_single_pass_when_first_result_is_small_enough() {
        let codec = MockCodec::new().with_ratio(0.5);
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(codec.get_call_count(), 1);
        assert_eq!(result.size, 500);
        assert_eq!(result.data.len(), 500);
        assert_eq!(result.outcome, Outcome::Compressed { attempts: 1 });
        assert_eq!(result.note(), None);
        assert!((result.ratio() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_escalates_once_on_first_output() {
        let codec = MockCodec::new().with_ratio(0.85).with_ratio(0.5);
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.9).await;

        assert_eq!(codec.get_call_count(), 2);
        assert_eq!(result.size, 425);
        assert_eq!(result.outcome, Outcome::Compressed { attempts: 2 });

        let calls = codec.get_calls();
        assert_eq!(calls[0].input_len, 1000);
        assert_eq!(calls[1].input_len, 850);
        assert_eq!(calls[1].params, escalate(&calls[0].params));
        assert_eq!(calls[1].params.max_dimension_px, 1600);
    }

    #[tokio::test]
    async fn test_exactly_eighty_percent_does_not_escalate() {
        let codec = MockCodec::new().with_ratio(0.8);
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(codec.get_call_count(), 1);
        assert_eq!(result.size, 800);
    }

    #[tokio::test]
    async fn test_png_second_pass_is_fed_as_jpeg() {
        let codec = MockCodec::new().with_ratio(0.9).with_ratio(0.5);
        let source = source(1000, MimeType::Png);

        let result = compressor(&codec).compress(&source, 0.9).await;

        let calls = codec.get_calls();
        assert_eq!(calls[0].mime_type, MimeType::Png);
        assert_eq!(calls[1].mime_type, MimeType::Jpeg);
        assert_eq!(result.mime_type, MimeType::Jpeg);
    }

    #[tokio::test]
    async fn test_larger_output_keeps_original() {
        let codec = MockCodec::new().with_ratio(1.5);
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(codec.get_call_count(), 2);
        assert_eq!(result.outcome, Outcome::KeptOriginal);
        assert_eq!(result.size, 1000);
        assert_eq!(result.data, source.data);
        assert_eq!(result.mime_type, MimeType::Jpeg);
        assert_eq!(result.note(), Some("kept original size"));
    }

    #[tokio::test]
    async fn test_second_pass_regression_keeps_original() {
        let codec = MockCodec::new().with_ratio(0.9).with_ratio(1.2);
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(result.outcome, Outcome::KeptOriginal);
        assert_eq!(result.data, source.data);
    }

    #[tokio::test]
    async fn test_equal_size_keeps_original() {
        let codec = MockCodec::new().with_ratio(1.0);
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(result.outcome, Outcome::KeptOriginal);
    }

    #[tokio::test]
    async fn test_always_failing_codec_falls_back_for_every_quality() {
        let codec = MockCodec::new().with_failure("decoder exploded");
        let compressor = compressor(&codec);
        let source = source(1000, MimeType::Jpeg);

        for quality in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let result = compressor.compress(&source, quality).await;
            assert_eq!(result.data, source.data);
            assert_eq!(
                result.outcome,
                Outcome::Fallback {
                    failure: FailureKind::CodecError("Codec error: decoder exploded".to_string())
                }
            );
            assert!(!result.note().unwrap().is_empty());
        }
        assert_eq!(codec.get_call_count(), 5);
    }

    #[tokio::test]
    async fn test_unsupported_format_note() {
        let codec = MockCodec::new().with_response(MockResponse::Unsupported);

        let result = compressor(&codec)
            .compress(&source(100, MimeType::Png), 0.8)
            .await;

        assert_eq!(
            result.note(),
            Some("this image format is not supported by the browser")
        );
    }

    #[tokio::test]
    async fn test_not_supported_message_is_classified_as_unsupported() {
        let codec = MockCodec::new().with_failure("color type not supported");

        let result = compressor(&codec)
            .compress(&source(100, MimeType::Png), 0.8)
            .await;

        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                failure: FailureKind::UnsupportedFormat
            }
        );
    }

    #[tokio::test]
    async fn test_empty_output_is_invalid_result() {
        let codec = MockCodec::new().with_response(MockResponse::Empty);
        let source = source(100, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                failure: FailureKind::InvalidResult
            }
        );
        assert_eq!(result.data, source.data);
        assert_eq!(result.note(), Some("compression failed, please retry"));
    }

    #[tokio::test]
    async fn test_second_pass_failure_falls_back_to_original() {
        let codec = MockCodec::new().with_ratio(0.95).with_failure("worker crashed");
        let source = source(1000, MimeType::Jpeg);

        let result = compressor(&codec).compress(&source, 0.8).await;

        assert_eq!(codec.get_call_count(), 2);
        assert!(result.original_retained());
        assert_eq!(result.data, source.data);
        assert!(matches!(
            result.outcome,
            Outcome::Fallback {
                failure: FailureKind::CodecError(_)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_codec_times_out_after_thirty_seconds() {
        let codec = MockCodec::new().with_response(MockResponse::Hang);
        let source = source(1000, MimeType::Jpeg);
        let started = Instant::now();

        let result = compressor(&codec).compress(&source, 0.8).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                failure: FailureKind::Timeout
            }
        );
        assert_eq!(result.data, source.data);
        assert_eq!(
            result.note(),
            Some("processing took too long — try a smaller image")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_first_pass_within_timeout_succeeds() {
        let codec = MockCodec::new().with_response(MockResponse::Delayed {
            ratio: 0.5,
            delay: Duration::from_secs(29),
        });

        let result = compressor(&codec)
            .compress(&source(1000, MimeType::Jpeg), 0.8)
            .await;

        assert_eq!(result.outcome, Outcome::Compressed { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_pass_is_not_raced_against_timeout() {
        let codec = MockCodec::new()
            .with_ratio(0.9)
            .with_response(MockResponse::Delayed {
                ratio: 0.5,
                delay: Duration::from_secs(45),
            });
        let started = Instant::now();

        let result = compressor(&codec)
            .compress(&source(1000, MimeType::Jpeg), 0.8)
            .await;

        assert!(started.elapsed() >= Duration::from_secs(45));
        assert_eq!(result.outcome, Outcome::Compressed { attempts: 2 });
        assert_eq!(result.size, 450);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout() {
        let codec = MockCodec::new().with_response(MockResponse::Hang);
        let compressor = compressor(&codec).with_timeout(Duration::from_secs(5));
        let started = Instant::now();

        let result = compressor.compress(&source(10, MimeType::Jpeg), 0.8).await;

        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(result.original_retained());
    }

    #[tokio::test]
    async fn test_repeated_requests_always_start_from_source() {
        let codec = MockCodec::new().with_ratio(0.6);
        let compressor = compressor(&codec);
        let source = source(1000, MimeType::Jpeg);

        let first = compressor.compress(&source, 0.9).await;
        let second = compressor.compress(&source, 0.4).await;

        assert_eq!(first.size, 600);
        assert_eq!(second.size, 600);

        let calls = codec.get_calls();
        assert!(calls.iter().all(|call| call.input_len == 1000));
        assert!((calls[0].params.target_quality - 0.9).abs() < 1e-9);
        assert!((calls[1].params.target_quality - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_overlapping_requests_do_not_interfere() {
        let codec = MockCodec::new().with_ratio(0.5);
        let compressor = compressor(&codec);
        let small = source(1000, MimeType::Jpeg);
        let large = source(4000, MimeType::Png);

        let (a, b) = tokio::join!(
            compressor.compress(&small, 0.8),
            compressor.compress(&large, 0.8)
        );

        assert_eq!(a.size, 500);
        assert_eq!(b.size, 2000);
        assert_eq!(a.mime_type, MimeType::Jpeg);
        assert_eq!(b.mime_type, MimeType::Jpeg);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(Error::UnsupportedFormat("image/gif".to_string())),
            FailureKind::UnsupportedFormat
        );
        assert_eq!(
            classify(Error::Codec("boom".to_string())),
            FailureKind::CodecError("Codec error: boom".to_string())
        );
    }
}
