use super::CodecService;
use crate::models::{CompressionParameters, MimeType};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behaviour for one codec call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// Output is `ratio` times the input length.
    Ratio(f64),
    /// Like `Ratio`, but settles only after `delay`.
    Delayed { ratio: f64, delay: Duration },
    Fail(String),
    Unsupported,
    Empty,
    /// Never settles.
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub input_len: usize,
    pub mime_type: MimeType,
    pub params: CompressionParameters,
}

#[derive(Clone)]
pub struct MockCodec {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    not_ready: Arc<Mutex<Option<String>>>,
}

impl MockCodec {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            not_ready: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue a response. Responses are consumed in order and cycle.
    pub fn with_response(self, response: MockResponse) -> Self {
        self.responses.lock().unwrap().push(response);
        self
    }

    pub fn with_ratio(self, ratio: f64) -> Self {
        self.with_response(MockResponse::Ratio(ratio))
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.with_response(MockResponse::Fail(message.to_string()))
    }

    pub fn with_readiness_failure(self, message: &str) -> Self {
        *self.not_ready.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }
}

fn scaled_output(input: &[u8], ratio: f64) -> Vec<u8> {
    vec![0xAB; (input.len() as f64 * ratio).round() as usize]
}

impl Default for MockCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodecService for MockCodec {
    async fn compress(
        &self,
        image: &[u8],
        mime_type: MimeType,
        params: &CompressionParameters,
    ) -> Result<Vec<u8>> {
        let response = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(MockCall {
                input_len: image.len(),
                mime_type,
                params: *params,
            });

            let responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                MockResponse::Ratio(0.5)
            } else {
                responses[(calls.len() - 1) % responses.len()].clone()
            }
        };

        match response {
            MockResponse::Ratio(ratio) => Ok(scaled_output(image, ratio)),
            MockResponse::Delayed { ratio, delay } => {
                tokio::time::sleep(delay).await;
                Ok(scaled_output(image, ratio))
            }
            MockResponse::Fail(message) => Err(Error::Codec(message)),
            MockResponse::Unsupported => Err(Error::UnsupportedFormat(mime_type.to_string())),
            MockResponse::Empty => Ok(Vec::new()),
            MockResponse::Hang => std::future::pending().await,
        }
    }

    async fn ready(&self) -> Result<()> {
        match self.not_ready.lock().unwrap().clone() {
            Some(message) => Err(Error::CodecUnavailable(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;

    #[tokio::test]
    async fn test_mock_default_halves_input() {
        let codec = MockCodec::new();
        let params = plan(1000, MimeType::Jpeg, 0.8);

        let output = codec.compress(&[1; 1000], MimeType::Jpeg, &params).await.unwrap();

        assert_eq!(output.len(), 500);
        assert_eq!(codec.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_responses_cycle_and_record_calls() {
        let codec = MockCodec::new().with_ratio(0.9).with_failure("boom");
        let params = plan(100, MimeType::Png, 0.8);

        assert_eq!(
            codec.compress(&[0; 100], MimeType::Png, &params).await.unwrap().len(),
            90
        );
        assert!(codec.compress(&[0; 100], MimeType::Png, &params).await.is_err());
        assert_eq!(
            codec.compress(&[0; 10], MimeType::Png, &params).await.unwrap().len(),
            9
        );

        let calls = codec.get_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].input_len, 10);
        assert_eq!(calls[0].params, params);
    }

    #[tokio::test]
    async fn test_mock_clone_shares_state() {
        let codec = MockCodec::new();
        let probe = codec.clone();
        let params = plan(10, MimeType::Jpeg, 0.8);

        codec.compress(&[0; 10], MimeType::Jpeg, &params).await.unwrap();

        assert_eq!(probe.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_unsupported_and_empty() {
        let codec = MockCodec::new()
            .with_response(MockResponse::Unsupported)
            .with_response(MockResponse::Empty);
        let params = plan(10, MimeType::Jpeg, 0.8);

        let err = codec
            .compress(&[0; 10], MimeType::Jpeg, &params)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));

        let empty = codec.compress(&[0; 10], MimeType::Jpeg, &params).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_hang_never_settles() {
        let codec = MockCodec::new().with_response(MockResponse::Hang);
        let params = plan(10, MimeType::Jpeg, 0.8);

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            codec.compress(&[0; 10], MimeType::Jpeg, &params),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_readiness() {
        assert!(MockCodec::new().ready().await.is_ok());

        let err = MockCodec::new()
            .with_readiness_failure("library missing")
            .ready()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("library missing"));
    }
}
