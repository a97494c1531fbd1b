use crate::error::UploadError;
use crate::multipart::{content_type_header, wrap_dicom_instance};
use crate::token_cache::TokenCache;
use metrics::histogram;
use std::sync::Arc;
use std::time::{Duration, Instant};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Status codes STOW-RS may return that are worth retrying.
const RETRYABLE_STATUS: [reqwest::StatusCode; 5] = [
    reqwest::StatusCode::TOO_MANY_REQUESTS,
    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
    reqwest::StatusCode::BAD_GATEWAY,
    reqwest::StatusCode::SERVICE_UNAVAILABLE,
    reqwest::StatusCode::GATEWAY_TIMEOUT,
];

/// Posts mutated DICOM instances to a STOW-RS endpoint, retrying transient
/// failures with exponential backoff. One [Uploader] per process; the inner
/// `reqwest::Client` is internally pooled and thread-safe.
pub struct Uploader {
    client: reqwest::Client,
    studies_url: String,
    tokens: Arc<TokenCache>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Uploader {
    pub fn new(
        server_base_url: &str,
        tokens: Arc<TokenCache>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(UPLOAD_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
            studies_url: format!("{}/dicom-web/studies", server_base_url.trim_end_matches('/')),
            tokens,
            max_retries,
            retry_delay,
        }
    }

    /// Upload one DICOM instance's bytes under `filename`, retrying
    /// transient failures up to `max_retries` times.
    pub async fn upload(&self, dicom_bytes: &[u8], filename: &str) -> Result<(), UploadError> {
        let started = Instant::now();
        let result = self.upload_with_retries(dicom_bytes, filename).await;
        histogram!("dicom_upload_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn upload_with_retries(
        &self,
        dicom_bytes: &[u8],
        filename: &str,
    ) -> Result<(), UploadError> {
        let attempts = self.max_retries + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.send_once(dicom_bytes, filename).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let retryable = should_retry(&e);
                    if retryable && attempt != attempts {
                        let delay = backoff(self.retry_delay, attempt);
                        tracing::warn!(
                            filename,
                            attempt,
                            error = %e,
                            "upload failed, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_error.expect("loop always runs at least once"))
    }

    async fn send_once(&self, dicom_bytes: &[u8], filename: &str) -> Result<(), UploadError> {
        let stow = wrap_dicom_instance(filename, dicom_bytes);
        let mut request = self
            .client
            .post(&self.studies_url)
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type_header(&stow.boundary),
            )
            .header(reqwest::header::ACCEPT, "application/dicom+json")
            .body(stow.bytes);

        if let Some(bearer) = self.tokens.acquire().await {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::OK || status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(500).collect();
        Err(UploadError::Rejected {
            status,
            body: truncated,
        })
    }
}

fn should_retry(error: &UploadError) -> bool {
    match error {
        UploadError::Request(e) => e.is_timeout() || e.is_connect(),
        UploadError::Rejected { status, .. } => RETRYABLE_STATUS.contains(status),
    }
}

/// Exponential backoff seeded by `retry_delay`, doubling per attempt.
fn backoff(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay.saturating_mul(2u32.saturating_pow(attempt - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    fn uploader(server: &MockServer) -> Uploader {
        let tokens = Arc::new(TokenCache::new(
            "http://unused.invalid".to_string(),
            "clinics".to_string(),
            "importer".to_string(),
            "".to_string(),
        ));
        Uploader::new(&server.uri(), tokens, 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dicom-web/studies"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let uploader = uploader(&server);
        uploader.upload(b"dicom-bytes", "img.dcm").await.unwrap();
    }

    #[tokio::test]
    async fn test_success_on_202() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dicom-web/studies"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let uploader = uploader(&server);
        uploader.upload(b"dicom-bytes", "img.dcm").await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        let call_count = Arc::new(AtomicUsize::new(0));

        struct FlakyThenOk(Arc<AtomicUsize>);
        impl Respond for FlakyThenOk {
            fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200)
                }
            }
        }

        Mock::given(method("POST"))
            .and(path("/dicom-web/studies"))
            .respond_with(FlakyThenOk(Arc::clone(&call_count)))
            .mount(&server)
            .await;

        let uploader = uploader(&server);
        uploader.upload(b"dicom-bytes", "img.dcm").await.unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dicom-web/studies"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let uploader = uploader(&server);
        let err = uploader.upload(b"dicom-bytes", "img.dcm").await.unwrap_err();
        match err {
            UploadError::Rejected { status, body } => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let server = MockServer::start().await;
        let call_count = Arc::new(AtomicUsize::new(0));

        struct CountingResponder(Arc<AtomicUsize>);
        impl Respond for CountingResponder {
            fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
                self.0.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(401)
            }
        }

        Mock::given(method("POST"))
            .and(path("/dicom-web/studies"))
            .respond_with(CountingResponder(Arc::clone(&call_count)))
            .mount(&server)
            .await;

        let uploader = uploader(&server);
        uploader.upload(b"dicom-bytes", "img.dcm").await.unwrap_err();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
