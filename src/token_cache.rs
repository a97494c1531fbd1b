use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum remaining lifetime a cached token must have to be returned to a caller.
const MIN_REMAINING_LIFETIME: Duration = Duration::from_secs(60);

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct TokenRecord {
    bearer: String,
    expires_at: Instant,
}

/// Holds a cached OAuth2 bearer token, refreshing it via the client-credentials
/// grant when it is missing or about to expire.
///
/// Guarded by a single mutex which is held across the refresh HTTP call, so
/// that at most one refresh is in flight at a time; concurrent callers during
/// a refresh wait for it to finish and observe the new token.
pub struct TokenCache {
    client: reqwest::Client,
    issuer: String,
    realm: String,
    client_id: String,
    client_secret: String,
    record: Mutex<Option<TokenRecord>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl TokenCache {
    pub fn new(issuer: String, realm: String, client_id: String, client_secret: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(TOKEN_REQUEST_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
            issuer,
            realm,
            client_id,
            client_secret,
            record: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, refreshing it first if necessary.
    ///
    /// Returns `None` in anonymous mode (empty client secret) or if the
    /// refresh request fails; the cache is left untouched on failure.
    pub async fn acquire(&self) -> Option<String> {
        if self.client_secret.is_empty() {
            return None;
        }

        let mut guard = self.record.lock().await;
        if let Some(record) = guard.as_ref() {
            if record.expires_at.saturating_duration_since(Instant::now()) > MIN_REMAINING_LIFETIME
            {
                return Some(record.bearer.clone());
            }
        }

        match self.refresh().await {
            Ok(record) => {
                tracing::info!("refreshed access token");
                let bearer = record.bearer.clone();
                *guard = Some(record);
                Some(bearer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh access token");
                None
            }
        }
    }

    async fn refresh(&self) -> Result<TokenRecord, reqwest::Error> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.issuer.trim_end_matches('/'),
            self.realm
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body: TokenResponse = response.json().await?;
        Ok(TokenRecord {
            bearer: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    fn token_response(expires_in: u64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-123",
            "expires_in": expires_in,
        }))
    }

    #[tokio::test]
    async fn test_anonymous_mode_skips_network() {
        let cache = TokenCache::new(
            "http://unreachable.invalid".to_string(),
            "clinics".to_string(),
            "importer".to_string(),
            "".to_string(),
        );
        assert_eq!(cache.acquire().await, None);
    }

    #[tokio::test]
    async fn test_acquire_fetches_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/clinics/protocol/openid-connect/token"))
            .respond_with(token_response(300))
            .expect(1)
            .mount(&server)
            .await;

        let cache = TokenCache::new(
            server.uri(),
            "clinics".to_string(),
            "importer".to_string(),
            "secret".to_string(),
        );
        assert_eq!(cache.acquire().await, Some("tok-123".to_string()));
        // second call within the token's lifetime must not trigger another request
        assert_eq!(cache.acquire().await, Some("tok-123".to_string()));
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_none_and_leaves_cache_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/clinics/protocol/openid-connect/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = TokenCache::new(
            server.uri(),
            "clinics".to_string(),
            "importer".to_string(),
            "secret".to_string(),
        );
        assert_eq!(cache.acquire().await, None);
    }

    /// Simulates ten concurrent workers acquiring a token over a 30-second
    /// window; exactly one refresh should hit the issuer (scenario 6, §8).
    #[tokio::test]
    async fn test_concurrent_callers_trigger_one_refresh() {
        let server = MockServer::start().await;
        let call_count = Arc::new(AtomicUsize::new(0));

        struct CountingResponder(Arc<AtomicUsize>);
        impl Respond for CountingResponder {
            fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
                self.0.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": "tok-shared",
                    "expires_in": 300,
                }))
            }
        }

        Mock::given(method("POST"))
            .and(path("/realms/clinics/protocol/openid-connect/token"))
            .respond_with(CountingResponder(Arc::clone(&call_count)))
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new(
            server.uri(),
            "clinics".to_string(),
            "importer".to_string(),
            "secret".to_string(),
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.acquire().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some("tok-shared".to_string()));
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
