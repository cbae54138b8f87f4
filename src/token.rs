//! OAuth2 client-credentials tokens with expiry-aware caching.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::http::{DynHttpTransport, HttpRequest};

/// Upper bound for one grant exchange.
const TOKEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Returns the current time as milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Short-lived bearer credential returned by a client-credentials grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub expires_at_ms: i64,
}

impl AccessToken {
    /// A token is stale from the instant `now_ms` reaches its expiry.
    pub fn is_stale(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges client credentials for access tokens and decides when to refresh.
///
/// The manager holds no cache of its own; callers pass the cached token in and persist
/// whatever comes back. Two callers refreshing at once both perform an exchange and the
/// later write wins, which is harmless because the grant has no side effects.
pub struct TokenManager {
    transport: DynHttpTransport,
    token_url: String,
    clock: Clock,
}

impl TokenManager {
    pub fn new(transport: DynHttpTransport, token_url: impl Into<String>) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replaces the wall clock, mainly for tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now_ms(&self) -> i64 {
        (self.clock)()
    }

    /// Returns `cached` while it is fresh, otherwise performs one grant exchange.
    ///
    /// # Errors
    ///
    /// Every failure during the exchange, including a malformed response, is reported as
    /// [`EngineError::Auth`]. Nothing is retried.
    pub async fn get_valid_token(
        &self,
        client_id: &str,
        client_secret: &str,
        cached: Option<&AccessToken>,
    ) -> Result<AccessToken, EngineError> {
        let now = self.now_ms();
        if let Some(token) = cached.filter(|token| !token.is_stale(now)) {
            return Ok(token.clone());
        }

        debug!(token_url = %self.token_url, "refreshing access token");
        self.exchange(client_id, client_secret, now).await
    }

    async fn exchange(
        &self,
        client_id: &str,
        client_secret: &str,
        now: i64,
    ) -> Result<AccessToken, EngineError> {
        let url = Url::parse_with_params(
            &self.token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ],
        )
        .map_err(|err| EngineError::auth(format!("invalid token endpoint: {err}")))?;

        let response = self
            .transport
            .send(
                HttpRequest::post(url.as_str())
                    .header("Accept", "application/json")
                    .timeout(TOKEN_TIMEOUT),
            )
            .await
            .map_err(|err| EngineError::auth(format!("token exchange failed: {err}")))?;

        let status = response.status;
        let text = response
            .into_string()
            .map_err(|err| EngineError::auth(format!("token exchange failed: {err}")))?;
        let parsed: TokenResponse = serde_json::from_str(&text).map_err(|err| {
            EngineError::auth(format!(
                "token endpoint returned status {status} with unreadable body: {err}"
            ))
        })?;

        if let Some(error) = parsed.error {
            let message = match parsed.error_description {
                Some(description) if !description.is_empty() => format!("{description} ({error})"),
                _ => error,
            };
            return Err(EngineError::auth(message));
        }

        if !(200..300).contains(&status) {
            return Err(EngineError::auth(format!(
                "token endpoint returned status {status}"
            )));
        }

        let value = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| EngineError::auth("token endpoint returned no access_token"))?;
        let expires_in = parsed
            .expires_in
            .ok_or_else(|| EngineError::auth("token endpoint returned no expires_in"))?;

        Ok(AccessToken {
            value,
            expires_at_ms: now.saturating_add(expires_in.saturating_mul(1000)),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::http::{HttpResponse, HttpStreamResponse, HttpTransport};

    /// Answers every `send` with a fixed response and records the requests it saw.
    pub(crate) struct TokenEndpoint {
        pub(crate) status: u16,
        pub(crate) body: String,
        pub(crate) calls: AtomicUsize,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl TokenEndpoint {
        pub(crate) fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_string(),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for TokenEndpoint {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: self.body.clone().into_bytes(),
            })
        }

        async fn send_stream(
            &self,
            _request: HttpRequest,
        ) -> Result<HttpStreamResponse, EngineError> {
            panic!("token exchange never streams");
        }
    }

    struct Unreachable;

    #[async_trait]
    impl HttpTransport for Unreachable {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, EngineError> {
            Err(EngineError::transport("connection refused"))
        }

        async fn send_stream(
            &self,
            _request: HttpRequest,
        ) -> Result<HttpStreamResponse, EngineError> {
            Err(EngineError::transport("connection refused"))
        }
    }

    fn token_manager(transport: DynHttpTransport, now: i64) -> TokenManager {
        TokenManager::new(transport, "https://auth.example.com/oauth/2.0/token")
            .with_clock(Arc::new(move || now))
    }

    #[tokio::test]
    async fn stale_token_triggers_exactly_one_exchange() {
        let endpoint = TokenEndpoint::new(200, r#"{"access_token":"fresh","expires_in":2592000}"#);
        let manager = token_manager(endpoint.clone(), 10_000);
        let stale = AccessToken {
            value: "old".to_string(),
            expires_at_ms: 9_999,
        };

        let token = manager
            .get_valid_token("id", "secret", Some(&stale))
            .await
            .expect("token");

        assert_eq!(endpoint.calls(), 1);
        assert_eq!(token.value, "fresh");
        assert_eq!(token.expires_at_ms, 10_000 + 2_592_000 * 1000);
    }

    #[tokio::test]
    async fn token_expiring_now_is_stale() {
        let endpoint = TokenEndpoint::new(200, r#"{"access_token":"fresh","expires_in":60}"#);
        let manager = token_manager(endpoint.clone(), 5_000);
        let edge = AccessToken {
            value: "old".to_string(),
            expires_at_ms: 5_000,
        };
        manager.get_valid_token("id", "secret", Some(&edge)).await.unwrap();
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_exchange() {
        let endpoint = TokenEndpoint::new(200, r#"{"access_token":"unused","expires_in":60}"#);
        let manager = token_manager(endpoint.clone(), 10_000);
        let cached = AccessToken {
            value: "cached".to_string(),
            expires_at_ms: 10_001,
        };

        let token = manager
            .get_valid_token("id", "secret", Some(&cached))
            .await
            .expect("token");

        assert_eq!(endpoint.calls(), 0);
        assert_eq!(token, cached);
    }

    #[tokio::test]
    async fn missing_token_sends_encoded_credentials() {
        let endpoint = TokenEndpoint::new(200, r#"{"access_token":"fresh","expires_in":1}"#);
        let manager = token_manager(endpoint.clone(), 0);

        manager
            .get_valid_token("my id", "s&cret", None)
            .await
            .expect("token");

        let urls: Vec<String> = endpoint
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.url.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://auth.example.com/oauth/2.0/token?grant_type=client_credentials&client_id=my+id&client_secret=s%26cret"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn exchange_is_a_bounded_json_post() {
        let endpoint = TokenEndpoint::new(200, r#"{"access_token":"fresh","expires_in":1}"#);
        token_manager(endpoint.clone(), 0)
            .get_valid_token("id", "secret", None)
            .await
            .expect("token");

        let requests = endpoint.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.method, crate::http::HttpMethod::Post);
        assert_eq!(request.headers["Accept"], "application/json");
        assert_eq!(request.timeout, Some(TOKEN_TIMEOUT));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn provider_error_payload_is_an_auth_error() {
        let endpoint = TokenEndpoint::new(
            401,
            r#"{"error":"invalid_client","error_description":"unknown client id"}"#,
        );
        let manager = token_manager(endpoint, 0);
        match manager.get_valid_token("id", "secret", None).await {
            Err(EngineError::Auth { message }) => {
                assert_eq!(message, "unknown client id (invalid_client)");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_failure_is_an_auth_error() {
        let manager = token_manager(Arc::new(Unreachable), 0);
        match manager.get_valid_token("id", "secret", None).await {
            Err(EngineError::Auth { message }) => assert!(message.contains("connection refused")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_response_is_an_auth_error() {
        let endpoint = TokenEndpoint::new(200, "<html>gateway</html>");
        let manager = token_manager(endpoint.clone(), 0);
        assert!(matches!(
            manager.get_valid_token("id", "secret", None).await,
            Err(EngineError::Auth { .. })
        ));

        let endpoint = TokenEndpoint::new(200, r#"{"expires_in":60}"#);
        let manager = token_manager(endpoint, 0);
        assert!(matches!(
            manager.get_valid_token("id", "secret", None).await,
            Err(EngineError::Auth { .. })
        ));
    }
}
