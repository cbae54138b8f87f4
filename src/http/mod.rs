use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::EngineError;

pub mod reqwest;

/// HTTP verbs the engines need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Outgoing request, independent of the HTTP client that will send it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Bodiless POST; endpoints that take their input in the query string use this.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    /// Adds or replaces one header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 设置单次请求超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serializes `body` as the JSON payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_engine::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post("https://example.com/chat")
    ///     .json(&serde_json::json!({"stream": true}))
    ///     .unwrap();
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.body.as_deref(), Some(&br#"{"stream":true}"#[..]));
    /// ```
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] when serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, EngineError> {
        let payload = serde_json::to_vec(body).map_err(|err| EngineError::Validation {
            message: format!("failed to serialize request: {err}"),
        })?;
        self.body = Some(payload);
        Ok(self.header("Content-Type", "application/json"))
    }
}

/// Fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// # Errors
    ///
    /// [`EngineError::Transport`] for a body that is not UTF-8.
    pub fn into_string(self) -> Result<String, EngineError> {
        String::from_utf8(self.body).map_err(|err| EngineError::transport(err.to_string()))
    }
}

/// Chunked body as produced by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, EngineError>> + Send>>;

/// Response whose body is still arriving.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header lookup ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// True when the server sent a single JSON document rather than an event stream.
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|value| value.to_ascii_lowercase().contains("application/json"))
    }
}

/// The seam between engines and the HTTP client.
///
/// Implementations must release the connection when a streamed body is dropped;
/// cancellation depends on it.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// # Errors
    ///
    /// [`EngineError::Transport`] when the request cannot be completed.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError>;

    /// Resolves once the status line and headers are in; the body follows as a stream.
    ///
    /// # Errors
    ///
    /// [`EngineError::Transport`] when the connection or handshake fails.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, EngineError>;
}

/// 线程安全 Transport
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// POSTs `body` as JSON with extra `headers` and hands back the streaming response.
///
/// # Errors
///
/// Serialization failures as [`EngineError::Validation`], plus whatever the transport
/// reports.
pub async fn stream_json<T: Serialize + ?Sized>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: impl IntoIterator<Item = (String, String)>,
    body: &T,
) -> Result<HttpStreamResponse, EngineError> {
    let mut request = HttpRequest::post(url).json(body)?;
    request.headers.extend(headers);
    transport.send_stream(request).await
}
