use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};

use crate::error::EngineError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// 基于 reqwest 的默认 HttpTransport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 复用调用方的 reqwest::Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 使用默认配置构建 Client
    pub fn default_client() -> Result<Self, EngineError> {
        let client = Client::builder()
            .build()
            .map_err(|err| EngineError::transport(format!("failed to create reqwest client: {err}")))?;
        Ok(Self::new(client))
    }

    /// Sends `request` and returns the response once its headers are in.
    async fn execute(&self, request: HttpRequest) -> Result<Response, EngineError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;

        let method = match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self
            .client
            .request(method, url)
            .headers(header_map(headers)?);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        builder
            .send()
            .await
            .map_err(|err| EngineError::transport(err.to_string()))
    }
}

fn header_map(headers: HashMap<String, String>) -> Result<HeaderMap, EngineError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::try_from(name)
            .map_err(|err| EngineError::transport(format!("invalid header name: {err}")))?;
        let value = HeaderValue::try_from(value).map_err(|err| {
            EngineError::transport(format!("invalid header value for {name}: {err}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Flattens response headers; values that are not visible ASCII become empty strings.
fn plain_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or_default();
            (name.to_string(), value.to_string())
        })
        .collect()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        let headers = plain_headers(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|err| EngineError::transport(err.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body: bytes.to_vec(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, EngineError> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        let headers = plain_headers(&response);
        // The stream owns the response; dropping it closes the connection.
        let body: HttpBodyStream = Box::pin(
            response
                .bytes_stream()
                .map_ok(|bytes| bytes.to_vec())
                .map_err(|err| EngineError::stream(err.to_string())),
        );
        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 便捷构造线程安全 Transport
pub fn default_dyn_transport() -> Result<DynHttpTransport, EngineError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
