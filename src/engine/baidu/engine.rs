use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DynSettingsStore;
use crate::delivery::{MessageRequest, deliver};
use crate::engine::{Engine, ModelDescriptor, resolve_model};
use crate::error::{EngineError, require_setting};
use crate::http::{DynHttpTransport, HttpBodyStream, stream_json};
use crate::stream::collect_body_text;
use crate::token::{AccessToken, TokenManager};

use super::NAME;
use super::error::{is_baidu_error, parse_baidu_error};
use super::request::build_baidu_body;
use super::stream::BaiduFrames;

const DEFAULT_TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";
const DEFAULT_CHAT_URL: &str = "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop/chat";

const MODELS: [(&str, &str); 4] = [
    ("ernie-3.5-8k-0205", "ERNIE-3.5-8K-0205"),
    ("ernie-3.5-4k-0205", "ERNIE-3.5-4K-0205"),
    ("ernie-3.5-8k-1222", "ERNIE-3.5-8K-1222"),
    ("ernie-4.0-8k", "ERNIE-4.0-8K"),
];

/// Baidu ERNIE (Wenxin Workshop) engine.
///
/// Authenticates with an OAuth2 client-credentials token passed in the query string.
/// The token is cached in the settings store and refreshed once it expires.
pub struct BaiduEngine {
    pub(crate) transport: DynHttpTransport,
    pub(crate) store: DynSettingsStore,
    pub(crate) tokens: TokenManager,
    pub(crate) chat_url: String,
    pub(crate) default_model: Option<String>,
}

impl BaiduEngine {
    /// 使用默认 token 与 chat 地址创建 Engine
    pub fn new(transport: DynHttpTransport, store: DynSettingsStore) -> Self {
        Self {
            tokens: TokenManager::new(transport.clone(), DEFAULT_TOKEN_URL),
            transport,
            store,
            chat_url: DEFAULT_CHAT_URL.to_string(),
            default_model: None,
        }
    }

    /// 替换 TokenManager 便于接入代理或测试时钟
    pub fn with_token_manager(mut self, tokens: TokenManager) -> Self {
        self.tokens = tokens;
        self
    }

    /// 自定义 chat 地址 模型名会追加在末尾
    pub fn with_chat_url(mut self, chat_url: impl Into<String>) -> Self {
        self.chat_url = chat_url.into();
        self
    }

    /// 设置默认模型
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub(crate) fn endpoint(&self, model: &str, access_token: &str) -> Result<String, EngineError> {
        let base = self.chat_url.trim_end_matches('/');
        Url::parse_with_params(&format!("{base}/{model}"), &[("access_token", access_token)])
            .map(String::from)
            .map_err(|err| EngineError::configuration("chat_url", err.to_string()))
    }

    /// Returns a usable token, writing a refreshed one back to the store.
    async fn access_token(&self) -> Result<AccessToken, EngineError> {
        let settings = self.store.load().await?;
        let client_id = require_setting(settings.baidu_client_id.as_deref(), "baiduClientId")?;
        let client_secret =
            require_setting(settings.baidu_client_secret.as_deref(), "baiduClientSecret")?;
        let cached = settings.baidu_token();

        let token = self
            .tokens
            .get_valid_token(&client_id, &client_secret, cached.as_ref())
            .await?;

        if cached.as_ref() != Some(&token) {
            debug!(expires_at_ms = token.expires_at_ms, "storing refreshed access token");
            // Reload so fields edited during the exchange are not clobbered.
            let mut latest = self.store.load().await?;
            latest.set_baidu_token(&token);
            if let Err(err) = self.store.save(&latest).await {
                warn!(error = %err, "failed to persist refreshed access token");
            }
        }

        Ok(token)
    }

    /// Drops a token the chat endpoint refused so the next request re-authenticates.
    async fn forget_token(&self, rejected: &str) {
        let Ok(mut settings) = self.store.load().await else {
            return;
        };
        if settings.baidu_access_token.as_deref() != Some(rejected) {
            return;
        }
        settings.baidu_access_token = None;
        settings.baidu_access_token_expires_at = None;
        if let Err(err) = self.store.save(&settings).await {
            warn!(error = %err, "failed to clear rejected access token");
        }
    }

    async fn open_stream(
        &self,
        role_prompt: &str,
        command_prompt: &str,
    ) -> Result<HttpBodyStream, EngineError> {
        let model = self.get_model().await?;
        let token = self.access_token().await?;
        let url = self.endpoint(&model, &token.value)?;
        let body = build_baidu_body(role_prompt, command_prompt);

        debug!(%model, "opening ERNIE stream");
        let response = stream_json(self.transport.as_ref(), url, None, &body).await?;

        let status = response.status;
        let declared_json = response.is_json();
        let mut body = response.body;
        if response_is_success(status) && !declared_json {
            // Some gateways label error documents as text/html or send no content type.
            let (document, sniffed) = sniff_json_document(body).await?;
            if !document {
                return Ok(sniffed);
            }
            body = sniffed;
        }

        // Errors, and the occasional non-streamed answer, arrive as one JSON document.
        let text = collect_body_text(body, NAME).await?;
        if response_is_success(status) && !is_baidu_error(&text) {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                return Ok(single_frame(&value));
            }
        }

        let err = parse_baidu_error(status, &text);
        if matches!(err, EngineError::Auth { .. }) {
            self.forget_token(&token.value).await;
        }
        Err(err)
    }
}

fn response_is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Reads up to the first non-whitespace byte and reports whether it opens a JSON object.
/// The returned body still yields every byte read.
async fn sniff_json_document(
    mut body: HttpBodyStream,
) -> Result<(bool, HttpBodyStream), EngineError> {
    let mut head: Vec<u8> = Vec::new();
    let first = loop {
        if let Some(byte) = head.iter().copied().find(|byte| !byte.is_ascii_whitespace()) {
            break Some(byte);
        }
        match body.next().await {
            Some(chunk) => head.extend_from_slice(&chunk?),
            None => break None,
        }
    };
    let replayed: HttpBodyStream = Box::pin(stream::iter([Ok(head)]).chain(body));
    Ok((first == Some(b'{'), replayed))
}

/// Re-frames a whole JSON answer as a one-event SSE body.
fn single_frame(value: &Value) -> HttpBodyStream {
    let frame = format!("data: {value}\n\n").into_bytes();
    Box::pin(stream::iter([Ok(frame)]))
}

#[async_trait]
impl Engine for BaiduEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn list_models(&self, _credential_hint: Option<&str>) -> Vec<ModelDescriptor> {
        MODELS
            .iter()
            .map(|(id, name)| ModelDescriptor::new(*id, *name))
            .collect()
    }

    async fn get_model(&self) -> Result<String, EngineError> {
        let settings = self.store.load().await?;
        resolve_model(
            settings.baidu_api_model,
            self.default_model.as_deref(),
            "baiduAPIModel",
        )
    }

    #[tracing::instrument(level = "info", skip_all, fields(engine = NAME))]
    async fn send_message(&self, request: MessageRequest) {
        let MessageRequest {
            role_prompt,
            command_prompt,
            signal,
            sink,
        } = request;
        deliver(
            self.open_stream(&role_prompt, &command_prompt),
            sink,
            &signal,
            NAME,
            &BaiduFrames,
        )
        .await;
    }
}
