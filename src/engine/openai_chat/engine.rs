use async_trait::async_trait;
use tracing::debug;

use crate::config::DynSettingsStore;
use crate::delivery::{MessageRequest, deliver};
use crate::engine::{Engine, ModelDescriptor, resolve_model};
use crate::error::{EngineError, require_setting};
use crate::http::{DynHttpTransport, HttpBodyStream, stream_json};
use crate::stream::collect_body_text;

use super::NAME;
use super::error::parse_openai_error;
use super::stream::OpenAiFrames;
use super::types::{OpenAiChatBody, OpenAiMessage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.0;

const MODELS: [(&str, &str); 5] = [
    ("gpt-4o-mini", "GPT-4o mini"),
    ("gpt-4o", "GPT-4o"),
    ("gpt-4.1-mini", "GPT-4.1 mini"),
    ("gpt-4.1", "GPT-4.1"),
    ("gpt-3.5-turbo", "GPT-3.5 Turbo"),
];

/// OpenAI-compatible Chat Completions engine, authenticated with a bearer API key.
pub struct OpenAiChatEngine {
    pub(crate) transport: DynHttpTransport,
    pub(crate) store: DynSettingsStore,
    pub(crate) default_model: Option<String>,
}

impl OpenAiChatEngine {
    /// 创建带默认模型的 Engine
    pub fn new(transport: DynHttpTransport, store: DynSettingsStore) -> Self {
        Self {
            transport,
            store,
            default_model: Some(DEFAULT_MODEL.to_string()),
        }
    }

    /// 设置默认模型 传入 None 时必须由配置提供
    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model;
        self
    }

    pub(crate) fn endpoint(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    async fn open_stream(
        &self,
        role_prompt: &str,
        command_prompt: &str,
    ) -> Result<HttpBodyStream, EngineError> {
        let settings = self.store.load().await?;
        let api_key = require_setting(settings.openai_api_key.as_deref(), "openaiAPIKey")?;
        let model = resolve_model(
            settings.openai_api_model,
            self.default_model.as_deref(),
            "openaiAPIModel",
        )?;
        let base_url = settings
            .openai_api_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut messages = Vec::with_capacity(2);
        if !role_prompt.is_empty() {
            messages.push(OpenAiMessage {
                role: "system",
                content: role_prompt,
            });
        }
        messages.push(OpenAiMessage {
            role: "user",
            content: command_prompt,
        });
        let body = OpenAiChatBody {
            model: &model,
            temperature: TEMPERATURE,
            stream: true,
            messages,
        };

        let headers = [
            ("Authorization".to_string(), format!("Bearer {api_key}")),
            ("Accept".to_string(), "text/event-stream".to_string()),
        ];

        debug!(%model, "opening chat completions stream");
        let response =
            stream_json(self.transport.as_ref(), Self::endpoint(&base_url), headers, &body).await?;

        if response.is_success() {
            return Ok(response.body);
        }
        let status = response.status;
        let text = collect_body_text(response.body, NAME).await?;
        Err(parse_openai_error(status, &text))
    }
}

#[async_trait]
impl Engine for OpenAiChatEngine {
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
            settings.openai_api_model,
            self.default_model.as_deref(),
            "openaiAPIModel",
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
            &OpenAiFrames,
        )
        .await;
    }
}
