use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::EngineClient;
use crate::engine::DynEngine;
use crate::engine::baidu::BaiduEngine;
use crate::engine::openai_chat::OpenAiChatEngine;
use crate::error::EngineError;
use crate::http::DynHttpTransport;
use crate::token::AccessToken;

/// User-editable settings consumed by the engines.
///
/// Keys are camelCase so the struct round-trips with settings documents written by the
/// host application. Every field is optional; engines validate what they need when a
/// request starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(rename = "baiduAPIModel", alias = "baiduApiModel")]
    pub baidu_api_model: Option<String>,
    pub baidu_client_id: Option<String>,
    pub baidu_client_secret: Option<String>,
    /// Cached token, written back by the Baidu engine after a refresh.
    pub baidu_access_token: Option<String>,
    /// Expiry of `baidu_access_token` in epoch milliseconds.
    pub baidu_access_token_expires_at: Option<i64>,
    #[serde(rename = "openaiAPIKey", alias = "openaiApiKey")]
    pub openai_api_key: Option<String>,
    #[serde(rename = "openaiAPIModel", alias = "openaiApiModel")]
    pub openai_api_model: Option<String>,
    #[serde(rename = "openaiAPIURL", alias = "openaiApiUrl")]
    pub openai_api_url: Option<String>,
}

impl Settings {
    /// The cached Baidu token, if both halves are present.
    pub fn baidu_token(&self) -> Option<AccessToken> {
        let value = self.baidu_access_token.as_ref().filter(|v| !v.is_empty())?;
        Some(AccessToken {
            value: value.clone(),
            expires_at_ms: self.baidu_access_token_expires_at.unwrap_or(0),
        })
    }

    pub fn set_baidu_token(&mut self, token: &AccessToken) {
        self.baidu_access_token = Some(token.value.clone());
        self.baidu_access_token_expires_at = Some(token.expires_at_ms);
    }

    /// Parses a JSON settings document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when the document is not valid JSON.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text)
            .map_err(|err| EngineError::configuration("settings", err.to_string()))
    }
}

/// Read/write access to [`Settings`], injected into every engine.
///
/// Writes are plain overwrites: concurrent writers race and the last one wins.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<Settings, EngineError>;

    async fn save(&self, settings: &Settings) -> Result<(), EngineError>;
}

/// Shared handle to a settings store.
pub type DynSettingsStore = Arc<dyn SettingsStore>;

/// In-process settings store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: RwLock<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Current contents, without going through the async trait.
    pub fn snapshot(&self) -> Settings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Settings, EngineError> {
        Ok(self.snapshot())
    }

    async fn save(&self, settings: &Settings) -> Result<(), EngineError> {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings.clone();
        Ok(())
    }
}

/// 引擎类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Baidu,
    OpenAiChat,
}

impl EngineKind {
    /// Handle under which [`build_client`] registers the engine.
    pub fn handle(self) -> &'static str {
        match self {
            EngineKind::Baidu => "baidu",
            EngineKind::OpenAiChat => "openai_chat",
        }
    }
}

/// 根据引擎类型构建 EngineClient
pub fn build_client(
    kinds: &[EngineKind],
    transport: DynHttpTransport,
    store: DynSettingsStore,
) -> EngineClient {
    let mut builder = EngineClient::builder();
    for kind in kinds {
        builder = builder.register_handle(
            kind.handle(),
            build_engine(*kind, transport.clone(), store.clone()),
        );
    }
    builder.build()
}

fn build_engine(kind: EngineKind, transport: DynHttpTransport, store: DynSettingsStore) -> DynEngine {
    match kind {
        EngineKind::Baidu => Arc::new(BaiduEngine::new(transport, store)),
        EngineKind::OpenAiChat => Arc::new(OpenAiChatEngine::new(transport, store)),
    }
}
