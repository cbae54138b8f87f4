use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::delivery::MessageRequest;
use crate::error::EngineError;

pub mod baidu;
pub mod openai_chat;

/// Entry in an engine's static model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    /// Human-readable label.
    pub name: String,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 统一的 Engine Trait 所有供应商实现该接口即可接入
#[async_trait]
pub trait Engine: Send + Sync {
    /// 引擎名称
    fn name(&self) -> &'static str;

    /// Static model catalog. Never touches the network and never fails.
    ///
    /// `credential_hint` lets engines with key-dependent catalogs narrow the list; the
    /// bundled engines ignore it.
    fn list_models(&self, credential_hint: Option<&str>) -> Vec<ModelDescriptor>;

    /// Model id configured for this engine.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] when neither the settings nor the engine supply one.
    async fn get_model(&self) -> Result<String, EngineError>;

    /// Streams the answer to `request` into its sink.
    ///
    /// Never fails: every problem is reported through the sink's `on_error`, after which
    /// no other callback fires.
    async fn send_message(&self, request: MessageRequest);
}

/// 线程安全 Engine
pub type DynEngine = Arc<dyn Engine>;

/// Picks the configured model, falling back to the engine default.
pub(crate) fn resolve_model(
    configured: Option<String>,
    default_model: Option<&str>,
    field: &str,
) -> Result<String, EngineError> {
    configured
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .or_else(|| default_model.map(str::to_string))
        .ok_or_else(|| EngineError::configuration(field, "no model configured"))
}
