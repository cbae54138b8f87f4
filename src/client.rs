use std::collections::HashMap;

use tracing::warn;

use crate::delivery::MessageRequest;
use crate::engine::{DynEngine, ModelDescriptor};
use crate::error::EngineError;

/// 翻译引擎调用入口 负责维护已注册的 Engine
pub struct EngineClient {
    engines: HashMap<String, DynEngine>,
}

impl EngineClient {
    /// 创建 Builder 便于后续注册 Engine
    pub fn builder() -> EngineClientBuilder {
        EngineClientBuilder {
            engines: HashMap::new(),
        }
    }

    /// 发起流式请求
    ///
    /// An unknown handle is reported through the request's sink like any other failure.
    pub async fn send_message(&self, handle: &str, request: MessageRequest) {
        match self.get_engine(handle) {
            Ok(engine) => engine.send_message(request).await,
            Err(err) => {
                warn!(handle, "send_message on unknown engine handle");
                let MessageRequest { mut sink, .. } = request;
                sink.on_error(err.to_string()).await;
            }
        }
    }

    /// 查询指定句柄的模型列表
    pub fn list_models(
        &self,
        handle: &str,
        credential_hint: Option<&str>,
    ) -> Result<Vec<ModelDescriptor>, EngineError> {
        let engine = self.get_engine(handle)?;
        Ok(engine.list_models(credential_hint))
    }

    /// 查询指定句柄当前使用的模型
    pub async fn get_model(&self, handle: &str) -> Result<String, EngineError> {
        let engine = self.get_engine(handle)?;
        engine.get_model().await
    }

    /// 返回当前已注册的句柄
    pub fn handles(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    fn get_engine(&self, handle: &str) -> Result<DynEngine, EngineError> {
        self.engines
            .get(handle)
            .cloned()
            .ok_or_else(|| {
                EngineError::configuration("engine", format!("unknown engine handle: {handle}"))
            })
    }
}

/// 负责注册 Engine 的 Builder
pub struct EngineClientBuilder {
    engines: HashMap<String, DynEngine>,
}

impl EngineClientBuilder {
    /// 注册一个句柄对应的 Engine
    pub fn register_handle<S: Into<String>>(mut self, handle: S, engine: DynEngine) -> Self {
        self.engines.insert(handle.into(), engine);
        self
    }

    /// 构建最终的 EngineClient
    pub fn build(self) -> EngineClient {
        EngineClient {
            engines: self.engines,
        }
    }
}
