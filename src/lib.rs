//! 多翻译引擎统一流式调用库

pub mod client;
pub mod config;
pub mod delivery;
pub mod dictionary;
pub mod engine;
pub mod error;
pub mod http;
pub mod normalize;
pub mod stream;
pub mod token;

pub use client::EngineClient;
pub use config::{EngineKind, MemorySettingsStore, Settings, SettingsStore, build_client};
pub use delivery::{Message, MessageEvent, MessageRequest, MessageSink};
pub use dictionary::{CambridgeDictionary, DictionaryEntry};
pub use engine::baidu::BaiduEngine;
pub use engine::openai_chat::OpenAiChatEngine;
pub use engine::{DynEngine, Engine, ModelDescriptor};
pub use error::EngineError;
pub use token::{AccessToken, TokenManager};
