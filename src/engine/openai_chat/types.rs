use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiChatBody<'a> {
    pub(crate) model: &'a str,
    pub(crate) temperature: f64,
    pub(crate) stream: bool,
    pub(crate) messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAiMessage<'a> {
    pub(crate) role: &'static str,
    pub(crate) content: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OpenAiStreamChunk {
    #[serde(default)]
    pub(crate) choices: Vec<OpenAiStreamChoice>,
    /// Some compatible servers report failures inside the stream.
    #[serde(default)]
    pub(crate) error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OpenAiStreamChoice {
    #[serde(default)]
    pub(crate) index: usize,
    #[serde(default)]
    pub(crate) delta: Option<OpenAiStreamDelta>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OpenAiStreamDelta {
    #[serde(default)]
    pub(crate) role: Option<String>,
    #[serde(default)]
    pub(crate) content: Option<String>,
}
