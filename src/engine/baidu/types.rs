use serde::{Deserialize, Serialize};

/// Streaming chat request accepted by the ERNIE chat endpoint.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BaiduChatBody<'a> {
    pub(crate) temperature: f64,
    pub(crate) stream: bool,
    /// ERNIE rejects an empty system prompt, so it is omitted instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<&'a str>,
    pub(crate) messages: Vec<BaiduMessage<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BaiduMessage<'a> {
    pub(crate) role: &'static str,
    pub(crate) content: &'a str,
}

/// One `data:` payload of the ERNIE stream.
///
/// Failures arrive in the same shape with `error_code`/`error_msg` set and no result.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BaiduStreamChunk {
    #[serde(default)]
    pub(crate) result: Option<String>,
    #[serde(default)]
    pub(crate) is_end: Option<bool>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
    #[serde(default)]
    pub(crate) error_code: Option<i64>,
    #[serde(default)]
    pub(crate) error_msg: Option<String>,
}
