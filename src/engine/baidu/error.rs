use serde::Deserialize;

use crate::error::EngineError;
use crate::normalize::normalize_body;

use super::NAME;

/// `error_code` values meaning the access token itself was refused.
const TOKEN_REJECTED: [i64; 2] = [110, 111];

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

/// Formats an ERNIE `error_code`/`error_msg` pair.
pub(crate) fn describe_baidu_error(code: i64, message: Option<&str>) -> String {
    match message.filter(|msg| !msg.is_empty()) {
        Some(message) => format!("{message} ({code})"),
        None => format!("error code {code}"),
    }
}

/// Whether `body` is an ERNIE error document.
pub(crate) fn is_baidu_error(body: &str) -> bool {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error_code)
        .is_some_and(|code| code != 0)
}

/// Parses a failed chat response.
///
/// ERNIE reports most failures as `{error_code, error_msg}`, frequently with status 200.
/// Token rejections become [`EngineError::Auth`] so the engine can drop its cached token;
/// everything else is a provider error. Other shapes go through the generic normalizer.
pub(crate) fn parse_baidu_error(status: u16, body: &str) -> EngineError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(code) = parsed.error_code.filter(|code| *code != 0) {
            let message = describe_baidu_error(code, parsed.error_msg.as_deref());
            if TOKEN_REJECTED.contains(&code) {
                return EngineError::auth(message);
            }
            return EngineError::provider(NAME, message);
        }
    }

    let message = normalize_body(body);
    match status {
        401 | 403 => EngineError::auth(message),
        _ => EngineError::provider(NAME, format!("status {status}: {message}")),
    }
}
