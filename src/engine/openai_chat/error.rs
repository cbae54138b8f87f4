use crate::error::EngineError;
use crate::normalize::normalize_body;

use super::NAME;

pub(crate) fn parse_openai_error(status: u16, body: &str) -> EngineError {
    let message = normalize_body(body);
    match status {
        401 | 403 => EngineError::auth(message),
        _ => EngineError::provider(NAME, format!("status {status}: {message}")),
    }
}
