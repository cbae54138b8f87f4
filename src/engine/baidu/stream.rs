use serde_json::Value;

use crate::delivery::{Frame, FrameInterpreter, Message, STOP};

use super::error::describe_baidu_error;
use super::types::BaiduStreamChunk;

/// `finish_reason` carried by every frame except the last.
pub(crate) const CONTINUE_REASON: &str = "normal";

/// Maps ERNIE stream payloads onto delivery frames.
pub(crate) struct BaiduFrames;

impl FrameInterpreter for BaiduFrames {
    fn interpret(&self, payload: Value) -> Frame {
        let chunk: BaiduStreamChunk = match serde_json::from_value(payload) {
            Ok(chunk) => chunk,
            Err(err) => return Frame::Error(format!("malformed ERNIE stream frame: {err}")),
        };

        if let Some(code) = chunk.error_code.filter(|code| *code != 0) {
            return Frame::Error(describe_baidu_error(code, chunk.error_msg.as_deref()));
        }

        // ERNIE does not report a role per chunk.
        let message = chunk
            .result
            .filter(|result| !result.is_empty())
            .map(|result| Message::new(result, ""));

        match chunk.finish_reason.as_deref() {
            Some(reason) if reason != CONTINUE_REASON => Frame::Finish {
                message,
                reason: reason.to_string(),
            },
            _ if chunk.is_end == Some(true) => Frame::Finish {
                message,
                reason: STOP.to_string(),
            },
            _ => message.map_or(Frame::Skip, Frame::Message),
        }
    }
}
