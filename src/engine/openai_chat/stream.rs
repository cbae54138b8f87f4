use serde_json::Value;

use crate::delivery::{Frame, FrameInterpreter, Message};
use crate::normalize::{RawError, normalize};

use super::types::OpenAiStreamChunk;

/// Maps Chat Completions chunks onto delivery frames.
///
/// Only the first choice is forwarded. A `null` finish reason means "keep going"; the
/// `[DONE]` sentinel is not JSON and is handled by the delivery loop.
pub(crate) struct OpenAiFrames;

impl FrameInterpreter for OpenAiFrames {
    fn interpret(&self, payload: Value) -> Frame {
        let chunk: OpenAiStreamChunk = match serde_json::from_value(payload) {
            Ok(chunk) => chunk,
            Err(err) => return Frame::Error(format!("malformed chat completion chunk: {err}")),
        };

        if let Some(error) = chunk.error {
            let wrapped = serde_json::json!({ "error": error });
            return Frame::Error(normalize(RawError::Json(&wrapped)));
        }

        let Some(choice) = chunk.choices.into_iter().find(|choice| choice.index == 0) else {
            // Usage-only trailer.
            return Frame::Skip;
        };

        let delta = choice.delta.unwrap_or_default();
        let message = delta
            .content
            .filter(|content| !content.is_empty())
            .map(|content| Message::new(content, delta.role.unwrap_or_default()));

        match choice.finish_reason {
            Some(reason) => Frame::Finish { message, reason },
            None => message.map_or(Frame::Skip, Frame::Message),
        }
    }
}
