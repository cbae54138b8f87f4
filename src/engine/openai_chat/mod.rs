//! OpenAI-compatible Chat Completions over SSE with a bearer API key.

mod engine;
mod error;
mod stream;
mod types;

pub(crate) const NAME: &str = "openai_chat";

pub use engine::OpenAiChatEngine;
