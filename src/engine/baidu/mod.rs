//! Baidu ERNIE chat over SSE with client-credentials auth.

mod engine;
mod error;
mod request;
mod stream;
mod types;

pub(crate) const NAME: &str = "baidu";

pub use engine::BaiduEngine;
