use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::EngineError;
use crate::http::HttpBodyStream;

/// Incremental SSE parser: bytes in, complete `data:` payloads out.
#[derive(Debug, Default)]
struct SseFramer {
    /// Bytes of the line that has not seen its `\n` yet.
    partial: Vec<u8>,
    /// `data:` value of the event being assembled.
    data: Option<Vec<u8>>,
}

impl SseFramer {
    fn push(&mut self, mut bytes: &[u8], out: &mut VecDeque<Vec<u8>>) {
        while let Some(pos) = bytes.iter().position(|b| *b == b'\n') {
            self.partial.extend_from_slice(&bytes[..pos]);
            let line = mem::take(&mut self.partial);
            self.line(line, out);
            bytes = &bytes[pos + 1..];
        }
        self.partial.extend_from_slice(bytes);
    }

    /// Treats whatever is buffered as if a blank line had followed it.
    fn finish(&mut self, out: &mut VecDeque<Vec<u8>>) {
        if !self.partial.is_empty() {
            let line = mem::take(&mut self.partial);
            self.line(line, out);
        }
        self.dispatch(out);
    }

    fn line(&mut self, mut line: Vec<u8>, out: &mut VecDeque<Vec<u8>>) {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
        let Some(value) = line.strip_prefix(b"data:") else {
            return;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        match &mut self.data {
            Some(data) => {
                data.push(b'\n');
                data.extend_from_slice(value);
            }
            None => self.data = Some(value.to_vec()),
        }
    }

    fn dispatch(&mut self, out: &mut VecDeque<Vec<u8>>) {
        if let Some(data) = self.data.take().filter(|data| !data.is_empty()) {
            out.push_back(data);
        }
    }
}

/// Splits an SSE byte stream into complete `data:` payloads.
///
/// A payload is emitted only once its terminating blank line has arrived, so a frame
/// split across any number of network reads decodes exactly like the unsplit frame.
/// Multi-line `data:` fields are joined with `\n`. A pending frame with no trailing
/// blank line is flushed when the body closes.
///
/// The decoder is fused: after the body ends or any error is yielded it returns `None`.
pub struct StreamDecoder {
    body: HttpBodyStream,
    framer: SseFramer,
    ready: VecDeque<Vec<u8>>,
    provider: &'static str,
    done: bool,
}

impl StreamDecoder {
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            framer: SseFramer::default(),
            ready: VecDeque::new(),
            provider,
            done: false,
        }
    }

    fn fail(&mut self, err: EngineError) -> Result<String, EngineError> {
        self.done = true;
        self.ready.clear();
        Err(err)
    }

    fn decode(&mut self, payload: Vec<u8>) -> Result<String, EngineError> {
        String::from_utf8(payload).or_else(|err| {
            let provider = self.provider;
            self.fail(EngineError::stream(format!(
                "{provider}: invalid UTF-8 in stream chunk: {err}"
            )))
        })
    }
}

impl Stream for StreamDecoder {
    type Item = Result<String, EngineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(payload) = this.ready.pop_front() {
                return Poll::Ready(Some(this.decode(payload)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => this.framer.push(&bytes, &mut this.ready),
                Some(Err(err)) => {
                    let err = match err {
                        EngineError::Stream { .. } => err,
                        other => EngineError::stream(other.to_string()),
                    };
                    return Poll::Ready(Some(this.fail(err)));
                }
                None => {
                    this.done = true;
                    this.framer.finish(&mut this.ready);
                }
            }
        }
    }
}

/// Drains a body that turned out not to be an event stream, such as an error document.
pub(crate) async fn collect_body_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, EngineError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes)
        .map_err(|err| EngineError::stream(format!("{provider}: failed to decode body: {err}")))
}
