//! Request/callback types and the loop that feeds decoded frames to the caller.
//!
//! Every `send_message` call ends up in [`deliver`], which owns the caller's sink behind
//! a [`Delivery`] guard. The guard lets at most one terminal callback through, so an
//! engine cannot double-report even if several failure paths fire.

use std::future::Future;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::http::HttpBodyStream;
use crate::stream::StreamDecoder;

/// Finish reason reported when the provider ends the stream with a non-JSON sentinel or
/// simply closes the connection.
pub const STOP: &str = "stop";

/// One streamed chunk of assistant output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    /// Role reported by the provider; empty when the provider does not send one.
    pub role: String,
}

impl Message {
    pub fn new(content: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: role.into(),
        }
    }
}

/// Receives the output of one `send_message` call.
///
/// `on_message` runs zero or more times, then exactly one of `on_finished` or `on_error`.
/// The next frame is not read until `on_message` returns, so a slow sink applies
/// backpressure to the network stream.
#[async_trait]
pub trait MessageSink: Send {
    async fn on_message(&mut self, message: Message);

    async fn on_finished(&mut self, reason: String);

    async fn on_error(&mut self, message: String);
}

/// Event form of the sink callbacks, produced by [`MessageRequest::channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Message(Message),
    Finished(String),
    Error(String),
}

/// Sink that forwards every callback into a bounded channel.
///
/// A dropped receiver is not an error; the remaining callbacks are discarded.
pub struct ChannelSink {
    tx: mpsc::Sender<MessageEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<MessageEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn on_message(&mut self, message: Message) {
        let _ = self.tx.send(MessageEvent::Message(message)).await;
    }

    async fn on_finished(&mut self, reason: String) {
        let _ = self.tx.send(MessageEvent::Finished(reason)).await;
    }

    async fn on_error(&mut self, message: String) {
        let _ = self.tx.send(MessageEvent::Error(message)).await;
    }
}

/// A single prompt plus the callbacks that receive its streamed answer.
pub struct MessageRequest {
    /// System prompt describing the assistant's role.
    pub role_prompt: String,
    /// User prompt carrying the actual command.
    pub command_prompt: String,
    /// Cancels the request; the network stream is dropped once this fires.
    pub signal: CancellationToken,
    pub sink: Box<dyn MessageSink>,
}

impl MessageRequest {
    pub fn new(
        role_prompt: impl Into<String>,
        command_prompt: impl Into<String>,
        sink: impl MessageSink + 'static,
    ) -> Self {
        Self {
            role_prompt: role_prompt.into(),
            command_prompt: command_prompt.into(),
            signal: CancellationToken::new(),
            sink: Box::new(sink),
        }
    }

    /// Builds a request whose callbacks are delivered as [`MessageEvent`]s.
    ///
    /// `capacity` bounds how many undelivered events may queue before the stream is
    /// paused.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_engine::delivery::MessageRequest;
    ///
    /// let (request, _events) = MessageRequest::channel("translate", "hello", 16);
    /// assert_eq!(request.command_prompt, "hello");
    /// ```
    pub fn channel(
        role_prompt: impl Into<String>,
        command_prompt: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<MessageEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self::new(role_prompt, command_prompt, ChannelSink::new(tx)),
            rx,
        )
    }

    /// Replaces the cancellation token, typically with a child of a caller-owned token.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }
}

/// Wraps a sink and lets at most one terminal callback through.
pub struct Delivery {
    sink: Box<dyn MessageSink>,
    done: bool,
}

impl Delivery {
    pub fn new(sink: Box<dyn MessageSink>) -> Self {
        Self { sink, done: false }
    }

    /// Whether a terminal callback already fired or the request was aborted.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub async fn message(&mut self, message: Message) {
        if !self.done {
            self.sink.on_message(message).await;
        }
    }

    pub async fn finish(&mut self, reason: impl Into<String>) {
        if !self.done {
            self.done = true;
            self.sink.on_finished(reason.into()).await;
        }
    }

    pub async fn fail(&mut self, message: impl Into<String>) {
        if !self.done {
            self.done = true;
            self.sink.on_error(message.into()).await;
        }
    }

    /// Silences every later callback without reporting anything.
    pub fn abort(&mut self) {
        self.done = true;
    }
}

/// What one decoded SSE payload means to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Content to forward through `on_message`.
    Message(Message),
    /// Nothing to forward, such as a role-only or empty delta.
    Skip,
    /// The provider ended the stream. Any trailing content is delivered before the
    /// reason.
    Finish {
        message: Option<Message>,
        reason: String,
    },
    /// The provider reported a failure inside the stream.
    Error(String),
}

/// Provider-specific interpretation of a JSON payload.
pub trait FrameInterpreter: Send + Sync {
    fn interpret(&self, payload: Value) -> Frame;
}

/// Runs one request to completion: waits for `opened`, then decodes and delivers frames.
///
/// Failures from `opened` become `on_error`. Cancellation at any await point drops the
/// stream and silences the sink. Exactly one terminal callback fires otherwise.
pub async fn deliver<F>(
    opened: F,
    sink: Box<dyn MessageSink>,
    signal: &CancellationToken,
    provider: &'static str,
    interpreter: &dyn FrameInterpreter,
) where
    F: Future<Output = Result<HttpBodyStream, EngineError>>,
{
    let mut delivery = Delivery::new(sink);

    let opened = tokio::select! {
        biased;
        _ = signal.cancelled() => {
            debug!(provider, "request cancelled before the stream opened");
            delivery.abort();
            return;
        }
        opened = opened => opened,
    };

    match opened {
        Ok(body) => {
            let decoder = StreamDecoder::new(body, provider);
            drive(decoder, interpreter, &mut delivery, signal, provider).await;
        }
        Err(err) => {
            warn!(provider, error = %err, "request failed before streaming");
            delivery.fail(err.to_string()).await;
        }
    }
}

/// Pulls frames from `decoder` until a terminal condition, cancellation, or close.
pub async fn drive(
    mut decoder: StreamDecoder,
    interpreter: &dyn FrameInterpreter,
    delivery: &mut Delivery,
    signal: &CancellationToken,
    provider: &'static str,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = signal.cancelled() => None,
            next = decoder.next() => Some(next),
        };

        // Re-check after the read: a cancel raised during the last `on_message` wins.
        let Some(next) = next.filter(|_| !signal.is_cancelled()) else {
            debug!(provider, "stream aborted by caller");
            delivery.abort();
            return;
        };

        let payload = match next {
            None => {
                debug!(provider, "stream closed without a finish frame");
                delivery.finish(STOP).await;
                return;
            }
            Some(Err(err)) => {
                warn!(provider, error = %err, "stream failed");
                delivery.fail(err.to_string()).await;
                return;
            }
            Some(Ok(payload)) => payload,
        };

        let Ok(value) = serde_json::from_str::<Value>(&payload) else {
            debug!(provider, "non-JSON sentinel ends the stream");
            delivery.finish(STOP).await;
            return;
        };

        match interpreter.interpret(value) {
            Frame::Message(message) => delivery.message(message).await,
            Frame::Skip => {}
            Frame::Finish { message, reason } => {
                if let Some(message) = message {
                    delivery.message(message).await;
                    if signal.is_cancelled() {
                        debug!(provider, "stream aborted by caller after the final chunk");
                        delivery.abort();
                        return;
                    }
                }
                debug!(provider, %reason, "provider finished the stream");
                delivery.finish(reason).await;
                return;
            }
            Frame::Error(message) => {
                warn!(provider, %message, "provider reported an error frame");
                delivery.fail(message).await;
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use futures_util::stream;
    use serde_json::json;

    use super::*;

    /// Sink that records every callback into a shared log.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Arc<Mutex<Vec<MessageEvent>>>,
    }

    impl RecordingSink {
        pub(crate) fn events(&self) -> Vec<MessageEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn on_message(&mut self, message: Message) {
            self.events.lock().unwrap().push(MessageEvent::Message(message));
        }

        async fn on_finished(&mut self, reason: String) {
            self.events.lock().unwrap().push(MessageEvent::Finished(reason));
        }

        async fn on_error(&mut self, message: String) {
            self.events.lock().unwrap().push(MessageEvent::Error(message));
        }
    }

    /// Interprets `{"text": .., "finish": ..}` with `"go"` as the continue value.
    struct TestFrames;

    impl FrameInterpreter for TestFrames {
        fn interpret(&self, payload: Value) -> Frame {
            if let Some(message) = payload.get("fail").and_then(Value::as_str) {
                return Frame::Error(message.to_string());
            }
            let text = payload
                .get("text")
                .and_then(Value::as_str)
                .map(|text| Message::new(text, ""));
            match payload.get("finish").and_then(Value::as_str) {
                Some(reason) if reason != "go" => Frame::Finish {
                    message: text,
                    reason: reason.to_string(),
                },
                _ => text.map_or(Frame::Skip, Frame::Message),
            }
        }
    }

    fn body(chunks: Vec<Result<Vec<u8>, EngineError>>) -> HttpBodyStream {
        Box::pin(stream::iter(chunks))
    }

    async fn run(chunks: Vec<Result<Vec<u8>, EngineError>>) -> Vec<MessageEvent> {
        let sink = RecordingSink::default();
        let signal = CancellationToken::new();
        deliver(
            async move { Ok(body(chunks)) },
            Box::new(sink.clone()),
            &signal,
            "test",
            &TestFrames,
        )
        .await;
        sink.events()
    }

    fn text(content: &str) -> MessageEvent {
        MessageEvent::Message(Message::new(content, ""))
    }

    #[tokio::test]
    async fn non_json_sentinel_finishes_with_stop() {
        let events = run(vec![
            Ok(b"data: {\"text\":\"a\",\"finish\":\"go\"}\n\n".to_vec()),
            Ok(b"data: {\"text\":\"b\",\"finish\":\"go\"}\n\n".to_vec()),
            Ok(b"data: [DONE]\n\n".to_vec()),
            Ok(b"data: {\"text\":\"late\"}\n\n".to_vec()),
        ])
        .await;
        assert_eq!(
            events,
            vec![text("a"), text("b"), MessageEvent::Finished(STOP.into())]
        );
    }

    #[tokio::test]
    async fn finish_reason_is_reported_verbatim() {
        let events = run(vec![
            Ok(b"data: {\"text\":\"a\"}\n\n".to_vec()),
            Ok(b"data: {\"text\":\"tail\",\"finish\":\"content_filter\"}\n\n".to_vec()),
            Ok(b"data: {\"text\":\"ignored\"}\n\n".to_vec()),
        ])
        .await;
        assert_eq!(
            events,
            vec![
                text("a"),
                text("tail"),
                MessageEvent::Finished("content_filter".into())
            ]
        );
    }

    #[tokio::test]
    async fn closed_stream_without_finish_reports_stop() {
        let events = run(vec![Ok(b"data: {\"text\":\"only\"}\n\n".to_vec())]).await;
        assert_eq!(events, vec![text("only"), MessageEvent::Finished(STOP.into())]);
    }

    #[tokio::test]
    async fn mid_stream_failure_reports_one_error() {
        let events = run(vec![
            Ok(b"data: {\"text\":\"a\"}\n\n".to_vec()),
            Err(EngineError::transport("reset by peer")),
        ])
        .await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            MessageEvent::Error(message) => assert!(message.contains("reset by peer")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_frames_report_the_provider_message() {
        let events = run(vec![Ok(b"data: {\"fail\":\"quota\"}\n\n".to_vec())]).await;
        assert_eq!(events, vec![MessageEvent::Error("quota".into())]);
    }

    #[tokio::test]
    async fn open_failures_report_the_error_display() {
        let sink = RecordingSink::default();
        let signal = CancellationToken::new();
        deliver(
            async { Err(EngineError::auth("bad secret")) },
            Box::new(sink.clone()),
            &signal,
            "test",
            &TestFrames,
        )
        .await;
        assert_eq!(
            sink.events(),
            vec![MessageEvent::Error("auth failure: bad secret".into())]
        );
    }

    #[tokio::test]
    async fn cancelled_before_open_is_silent() {
        let sink = RecordingSink::default();
        let signal = CancellationToken::new();
        signal.cancel();
        deliver(
            std::future::pending::<Result<HttpBodyStream, EngineError>>(),
            Box::new(sink.clone()),
            &signal,
            "test",
            &TestFrames,
        )
        .await;
        assert!(sink.events().is_empty());
    }

    /// Sink that cancels the request from inside the first `on_message`.
    struct CancelOnFirst {
        inner: RecordingSink,
        signal: CancellationToken,
    }

    #[async_trait]
    impl MessageSink for CancelOnFirst {
        async fn on_message(&mut self, message: Message) {
            self.inner.on_message(message).await;
            self.signal.cancel();
        }

        async fn on_finished(&mut self, reason: String) {
            self.inner.on_finished(reason).await;
        }

        async fn on_error(&mut self, message: String) {
            self.inner.on_error(message).await;
        }
    }

    #[tokio::test]
    async fn cancellation_after_first_chunk_stops_delivery() {
        let recorder = RecordingSink::default();
        let signal = CancellationToken::new();
        let sink = CancelOnFirst {
            inner: recorder.clone(),
            signal: signal.clone(),
        };
        let chunks = vec![
            Ok(b"data: {\"text\":\"first\"}\n\n".to_vec()),
            Ok(b"data: {\"text\":\"second\"}\n\n".to_vec()),
            Ok(b"data: {\"text\":\"third\",\"finish\":\"stop\"}\n\n".to_vec()),
        ];
        deliver(
            async move { Ok(body(chunks)) },
            Box::new(sink),
            &signal,
            "test",
            &TestFrames,
        )
        .await;
        assert_eq!(recorder.events(), vec![text("first")]);
    }

    #[tokio::test]
    async fn cancellation_inside_final_chunk_suppresses_finish() {
        let recorder = RecordingSink::default();
        let signal = CancellationToken::new();
        let sink = CancelOnFirst {
            inner: recorder.clone(),
            signal: signal.clone(),
        };
        let chunks = vec![Ok(b"data: {\"text\":\"tail\",\"finish\":\"stop\"}\n\n".to_vec())];
        deliver(
            async move { Ok(body(chunks)) },
            Box::new(sink),
            &signal,
            "test",
            &TestFrames,
        )
        .await;
        assert_eq!(recorder.events(), vec![text("tail")]);
    }

    #[tokio::test]
    async fn delivery_guard_allows_one_terminal() {
        let sink = RecordingSink::default();
        let mut delivery = Delivery::new(Box::new(sink.clone()));
        delivery.message(Message::new("x", "")).await;
        delivery.finish("stop").await;
        delivery.fail("late failure").await;
        delivery.finish("again").await;
        delivery.message(Message::new("y", "")).await;
        assert!(delivery.is_done());
        assert_eq!(
            sink.events(),
            vec![text("x"), MessageEvent::Finished("stop".into())]
        );
    }

    #[tokio::test]
    async fn channel_requests_forward_events_in_order() {
        let (request, mut events) = MessageRequest::channel("translate", "hello", 4);
        let MessageRequest { signal, sink, .. } = request;
        let frames = json!({"text": "hola", "finish": "done"}).to_string();
        let chunk = format!("data: {frames}\n\n").into_bytes();
        deliver(async move { Ok(body(vec![Ok(chunk)])) }, sink, &signal, "test", &TestFrames).await;

        assert_eq!(events.recv().await, Some(text("hola")));
        assert_eq!(
            events.recv().await,
            Some(MessageEvent::Finished("done".into()))
        );
        assert_eq!(events.recv().await, None);
    }
}
