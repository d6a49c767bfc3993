use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::session::SessionOutcome;
use crate::sink::CallbackSink;
use crate::types::{StreamEvent, Usage};

struct ChatEventStreamInner {
    sender: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<StreamEvent>>,
    outcome: watch::Sender<Option<SessionOutcome>>,
    cancel: CancellationToken,
}

/// Pull-based view of a spawned session.
///
/// Clones share the same queue, so each event is observed by exactly one reader.
pub struct ChatEventStream {
    inner: Arc<ChatEventStreamInner>,
}

impl Clone for ChatEventStream {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ChatEventStream {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(ChatEventStreamInner {
                sender: Mutex::new(Some(sender)),
                receiver: AsyncMutex::new(receiver),
                outcome,
                cancel,
            }),
        }
    }

    pub(crate) fn push(&self, event: StreamEvent) {
        let guard = self.inner.sender.lock().expect("sender mutex poisoned");
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Records the outcome and closes the queue; later calls are ignored.
    pub(crate) fn finish(&self, outcome: SessionOutcome) {
        self.inner.sender.lock().expect("sender mutex poisoned").take();
        self.inner.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    pub(crate) fn sink(&self) -> ChatEventSink {
        ChatEventSink {
            stream: self.clone(),
        }
    }

    /// Next event, or `None` once the terminal event has been consumed.
    pub async fn next(&self) -> Option<StreamEvent> {
        self.inner.receiver.lock().await.recv().await
    }

    /// Waits for the session to end.
    pub async fn result(&self) -> SessionOutcome {
        let mut outcome = self.inner.outcome.subscribe();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or_else(SessionOutcome::closed),
            Err(_) => SessionOutcome::closed(),
        };
        result
    }

    /// Requests cancellation; the stream ends with `Aborted` unless already terminal.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        futures_util::stream::unfold(self, |stream| async move {
            let event = stream.next().await?;
            Some((event, stream))
        })
    }
}

/// Adapts a [`ChatEventStream`] into the callback interface the session drives.
pub(crate) struct ChatEventSink {
    stream: ChatEventStream,
}

impl CallbackSink for ChatEventSink {
    fn on_token(&mut self, text: &str) {
        self.stream.push(StreamEvent::Token {
            text: text.to_string(),
        });
    }

    fn on_reasoning_token(&mut self, text: &str) {
        self.stream.push(StreamEvent::ReasoningToken {
            text: text.to_string(),
        });
    }

    fn on_usage(&mut self, usage: Usage) {
        self.stream.push(StreamEvent::UsageUpdate { usage });
    }

    fn on_complete(&mut self, content: &str, thinking: Option<&str>, usage: Usage) {
        self.stream.push(StreamEvent::Completed {
            content: content.to_string(),
            thinking: thinking.map(str::to_string),
            usage,
        });
    }

    fn on_error(&mut self, message: &str) {
        self.stream.push(StreamEvent::Failed {
            message: message.to_string(),
        });
    }

    fn on_abort(&mut self) {
        self.stream.push(StreamEvent::Aborted);
    }
}
