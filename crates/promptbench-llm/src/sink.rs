use crate::types::{StreamEvent, Usage};

/// Receiver of a session's events.
///
/// Exactly one of `on_complete`, `on_error` and `on_abort` is called, once, as the
/// last callback of a session.
pub trait CallbackSink: Send {
    fn on_token(&mut self, text: &str);

    fn on_reasoning_token(&mut self, _text: &str) {}

    fn on_usage(&mut self, _usage: Usage) {}

    fn on_complete(&mut self, content: &str, thinking: Option<&str>, usage: Usage);

    fn on_error(&mut self, message: &str);

    fn on_abort(&mut self);

    fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Token { text } => self.on_token(&text),
            StreamEvent::ReasoningToken { text } => self.on_reasoning_token(&text),
            StreamEvent::UsageUpdate { usage } => self.on_usage(usage),
            StreamEvent::Completed {
                content,
                thinking,
                usage,
            } => self.on_complete(&content, thinking.as_deref(), usage),
            StreamEvent::Aborted => self.on_abort(),
            StreamEvent::Failed { message } => self.on_error(&message),
        }
    }
}

/// Sink that keeps every event in arrival order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<StreamEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reasoning(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ReasoningToken { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_events(&self) -> Vec<&StreamEvent> {
        self.events.iter().filter(|event| event.is_terminal()).collect()
    }
}

impl CallbackSink for RecordingSink {
    fn on_token(&mut self, text: &str) {
        self.events.push(StreamEvent::Token {
            text: text.to_string(),
        });
    }

    fn on_reasoning_token(&mut self, text: &str) {
        self.events.push(StreamEvent::ReasoningToken {
            text: text.to_string(),
        });
    }

    fn on_usage(&mut self, usage: Usage) {
        self.events.push(StreamEvent::UsageUpdate { usage });
    }

    fn on_complete(&mut self, content: &str, thinking: Option<&str>, usage: Usage) {
        self.events.push(StreamEvent::Completed {
            content: content.to_string(),
            thinking: thinking.map(str::to_string),
            usage,
        });
    }

    fn on_error(&mut self, message: &str) {
        self.events.push(StreamEvent::Failed {
            message: message.to_string(),
        });
    }

    fn on_abort(&mut self) {
        self.events.push(StreamEvent::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_routes_events_to_callbacks() {
        let mut sink = RecordingSink::new();
        let events = vec![
            StreamEvent::ReasoningToken {
                text: "hmm".to_string(),
            },
            StreamEvent::Token {
                text: "a".to_string(),
            },
            StreamEvent::Token {
                text: "b".to_string(),
            },
            StreamEvent::Completed {
                content: "ab".to_string(),
                thinking: Some("hmm".to_string()),
                usage: Usage::default(),
            },
        ];
        for event in events.clone() {
            sink.dispatch(event);
        }
        assert_eq!(sink.events, events);
        assert_eq!(sink.tokens(), "ab");
        assert_eq!(sink.reasoning(), "hmm");
        assert_eq!(sink.terminal_events().len(), 1);
    }
}
