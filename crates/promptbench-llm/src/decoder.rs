//! Turns raw response-body chunks into normalized stream events.

use serde_json::Value;
use tracing::trace;

use crate::providers::{FrameEvent, FrameState, ProviderAdapter};
use crate::sse::{SseLine, SseLineBuffer};
use crate::types::Usage;

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Token(String),
    ReasoningToken(String),
    /// Running usage totals after a vendor usage report.
    Usage(Usage),
    ProviderError(String),
}

pub struct StreamFrameDecoder<'a> {
    adapter: &'a dyn ProviderAdapter,
    lines: SseLineBuffer,
    state: FrameState,
    usage: Usage,
    reasoning_details: String,
    done: bool,
}

impl<'a> StreamFrameDecoder<'a> {
    pub fn new(adapter: &'a dyn ProviderAdapter) -> Self {
        Self {
            adapter,
            lines: SseLineBuffer::new(),
            state: FrameState::default(),
            usage: Usage::default(),
            reasoning_details: String::new(),
            done: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedEvent> {
        let lines = self.lines.push(chunk);
        self.decode_lines(lines)
    }

    /// Decodes whatever is left in the line buffer once the body has ended.
    pub fn finish(&mut self) -> Vec<DecodedEvent> {
        if self.lines.has_pending() {
            trace!("flushing unterminated final stream line");
        }
        let lines = self.lines.finish();
        self.decode_lines(lines)
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Reasoning delivered as whole `reasoning_details` entries rather than deltas.
    pub fn reasoning_details(&self) -> Option<&str> {
        (!self.reasoning_details.is_empty()).then_some(self.reasoning_details.as_str())
    }

    pub fn saw_done(&self) -> bool {
        self.done
    }

    fn decode_lines(&mut self, lines: Vec<SseLine>) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        for line in lines {
            let data = match line {
                SseLine::Done => {
                    self.done = true;
                    continue;
                }
                SseLine::Data(data) => data,
            };
            let frame: Value = match serde_json::from_str(&data) {
                Ok(frame) => frame,
                Err(error) => {
                    trace!(%error, frame = %data, "skipping malformed stream frame");
                    continue;
                }
            };
            for event in self.adapter.parse_frame(&frame, &mut self.state) {
                match event {
                    FrameEvent::Token(text) => events.push(DecodedEvent::Token(text)),
                    FrameEvent::ReasoningToken(text) => {
                        events.push(DecodedEvent::ReasoningToken(text))
                    }
                    FrameEvent::Usage { input, output } => {
                        if let Some(input) = input {
                            self.usage.input_tokens = input;
                        }
                        if let Some(output) = output {
                            self.usage.output_tokens = output;
                        }
                        events.push(DecodedEvent::Usage(self.usage));
                    }
                    FrameEvent::ReasoningDetail(text) => {
                        if !self.reasoning_details.is_empty() {
                            self.reasoning_details.push('\n');
                        }
                        self.reasoning_details.push_str(&text);
                    }
                    FrameEvent::ProviderError(message) => {
                        events.push(DecodedEvent::ProviderError(message))
                    }
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AnthropicAdapter, GeminiAdapter, OpenAICompatibleAdapter, OpenAIPolicy};

    fn tokens(events: &[DecodedEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                DecodedEvent::Token(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn frame_split_across_chunks_is_decoded_once() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let mut decoder = StreamFrameDecoder::new(&adapter);
        let mut events = decoder.push(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(events.is_empty());
        events.extend(decoder.push(
            b"tent\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
        ));
        events.extend(decoder.push(b"data: [DONE]\n"));
        assert_eq!(tokens(&events), "Hello");
        assert!(decoder.saw_done());
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let mut decoder = StreamFrameDecoder::new(&adapter);
        let events = decoder.push(
            b"data: {not json}\n: keep-alive\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(events, vec![DecodedEvent::Token("ok".to_string())]);
    }

    #[test]
    fn anthropic_usage_patches_accumulate() {
        let adapter = AnthropicAdapter;
        let mut decoder = StreamFrameDecoder::new(&adapter);
        let events = decoder.push(
            concat!(
                "event: message_start\n",
                "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":11}}}\n\n",
                "event: message_delta\n",
                "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":5}}\n\n",
            )
            .as_bytes(),
        );
        assert_eq!(
            events.last(),
            Some(&DecodedEvent::Usage(Usage {
                input_tokens: 11,
                output_tokens: 5
            }))
        );
        assert_eq!(decoder.usage().input_tokens, 11);
    }

    #[test]
    fn gemini_usage_reports_replace_previous_totals() {
        let adapter = GeminiAdapter;
        let mut decoder = StreamFrameDecoder::new(&adapter);
        decoder.push(
            b"data: {\"usageMetadata\":{\"promptTokenCount\":3,\"candidatesTokenCount\":1}}\r\n",
        );
        decoder.push(
            b"data: {\"usageMetadata\":{\"promptTokenCount\":3,\"candidatesTokenCount\":6,\"thoughtsTokenCount\":2}}",
        );
        let events = decoder.finish();
        assert_eq!(
            events,
            vec![DecodedEvent::Usage(Usage {
                input_tokens: 3,
                output_tokens: 8
            })]
        );
    }

    #[test]
    fn gemini_usage_without_output_counts_resets_output() {
        let adapter = GeminiAdapter;
        let mut decoder = StreamFrameDecoder::new(&adapter);
        decoder.push(
            b"data: {\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":7}}\n",
        );
        let events = decoder.push(b"data: {\"usageMetadata\":{\"promptTokenCount\":4}}\n");
        assert_eq!(
            events,
            vec![DecodedEvent::Usage(Usage {
                input_tokens: 4,
                output_tokens: 0
            })]
        );
        assert_eq!(decoder.usage().output_tokens, 0);
    }

    #[test]
    fn reasoning_details_are_buffered_not_emitted() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::open_router(None, None));
        let mut decoder = StreamFrameDecoder::new(&adapter);
        let events = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"4\",\"reasoning_details\":[{\"type\":\"reasoning.text\",\"text\":\"2+2\"}]}}]}\n",
        );
        assert_eq!(events, vec![DecodedEvent::Token("4".to_string())]);
        assert_eq!(decoder.reasoning_details(), Some("2+2"));
    }
}
