//! Streaming chat adapter over OpenAI-compatible, Anthropic, Gemini, OpenRouter and
//! custom gateway backends, with one normalized event vocabulary.

mod decoder;
mod error;
mod event_stream;
mod files;
mod providers;
mod reasoning;
mod session;
mod sink;
mod sse;
mod thinking;
mod types;
mod validation;

pub use decoder::{DecodedEvent, StreamFrameDecoder};
pub use error::{AdapterError, AdapterErrorCode};
pub use event_stream::ChatEventStream;
pub use files::{encode_base64, resolve_files, FileKind, FileResolver, ResolvedFile};
pub use providers::{
    adapter_for, AnthropicAdapter, BlockKind, FrameEvent, FrameState, GeminiAdapter,
    OpenAICompatibleAdapter, OpenAIPolicy, PreparedRequest, ProviderAdapter, ProviderFamily,
};
pub use reasoning::{map_reasoning_parameters, ReasoningFragment};
pub use session::{complete, SessionOptions, SessionOutcome, SessionState, StreamSession};
pub use sink::{CallbackSink, RecordingSink};
pub use sse::{SseLine, SseLineBuffer};
pub use thinking::{extract_thinking, ExtractedThinking};
pub use types::{
    ChatMessage, ChatRequest, Completion, FilePayload, FileReference, ModelParameters,
    ProviderDescriptor, ProviderKind, ReasoningConfig, ReasoningEffort, ResponseFormat, Role,
    StreamEvent, Usage,
};
pub use validation::{compile_response_schema, validate_structured_output};
