use serde_json::Value;

use crate::error::AdapterError;
use crate::files::ResolvedFile;
use crate::reasoning::ReasoningFragment;
use crate::types::{ChatRequest, ProviderDescriptor, ProviderKind};

mod anthropic;
pub(crate) mod common;
mod gemini;
mod openai_compat;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai_compat::{OpenAICompatibleAdapter, OpenAIPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAICompatible,
    Anthropic,
    Gemini,
}

/// Fully built outbound HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// URL with any `key=` query credential masked, for logging.
    pub fn redacted_url(&self) -> String {
        match self.url.split_once('?') {
            Some((path, query)) => {
                let masked = query
                    .split('&')
                    .map(|pair| {
                        if pair.starts_with("key=") {
                            "key=***"
                        } else {
                            pair
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{path}?{masked}")
            }
            None => self.url.clone(),
        }
    }
}

/// One decoded fact from a vendor frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Token(String),
    ReasoningToken(String),
    Usage {
        input: Option<u64>,
        output: Option<u64>,
    },
    /// Non-incremental reasoning text, used only when no reasoning tokens arrived.
    ReasoningDetail(String),
    ProviderError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    #[default]
    Text,
    Thinking,
    Other,
}

/// Per-stream decoding state shared by all adapters.
#[derive(Debug, Clone, Default)]
pub struct FrameState {
    pub current_block: BlockKind,
}

pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    fn build_request(
        &self,
        request: &ChatRequest,
        api_key: &str,
        files: &[ResolvedFile],
        reasoning: &ReasoningFragment,
    ) -> Result<PreparedRequest, AdapterError>;

    fn parse_frame(&self, frame: &Value, state: &mut FrameState) -> Vec<FrameEvent>;
}

pub fn adapter_for(descriptor: &ProviderDescriptor) -> Box<dyn ProviderAdapter> {
    match descriptor.kind {
        ProviderKind::OpenAICompatible => {
            Box::new(OpenAICompatibleAdapter::new(OpenAIPolicy::Standard))
        }
        ProviderKind::OpenRouter => Box::new(OpenAICompatibleAdapter::new(
            OpenAIPolicy::open_router(descriptor.referer.clone(), descriptor.title.clone()),
        )),
        ProviderKind::CustomGateway => {
            Box::new(OpenAICompatibleAdapter::new(OpenAIPolicy::CustomGateway))
        }
        ProviderKind::Anthropic => Box::new(AnthropicAdapter),
        ProviderKind::Gemini => Box::new(GeminiAdapter),
    }
}
