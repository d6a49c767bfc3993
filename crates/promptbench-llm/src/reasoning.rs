//! Translation of the uniform reasoning effort knob into vendor request fields.
//!
//! The ratio and range constants are a conservative heuristic shared by the whole
//! workbench. They are not vendor-published values and must stay as they are.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::types::{ProviderKind, ReasoningConfig, ReasoningEffort};

const GEMINI_PRO_MIN_BUDGET: f64 = 128.0;
const GEMINI_PRO_MAX_BUDGET: f64 = 32_768.0;
const GEMINI_FLEX_MIN_BUDGET: f64 = 0.0;
const GEMINI_FLEX_MAX_BUDGET: f64 = 24_576.0;
const ANTHROPIC_MIN_BUDGET: f64 = 1_024.0;
const ANTHROPIC_MAX_BUDGET: f64 = 64_000.0;

const OPENAI_REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];
const ANTHROPIC_THINKING_MARKERS: &[&str] =
    &["claude-3-7", "claude-3.7", "sonnet-4", "opus-4", "claude-4"];
const GATEWAY_REASONING_MARKERS: &[&str] = &[
    "gemini-2.5",
    "gemini-3",
    "qwen3",
    "qwq",
    "deepseek-r",
    "thinking",
    "reasoning",
];

/// Vendor-specific JSON object merged into the outbound request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReasoningFragment(Map<String, Value>);

impl ReasoningFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Thinking budget requested from Anthropic, if any.
    pub fn anthropic_budget(&self) -> Option<u64> {
        self.0
            .get("thinking")
            .and_then(|thinking| thinking.get("budget_tokens"))
            .and_then(Value::as_u64)
    }

    /// Deep-merges the fragment into `body`, objects merging key by key.
    pub fn merge_into(&self, body: &mut Value) {
        merge_value(body, &self.to_value());
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_value(existing, value)
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

pub fn map_reasoning_parameters(
    kind: ProviderKind,
    model: &str,
    reasoning: &ReasoningConfig,
) -> ReasoningFragment {
    let effort = reasoning.requested_effort();
    let Some(ratio) = effort_ratio(effort) else {
        return ReasoningFragment::empty();
    };
    let model = normalized_model_name(model);

    let fragment = match kind {
        ProviderKind::OpenRouter => Some(json!({ "reasoning": { "effort": effort.as_str() } })),
        ProviderKind::Gemini => gemini_budget_range(&model).map(|(min, max)| {
            json!({
                "generationConfig": {
                    "thinkingConfig": {
                        "thinkingBudget": scaled_budget(min, max, ratio),
                        "includeThoughts": true,
                    }
                }
            })
        }),
        ProviderKind::OpenAICompatible => is_openai_reasoning_model(&model)
            .then(|| json!({ "reasoning_effort": effort.as_str() })),
        ProviderKind::Anthropic => is_anthropic_thinking_model(&model).then(|| {
            json!({
                "thinking": {
                    "type": "enabled",
                    "budget_tokens":
                        scaled_budget(ANTHROPIC_MIN_BUDGET, ANTHROPIC_MAX_BUDGET, ratio),
                }
            })
        }),
        ProviderKind::CustomGateway => is_gateway_reasoning_model(&model)
            .then(|| json!({ "reasoning": { "effort": effort.as_str() } })),
    };

    fragment
        .map(ReasoningFragment::from_value)
        .unwrap_or_default()
}

/// `None` means "do not request extra reasoning".
fn effort_ratio(effort: ReasoningEffort) -> Option<f64> {
    match effort {
        ReasoningEffort::Low => Some(0.05),
        ReasoningEffort::Medium => Some(0.5),
        ReasoningEffort::High => Some(0.8),
        ReasoningEffort::None | ReasoningEffort::Default => None,
    }
}

fn scaled_budget(min: f64, max: f64, ratio: f64) -> u64 {
    (min + (max - min) * ratio).round() as u64
}

pub(crate) fn normalized_model_name(model: &str) -> String {
    let lowered = model.trim().to_ascii_lowercase();
    match lowered.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => lowered,
    }
}

fn gemini_budget_range(model: &str) -> Option<(f64, f64)> {
    if is_gemini_pro_thinking_model(model) {
        return Some((GEMINI_PRO_MIN_BUDGET, GEMINI_PRO_MAX_BUDGET));
    }
    let flexible = model.contains("gemini-2.")
        || model.contains("gemini-3")
        || model.contains("flash-thinking");
    flexible.then_some((GEMINI_FLEX_MIN_BUDGET, GEMINI_FLEX_MAX_BUDGET))
}

fn is_gemini_pro_thinking_model(model: &str) -> bool {
    (model.contains("gemini-2.5") || model.contains("gemini-3")) && model.contains("-pro")
}

pub(crate) fn is_openai_reasoning_model(model: &str) -> bool {
    let model = normalized_model_name(model);
    OPENAI_REASONING_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

fn is_anthropic_thinking_model(model: &str) -> bool {
    ANTHROPIC_THINKING_MARKERS
        .iter()
        .any(|marker| model.contains(marker))
}

fn is_gateway_reasoning_model(model: &str) -> bool {
    GATEWAY_REASONING_MARKERS
        .iter()
        .any(|marker| model.contains(marker))
}
