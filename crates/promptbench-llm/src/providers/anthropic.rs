use serde_json::{json, Value};

use super::common::{
    join_endpoint, max_tokens_or_default, prepare_conversation, temperature_or_default,
    DEFAULT_MAX_TOKENS,
};
use super::{
    BlockKind, FrameEvent, FrameState, PreparedRequest, ProviderAdapter, ProviderFamily,
};
use crate::error::AdapterError;
use crate::files::{FileKind, ResolvedFile};
use crate::reasoning::ReasoningFragment;
use crate::types::{ChatRequest, ResponseFormat, Role};
use crate::validation::compile_response_schema;

const MESSAGES_PATH: &str = "v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_BETA: &str = "pdfs-2024-09-25,interleaved-thinking-2025-05-14";

pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        api_key: &str,
        files: &[ResolvedFile],
        reasoning: &ReasoningFragment,
    ) -> Result<PreparedRequest, AdapterError> {
        let conversation = prepare_conversation(&request.messages, files)?;
        let (system, messages, attachment_index) = conversation.split_leading_system();

        let converted = messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                // Anthropic only accepts user/assistant turns after the lifted system prompt.
                let role = match message.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::System => "user",
                };
                let content = if Some(index) == attachment_index
                    && !conversation.attachments.is_empty()
                {
                    content_blocks(&message.content, &conversation.attachments)
                } else {
                    Value::String(message.content.clone())
                };
                json!({ "role": role, "content": content })
            })
            .collect::<Vec<_>>();

        let parameters = &request.parameters;
        let mut max_tokens = u64::from(max_tokens_or_default(parameters));
        let mut body = json!({
            "model": request.model,
            "messages": converted,
            "stream": true,
        });

        let mut system_prompt = system.map(str::to_string);
        if let Some(format) = &request.response_format {
            let instruction = json_output_instruction(format)?;
            system_prompt = Some(match system_prompt {
                Some(existing) if !existing.is_empty() => format!("{existing}\n\n{instruction}"),
                _ => instruction,
            });
        }
        if let Some(system_prompt) = system_prompt {
            body["system"] = Value::String(system_prompt);
        }

        if let Some(budget) = reasoning.anthropic_budget() {
            // Extended thinking requires temperature 1 and room for the answer after the budget.
            if max_tokens <= budget {
                max_tokens = budget + u64::from(DEFAULT_MAX_TOKENS);
            }
            body["temperature"] = json!(1);
        } else {
            body["temperature"] = json!(temperature_or_default(parameters));
            if let Some(top_p) = parameters.top_p {
                body["top_p"] = json!(top_p);
            }
        }
        body["max_tokens"] = json!(max_tokens);
        reasoning.merge_into(&mut body);

        Ok(PreparedRequest {
            url: join_endpoint(&request.provider.base_url, MESSAGES_PATH),
            headers: vec![
                ("x-api-key".to_string(), api_key.to_string()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("anthropic-beta".to_string(), ANTHROPIC_BETA.to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body,
        })
    }

    fn parse_frame(&self, frame: &Value, state: &mut FrameState) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        let Some(frame_type) = frame.get("type").and_then(Value::as_str) else {
            return events;
        };

        match frame_type {
            "message_start" => {
                if let Some(usage) = frame.get("message").and_then(|message| message.get("usage")) {
                    events.push(FrameEvent::Usage {
                        input: usage.get("input_tokens").and_then(Value::as_u64),
                        output: None,
                    });
                }
            }
            "content_block_start" => {
                state.current_block = match frame
                    .get("content_block")
                    .and_then(|block| block.get("type"))
                    .and_then(Value::as_str)
                {
                    Some("text") => BlockKind::Text,
                    Some("thinking") => BlockKind::Thinking,
                    _ => BlockKind::Other,
                };
            }
            "content_block_delta" => {
                let Some(delta) = frame.get("delta") else {
                    return events;
                };
                let delta_type = delta.get("type").and_then(Value::as_str);
                let thinking = match delta_type {
                    Some("thinking_delta") => true,
                    Some("text_delta") => false,
                    Some(_) => return events,
                    None => state.current_block == BlockKind::Thinking,
                };
                if thinking {
                    if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(FrameEvent::ReasoningToken(text.to_string()));
                        }
                    }
                } else if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        events.push(FrameEvent::Token(text.to_string()));
                    }
                }
            }
            "content_block_stop" => state.current_block = BlockKind::Text,
            "message_delta" => {
                if let Some(output) = frame
                    .get("usage")
                    .and_then(|usage| usage.get("output_tokens"))
                    .and_then(Value::as_u64)
                {
                    events.push(FrameEvent::Usage {
                        input: None,
                        output: Some(output),
                    });
                }
            }
            "error" => {
                let message = frame
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Anthropic stream reported an error");
                events.push(FrameEvent::ProviderError(message.to_string()));
            }
            _ => {}
        }

        events
    }
}

fn content_blocks(text: &str, attachments: &[ResolvedFile]) -> Value {
    let mut blocks = attachments
        .iter()
        .filter_map(|file| {
            let block_type = match file.kind() {
                FileKind::Image => "image",
                FileKind::Pdf => "document",
                FileKind::Text | FileKind::Other => return None,
            };
            Some(json!({
                "type": block_type,
                "source": {
                    "type": "base64",
                    "media_type": file.mime_type,
                    "data": file.base64,
                },
            }))
        })
        .collect::<Vec<_>>();
    blocks.push(json!({ "type": "text", "text": text }));
    Value::Array(blocks)
}

fn json_output_instruction(format: &ResponseFormat) -> Result<String, AdapterError> {
    Ok(match format {
        ResponseFormat::JsonObject => {
            "Respond only with a single valid JSON object and no surrounding prose.".to_string()
        }
        ResponseFormat::JsonSchema { schema, .. } => {
            compile_response_schema(schema)?;
            format!(
                "Respond only with valid JSON that matches this JSON schema, with no surrounding prose:\n{schema}"
            )
        }
    })
}
