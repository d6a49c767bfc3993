use serde_json::{json, Map, Value};

use super::common::{
    join_endpoint, max_tokens_or_default, prepare_conversation, temperature_or_default,
};
use super::{FrameEvent, FrameState, PreparedRequest, ProviderAdapter, ProviderFamily};
use crate::error::AdapterError;
use crate::files::ResolvedFile;
use crate::reasoning::ReasoningFragment;
use crate::types::{ChatRequest, ResponseFormat, Role};
use crate::validation::compile_response_schema;

pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
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

        let contents = messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let role = match message.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                let mut parts = Vec::new();
                if Some(index) == attachment_index {
                    parts.extend(conversation.attachments.iter().map(|file| {
                        json!({
                            "inlineData": {
                                "mimeType": file.mime_type,
                                "data": file.base64,
                            }
                        })
                    }));
                }
                parts.push(json!({ "text": message.content }));
                json!({ "role": role, "parts": parts })
            })
            .collect::<Vec<_>>();

        let parameters = &request.parameters;
        let mut generation_config = Map::new();
        generation_config.insert(
            "temperature".to_string(),
            json!(temperature_or_default(parameters)),
        );
        generation_config.insert(
            "maxOutputTokens".to_string(),
            json!(max_tokens_or_default(parameters)),
        );
        if let Some(top_p) = parameters.top_p {
            generation_config.insert("topP".to_string(), json!(top_p));
        }
        if let Some(penalty) = parameters.frequency_penalty {
            generation_config.insert("frequencyPenalty".to_string(), json!(penalty));
        }
        if let Some(penalty) = parameters.presence_penalty {
            generation_config.insert("presencePenalty".to_string(), json!(penalty));
        }
        match &request.response_format {
            Some(ResponseFormat::JsonObject) => {
                generation_config.insert("responseMimeType".to_string(), json!("application/json"));
            }
            Some(ResponseFormat::JsonSchema { schema, .. }) => {
                compile_response_schema(schema)?;
                generation_config.insert("responseMimeType".to_string(), json!("application/json"));
                generation_config.insert("responseSchema".to_string(), schema.clone());
            }
            None => {}
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        reasoning.merge_into(&mut body);

        let path = format!(
            "v1beta/models/{}:streamGenerateContent?alt=sse&key={api_key}",
            request.model
        );
        Ok(PreparedRequest {
            url: join_endpoint(&request.provider.base_url, &path),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        })
    }

    fn parse_frame(&self, frame: &Value, _state: &mut FrameState) -> Vec<FrameEvent> {
        let mut events = Vec::new();

        if let Some(error) = frame.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Gemini stream reported an error");
            events.push(FrameEvent::ProviderError(message.to_string()));
            return events;
        }

        let parts = frame
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array);
        for part in parts.into_iter().flatten() {
            let Some(text) = part.get("text").and_then(Value::as_str) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                events.push(FrameEvent::ReasoningToken(text.to_string()));
            } else {
                events.push(FrameEvent::Token(text.to_string()));
            }
        }

        if let Some(usage) = frame.get("usageMetadata") {
            // Each report is a full running total; absent counts are zero.
            let count = |field: &str| usage.get(field).and_then(Value::as_u64).unwrap_or(0);
            events.push(FrameEvent::Usage {
                input: Some(count("promptTokenCount")),
                output: Some(count("candidatesTokenCount") + count("thoughtsTokenCount")),
            });
        }

        events
    }
}
