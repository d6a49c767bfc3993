use serde_json::{json, Value};

use super::common::{
    join_endpoint, max_tokens_or_default, prepare_conversation, temperature_or_default,
};
use super::{FrameEvent, FrameState, PreparedRequest, ProviderAdapter, ProviderFamily};
use crate::error::AdapterError;
use crate::files::{FileKind, ResolvedFile};
use crate::reasoning::{is_openai_reasoning_model, ReasoningFragment};
use crate::types::{ChatRequest, ResponseFormat};
use crate::validation::compile_response_schema;

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
const DEFAULT_OPENROUTER_REFERER: &str = "http://localhost";
const DEFAULT_OPENROUTER_TITLE: &str = "promptbench";

/// Header and field policy layered over the OpenAI chat-completions wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAIPolicy {
    Standard,
    OpenRouter { referer: String, title: String },
    /// The backend behind the gateway is unknown, so no model-specific fields are rewritten.
    CustomGateway,
}

impl OpenAIPolicy {
    pub fn open_router(referer: Option<String>, title: Option<String>) -> Self {
        OpenAIPolicy::OpenRouter {
            referer: referer.unwrap_or_else(|| DEFAULT_OPENROUTER_REFERER.to_string()),
            title: title.unwrap_or_else(|| DEFAULT_OPENROUTER_TITLE.to_string()),
        }
    }
}

pub struct OpenAICompatibleAdapter {
    policy: OpenAIPolicy,
}

impl OpenAICompatibleAdapter {
    pub fn new(policy: OpenAIPolicy) -> Self {
        Self { policy }
    }

    fn uses_reasoning_model_fields(&self, model: &str) -> bool {
        self.policy == OpenAIPolicy::Standard && is_openai_reasoning_model(model)
    }
}

impl ProviderAdapter for OpenAICompatibleAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAICompatible
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        api_key: &str,
        files: &[ResolvedFile],
        reasoning: &ReasoningFragment,
    ) -> Result<PreparedRequest, AdapterError> {
        let conversation = prepare_conversation(&request.messages, files)?;
        let messages = conversation
            .messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let content = if Some(index) == conversation.attachment_index
                    && !conversation.attachments.is_empty()
                {
                    content_parts(&message.content, &conversation.attachments)
                } else {
                    Value::String(message.content.clone())
                };
                json!({
                    "role": message.role.as_str(),
                    "content": content,
                })
            })
            .collect::<Vec<_>>();

        let parameters = &request.parameters;
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if self.uses_reasoning_model_fields(&request.model) {
            body["max_completion_tokens"] = json!(max_tokens_or_default(parameters));
        } else {
            body["temperature"] = json!(temperature_or_default(parameters));
            body["max_tokens"] = json!(max_tokens_or_default(parameters));
        }
        if let Some(top_p) = parameters.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(penalty) = parameters.frequency_penalty {
            body["frequency_penalty"] = json!(penalty);
        }
        if let Some(penalty) = parameters.presence_penalty {
            body["presence_penalty"] = json!(penalty);
        }
        if let Some(format) = &request.response_format {
            body["response_format"] = response_format(format)?;
        }
        reasoning.merge_into(&mut body);

        let mut headers = vec![
            ("Authorization".to_string(), format!("Bearer {api_key}")),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let OpenAIPolicy::OpenRouter { referer, title } = &self.policy {
            headers.push(("HTTP-Referer".to_string(), referer.clone()));
            headers.push(("X-Title".to_string(), title.clone()));
        }

        Ok(PreparedRequest {
            url: join_endpoint(&request.provider.base_url, CHAT_COMPLETIONS_PATH),
            headers,
            body,
        })
    }

    fn parse_frame(&self, frame: &Value, _state: &mut FrameState) -> Vec<FrameEvent> {
        let mut events = Vec::new();

        if let Some(error) = frame.get("error").filter(|error| !error.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(FrameEvent::ProviderError(message));
            return events;
        }

        let choice = frame
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());

        if let Some(delta) = choice.and_then(|choice| choice.get("delta")) {
            let reasoning = delta
                .get("reasoning")
                .and_then(Value::as_str)
                .or_else(|| delta.get("reasoning_content").and_then(Value::as_str));
            if let Some(text) = reasoning.filter(|text| !text.is_empty()) {
                events.push(FrameEvent::ReasoningToken(text.to_string()));
            }
            if let Some(text) = delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
            {
                events.push(FrameEvent::Token(text.to_string()));
            }
            push_reasoning_details(delta, &mut events);
        }
        if let Some(message) = choice.and_then(|choice| choice.get("message")) {
            push_reasoning_details(message, &mut events);
        }

        if let Some(usage) = frame.get("usage").filter(|usage| usage.is_object()) {
            events.push(FrameEvent::Usage {
                input: usage.get("prompt_tokens").and_then(Value::as_u64),
                output: usage.get("completion_tokens").and_then(Value::as_u64),
            });
        }

        events
    }
}

fn content_parts(text: &str, attachments: &[ResolvedFile]) -> Value {
    let mut parts = vec![json!({ "type": "text", "text": text })];
    for file in attachments {
        match file.kind() {
            FileKind::Image => parts.push(json!({
                "type": "image_url",
                "image_url": { "url": file.data_url() },
            })),
            FileKind::Pdf => parts.push(json!({
                "type": "file",
                "file": {
                    "filename": file.name,
                    "file_data": file.data_url(),
                },
            })),
            FileKind::Text | FileKind::Other => {}
        }
    }
    Value::Array(parts)
}

fn response_format(format: &ResponseFormat) -> Result<Value, AdapterError> {
    Ok(match format {
        ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => {
            compile_response_schema(schema)?;
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "schema": schema,
                    "strict": strict,
                },
            })
        }
    })
}

fn push_reasoning_details(container: &Value, events: &mut Vec<FrameEvent>) {
    let Some(details) = container.get("reasoning_details").and_then(Value::as_array) else {
        return;
    };
    for detail in details {
        let text = detail
            .get("text")
            .or_else(|| detail.get("summary"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty());
        if let Some(text) = text {
            events.push(FrameEvent::ReasoningDetail(text.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::encode_base64;
    use crate::reasoning::map_reasoning_parameters;
    use crate::types::{
        ChatMessage, ProviderDescriptor, ProviderKind, ReasoningConfig, ReasoningEffort,
    };

    fn request(kind: ProviderKind, model: &str) -> ChatRequest {
        ChatRequest::new(
            ProviderDescriptor::new(kind, "https://api.example.test"),
            model,
            vec![ChatMessage::system("be brief"), ChatMessage::user("describe")],
        )
    }

    fn build(
        adapter: &OpenAICompatibleAdapter,
        request: &ChatRequest,
        files: &[ResolvedFile],
    ) -> PreparedRequest {
        let fragment = map_reasoning_parameters(
            request.provider.kind,
            &request.model,
            &request.reasoning,
        );
        adapter
            .build_request(request, "sk-test", files, &fragment)
            .expect("build request")
    }

    #[test]
    fn payload_requests_streaming_usage_and_fallback_parameters() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let prepared = build(&adapter, &request(ProviderKind::OpenAICompatible, "gpt-4o"), &[]);

        assert_eq!(prepared.url, "https://api.example.test/v1/chat/completions");
        assert_eq!(prepared.header("authorization"), Some("Bearer sk-test"));
        assert_eq!(prepared.body["stream"], json!(true));
        assert_eq!(prepared.body["stream_options"]["include_usage"], json!(true));
        assert_eq!(prepared.body["temperature"], json!(0.7));
        assert_eq!(prepared.body["max_tokens"], json!(4096));
        assert!(prepared.body.get("top_p").is_none());
        assert!(prepared.body.get("frequency_penalty").is_none());
        assert_eq!(prepared.body["messages"][0]["role"], json!("system"));
    }

    #[test]
    fn reasoning_models_use_completion_token_limit_and_effort() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let mut request = request(ProviderKind::OpenAICompatible, "o3-mini");
        request.reasoning = ReasoningConfig::with_effort(ReasoningEffort::High);
        request.parameters.max_tokens = Some(2000);

        let prepared = build(&adapter, &request, &[]);
        assert_eq!(prepared.body["reasoning_effort"], json!("high"));
        assert_eq!(prepared.body["max_completion_tokens"], json!(2000));
        assert!(prepared.body.get("temperature").is_none());
        assert!(prepared.body.get("max_tokens").is_none());
    }

    #[test]
    fn openrouter_adds_referer_and_reasoning_object() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::open_router(None, None));
        let mut request = request(ProviderKind::OpenRouter, "deepseek/deepseek-r1");
        request.reasoning = ReasoningConfig::with_effort(ReasoningEffort::Medium);

        let prepared = build(&adapter, &request, &[]);
        assert_eq!(prepared.header("HTTP-Referer"), Some("http://localhost"));
        assert_eq!(prepared.header("X-Title"), Some("promptbench"));
        assert_eq!(prepared.body["reasoning"], json!({ "effort": "medium" }));
    }

    #[test]
    fn binary_files_become_content_parts_on_last_user_message() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::CustomGateway);
        let files = vec![
            ResolvedFile {
                name: "photo.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                base64: encode_base64(b"jpg"),
            },
            ResolvedFile {
                name: "brief.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                base64: encode_base64(b"pdf"),
            },
            ResolvedFile {
                name: "data.csv".to_string(),
                mime_type: "text/csv".to_string(),
                base64: encode_base64(b"a,b\n1,2"),
            },
        ];
        let prepared = build(&adapter, &request(ProviderKind::CustomGateway, "llama-3"), &files);
        let parts = prepared.body["messages"][1]["content"]
            .as_array()
            .expect("content parts");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["type"], json!("text"));
        assert_eq!(
            parts[0]["text"],
            json!("describe\n\n[File: data.csv]\n```\na,b\n1,2\n```")
        );
        assert_eq!(parts[1]["image_url"]["url"], json!("data:image/jpeg;base64,anBn"));
        assert_eq!(parts[2]["file"]["filename"], json!("brief.pdf"));
        assert_eq!(prepared.body["messages"][0]["content"], json!("be brief"));
    }

    #[test]
    fn json_schema_format_is_validated_and_forwarded() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let mut request = request(ProviderKind::OpenAICompatible, "gpt-4o");
        request.response_format = Some(ResponseFormat::JsonSchema {
            name: "answer".to_string(),
            schema: json!({ "type": "object", "properties": { "ok": { "type": "boolean" } } }),
            strict: true,
        });
        let prepared = build(&adapter, &request, &[]);
        assert_eq!(prepared.body["response_format"]["type"], json!("json_schema"));
        assert_eq!(
            prepared.body["response_format"]["json_schema"]["name"],
            json!("answer")
        );

        request.response_format = Some(ResponseFormat::JsonSchema {
            name: "broken".to_string(),
            schema: json!({ "type": 12 }),
            strict: false,
        });
        let error = adapter
            .build_request(&request, "sk", &[], &ReasoningFragment::empty())
            .expect_err("invalid schema");
        assert_eq!(error.code, crate::error::AdapterErrorCode::SchemaInvalid);
    }

    #[test]
    fn frames_dispatch_content_reasoning_and_usage() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let mut state = FrameState::default();

        let events = adapter.parse_frame(
            &json!({ "choices": [{ "delta": { "reasoning_content": "hmm", "content": "Hi" } }], "usage": null }),
            &mut state,
        );
        assert_eq!(
            events,
            vec![
                FrameEvent::ReasoningToken("hmm".to_string()),
                FrameEvent::Token("Hi".to_string()),
            ]
        );

        let events = adapter.parse_frame(
            &json!({ "choices": [], "usage": { "prompt_tokens": 5, "completion_tokens": 3 } }),
            &mut state,
        );
        assert_eq!(
            events,
            vec![FrameEvent::Usage {
                input: Some(5),
                output: Some(3)
            }]
        );
    }

    #[test]
    fn reasoning_details_on_closing_message_are_collected() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::open_router(None, None));
        let events = adapter.parse_frame(
            &json!({ "choices": [{ "message": { "reasoning_details": [
                { "type": "reasoning.text", "text": "step one" },
                { "type": "reasoning.summary", "summary": "step two" }
            ] } }] }),
            &mut FrameState::default(),
        );
        assert_eq!(
            events,
            vec![
                FrameEvent::ReasoningDetail("step one".to_string()),
                FrameEvent::ReasoningDetail("step two".to_string()),
            ]
        );
    }

    #[test]
    fn error_frames_become_provider_errors() {
        let adapter = OpenAICompatibleAdapter::new(OpenAIPolicy::Standard);
        let events = adapter.parse_frame(
            &json!({ "error": { "message": "upstream overloaded" } }),
            &mut FrameState::default(),
        );
        assert_eq!(
            events,
            vec![FrameEvent::ProviderError("upstream overloaded".to_string())]
        );
    }
}
