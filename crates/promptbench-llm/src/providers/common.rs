use std::sync::OnceLock;

use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use crate::error::AdapterError;
use crate::files::{FileKind, ResolvedFile};
use crate::types::{ChatMessage, ModelParameters, Role};

pub(crate) const DEFAULT_TEMPERATURE: f64 = 0.7;
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn temperature_or_default(parameters: &ModelParameters) -> f64 {
    parameters.temperature.unwrap_or(DEFAULT_TEMPERATURE)
}

pub(crate) fn max_tokens_or_default(parameters: &ModelParameters) -> u32 {
    parameters.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
}

/// Joins a vendor path onto a base URL without doubling a version segment the
/// base URL already carries (`https://api.openai.com/v1` + `v1/chat/completions`).
pub(crate) fn join_endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if let Some((version, rest)) = path.split_once('/') {
        if base.ends_with(&format!("/{version}")) {
            return format!("{base}/{rest}");
        }
    }
    format!("{base}/{path}")
}

pub(crate) fn shared_http_client(base_url: &str) -> &'static Client {
    static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();
    static LOOPBACK_CLIENT: OnceLock<Client> = OnceLock::new();

    if is_loopback_base_url(base_url) {
        LOOPBACK_CLIENT.get_or_init(|| {
            Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new())
        })
    } else {
        DEFAULT_CLIENT.get_or_init(Client::new)
    }
}

pub(crate) fn is_loopback_base_url(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "[::1]"
}

/// Conversation after attachments are applied: text files are inlined into the
/// last user message and only image/PDF files remain as binary parts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedConversation {
    pub messages: Vec<ChatMessage>,
    pub attachments: Vec<ResolvedFile>,
    pub attachment_index: Option<usize>,
}

impl PreparedConversation {
    /// Leading system prompt, for vendors that lift it out of the message list.
    pub fn split_leading_system(&self) -> (Option<&str>, &[ChatMessage], Option<usize>) {
        match self.messages.first() {
            Some(first) if first.role == Role::System => (
                Some(first.content.as_str()),
                &self.messages[1..],
                self.attachment_index.map(|index| index - 1),
            ),
            _ => (None, &self.messages[..], self.attachment_index),
        }
    }
}

pub(crate) fn prepare_conversation(
    messages: &[ChatMessage],
    files: &[ResolvedFile],
) -> Result<PreparedConversation, AdapterError> {
    let mut messages = messages.to_vec();
    let mut attachments = Vec::new();
    let mut inlined = String::new();

    for file in files {
        match file.kind() {
            FileKind::Text => {
                inlined.push_str(&fenced_file_text(&file.name, &file.decoded_text()?))
            }
            FileKind::Image | FileKind::Pdf => attachments.push(file.clone()),
            FileKind::Other => warn!(
                file = %file.name,
                mime_type = %file.mime_type,
                "skipping attachment with unsupported mime type"
            ),
        }
    }

    if files.is_empty() {
        return Ok(PreparedConversation {
            messages,
            attachments,
            attachment_index: None,
        });
    }

    let index = match messages.iter().rposition(|message| message.role == Role::User) {
        Some(index) => index,
        None => {
            messages.push(ChatMessage::user(String::new()));
            messages.len() - 1
        }
    };
    messages[index].content.push_str(&inlined);

    Ok(PreparedConversation {
        messages,
        attachments,
        attachment_index: Some(index),
    })
}

pub(crate) fn fenced_file_text(name: &str, text: &str) -> String {
    format!("\n\n[File: {name}]\n```\n{}\n```", text.trim_end())
}

/// Extracts a human-readable message from a vendor error body.
pub(crate) fn provider_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let value = match value {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    let error = value.get("error").unwrap_or(&value);
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}
