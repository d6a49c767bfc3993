use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use promptbench_llm::{
    encode_base64, validate_structured_output, CallbackSink, ChatMessage, ChatRequest,
    FileReference, ModelParameters, ReasoningConfig, ReasoningEffort, ResponseFormat,
    SessionOptions, SessionOutcome, StreamSession, Usage,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ProviderEntry;

/// Inputs for one chat call, independent of how they were parsed.
#[derive(Debug, Clone, Default)]
pub struct ChatInvocation {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub files: Vec<PathBuf>,
    pub effort: Option<ReasoningEffort>,
    pub parameters: ModelParameters,
    pub json_schema: Option<PathBuf>,
    pub json_object: bool,
    pub hide_reasoning: bool,
    pub no_reattach: bool,
}

pub fn build_request(
    provider: &ProviderEntry,
    invocation: &ChatInvocation,
) -> Result<(ChatRequest, Option<Value>), String> {
    let mut messages = Vec::new();
    if let Some(system) = invocation.system.as_deref() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(invocation.prompt.clone()));

    let mut request = ChatRequest::new(
        provider.descriptor(),
        invocation.model.clone(),
        messages,
    );
    request.parameters = invocation.parameters.clone();
    request.reasoning = match invocation.effort {
        Some(effort) => ReasoningConfig::with_effort(effort),
        None => ReasoningConfig::default(),
    };
    request.files = invocation
        .files
        .iter()
        .map(|path| read_file_reference(path))
        .collect::<Result<Vec<_>, _>>()?;

    let schema = match invocation.json_schema.as_deref() {
        Some(path) => Some(read_schema(path)?),
        None => None,
    };
    request.response_format = match &schema {
        Some(schema) => Some(ResponseFormat::JsonSchema {
            name: "response".to_string(),
            schema: schema.clone(),
            strict: true,
        }),
        None if invocation.json_object => Some(ResponseFormat::JsonObject),
        None => None,
    };

    Ok((request, schema))
}

pub async fn run_chat(provider: &ProviderEntry, invocation: ChatInvocation) -> Result<(), String> {
    let (request, schema) = build_request(provider, &invocation)?;
    info!(
        provider = %provider.name,
        kind = provider.kind.as_str(),
        model = %request.model,
        files = request.files.len(),
        "starting chat"
    );

    let options = SessionOptions {
        reattach_thinking: !invocation.no_reattach,
        ..SessionOptions::default()
    };
    let session = StreamSession::new(request).with_options(options);
    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut sink = TerminalSink::new(
        std::io::stdout(),
        std::io::stderr(),
        !invocation.hide_reasoning,
    );
    match session.run(&mut sink).await {
        SessionOutcome::Completed(completion) => {
            if let Some(schema) = schema {
                let parsed = validate_structured_output(&schema, &completion.content)
                    .map_err(|error| error.as_compact_json())?;
                debug!(output = %parsed, "structured output matches schema");
                eprintln!("structured output: valid");
            }
            Ok(())
        }
        SessionOutcome::Aborted { content, .. } => {
            debug!(partial_chars = content.len(), "chat interrupted");
            Ok(())
        }
        SessionOutcome::Failed(error) => Err(error.to_string()),
    }
}

fn read_file_reference(path: &Path) -> Result<FileReference, String> {
    let bytes =
        fs::read(path).map_err(|error| format!("read file {} failed: {error}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    Ok(FileReference::inline(name, mime_type, encode_base64(&bytes)))
}

fn read_schema(path: &Path) -> Result<Value, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("read schema {} failed: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("parse schema {} failed: {error}", path.display()))
}

/// Prints answer tokens to `out` and reasoning plus status lines to `err`.
pub struct TerminalSink<O, E> {
    out: O,
    err: E,
    show_reasoning: bool,
    in_reasoning: bool,
}

impl<O: Write + Send, E: Write + Send> TerminalSink<O, E> {
    pub fn new(out: O, err: E, show_reasoning: bool) -> Self {
        Self {
            out,
            err,
            show_reasoning,
            in_reasoning: false,
        }
    }

    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }

    fn close_reasoning(&mut self) {
        if self.in_reasoning {
            let _ = writeln!(self.err);
            self.in_reasoning = false;
        }
    }
}

impl<O: Write + Send, E: Write + Send> CallbackSink for TerminalSink<O, E> {
    fn on_token(&mut self, text: &str) {
        self.close_reasoning();
        let _ = write!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn on_reasoning_token(&mut self, text: &str) {
        if !self.show_reasoning {
            return;
        }
        if !self.in_reasoning {
            let _ = write!(self.err, "[thinking] ");
            self.in_reasoning = true;
        }
        let _ = write!(self.err, "{text}");
        let _ = self.err.flush();
    }

    fn on_complete(&mut self, _content: &str, _thinking: Option<&str>, usage: Usage) {
        self.close_reasoning();
        let _ = writeln!(self.out);
        let _ = self.out.flush();
        let _ = writeln!(
            self.err,
            "[usage] input={} output={}",
            usage.input_tokens, usage.output_tokens
        );
    }

    fn on_error(&mut self, message: &str) {
        self.close_reasoning();
        let _ = writeln!(self.err, "[error] {message}");
    }

    fn on_abort(&mut self) {
        self.close_reasoning();
        let _ = writeln!(self.out);
        let _ = writeln!(self.err, "[aborted]");
    }
}
