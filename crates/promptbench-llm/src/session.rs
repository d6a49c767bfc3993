use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, info_span, warn, Dispatch, Instrument, Span};

use crate::decoder::{DecodedEvent, StreamFrameDecoder};
use crate::error::{AdapterError, AdapterErrorCode};
use crate::event_stream::ChatEventStream;
use crate::files::{resolve_files, FileResolver};
use crate::providers::common::{provider_error_message, shared_http_client};
use crate::providers::{adapter_for, PreparedRequest, ProviderAdapter};
use crate::reasoning::map_reasoning_parameters;
use crate::sink::CallbackSink;
use crate::thinking::extract_thinking;
use crate::types::{ChatRequest, Completion, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }

    fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Requesting)
                | (Requesting, Streaming)
                | (Requesting, Aborted)
                | (Requesting, Failed)
                | (Streaming, Completed)
                | (Streaming, Aborted)
                | (Streaming, Failed)
        )
    }
}

#[derive(Clone)]
pub struct SessionOptions {
    /// Client used for the request; a process-wide shared client otherwise.
    pub http_client: Option<Client>,
    /// Subscriber receiving this session's logs; the caller's current one otherwise.
    pub logger: Option<Dispatch>,
    pub file_resolver: Option<Arc<dyn FileResolver>>,
    /// Prefix structured reasoning onto the delivered content as `<think>...</think>`.
    pub reattach_thinking: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            http_client: None,
            logger: None,
            file_resolver: None,
            reattach_thinking: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(Completion),
    /// Cancelled by the caller; carries whatever had arrived before cancellation.
    Aborted {
        content: String,
        thinking: Option<String>,
        usage: Usage,
    },
    Failed(AdapterError),
}

impl SessionOutcome {
    pub(crate) fn closed() -> Self {
        SessionOutcome::Failed(AdapterError::new(
            AdapterErrorCode::ProviderProtocol,
            "Chat session ended without a terminal event",
        ))
    }

    pub fn into_result(self) -> Result<Completion, AdapterError> {
        match self {
            SessionOutcome::Completed(completion) => Ok(completion),
            SessionOutcome::Aborted { .. } => Err(AdapterError::aborted()),
            SessionOutcome::Failed(error) => Err(error),
        }
    }
}

/// One streaming chat call, from request building to its terminal event.
pub struct StreamSession {
    request: ChatRequest,
    options: SessionOptions,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl StreamSession {
    pub fn new(request: ChatRequest) -> Self {
        Self {
            request,
            options: SessionOptions::default(),
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Idle),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses a caller-owned token, e.g. a child of an application-wide shutdown token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    /// Drives the session to its terminal state, delivering events to `sink`.
    ///
    /// A session runs once; a second call fails without touching `sink`.
    pub async fn run<S>(&self, sink: &mut S) -> SessionOutcome
    where
        S: CallbackSink + ?Sized,
    {
        if !self.transition(SessionState::Requesting) {
            return SessionOutcome::Failed(AdapterError::new(
                AdapterErrorCode::ProviderProtocol,
                "Chat session has already run",
            ));
        }

        match self.options.logger.clone() {
            Some(dispatch) => {
                let span = tracing::dispatcher::with_default(&dispatch, || self.session_span());
                self.drive(sink)
                    .instrument(span)
                    .with_subscriber(dispatch)
                    .await
            }
            None => {
                let span = self.session_span();
                self.drive(sink).instrument(span).await
            }
        }
    }

    /// Runs the session on the tokio runtime and returns its events as a stream.
    pub fn spawn(self) -> ChatEventStream {
        let stream = ChatEventStream::new(self.cancel.clone());
        let writer = stream.clone();
        spawn_session_task(
            async move {
                let mut sink = writer.sink();
                let outcome = self.run(&mut sink).await;
                writer.finish(outcome);
            }
            .with_current_subscriber(),
        );
        stream
    }

    fn session_span(&self) -> Span {
        info_span!(
            "chat_session",
            provider = self.request.provider.kind.as_str(),
            model = %self.request.model,
            url = tracing::field::Empty,
        )
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().expect("session state mutex poisoned");
        if !state.can_transition_to(next) {
            return false;
        }
        *state = next;
        true
    }

    async fn drive<S>(&self, sink: &mut S) -> SessionOutcome
    where
        S: CallbackSink + ?Sized,
    {
        let adapter = adapter_for(&self.request.provider);
        let prepared = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return self.abort(sink, String::new(), String::new(), Usage::default());
            }
            prepared = self.prepare(adapter.as_ref()) => prepared,
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(error) => return self.fail(sink, error),
        };
        Span::current().record("url", prepared.redacted_url().as_str());

        let client = match &self.options.http_client {
            Some(client) => client.clone(),
            None => shared_http_client(&self.request.provider.base_url).clone(),
        };
        let mut builder = client.post(&prepared.url);
        for (name, value) in &prepared.headers {
            builder = builder.header(name, value);
        }
        debug!("sending chat request");

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return self.abort(sink, String::new(), String::new(), Usage::default());
            }
            response = builder.json(&prepared.body).send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                return self.fail(sink, AdapterError::transport("Chat request failed", error))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.abort(sink, String::new(), String::new(), Usage::default());
                }
                body = response.text() => body.unwrap_or_default(),
            };
            let vendor_message = provider_error_message(&body);
            return self.fail(
                sink,
                AdapterError::http_status(status.as_u16(), vendor_message, body),
            );
        }

        self.transition(SessionState::Streaming);
        debug!(status = status.as_u16(), "chat stream opened");

        let mut decoder = StreamFrameDecoder::new(adapter.as_ref());
        let mut body = pin!(response.bytes_stream());
        let mut content = String::new();
        let mut reasoning = String::new();

        loop {
            let events = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.abort(sink, content, reasoning, decoder.usage());
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(error)) => {
                        return self.fail(
                            sink,
                            AdapterError::transport("Chat stream interrupted", error),
                        );
                    }
                    None => break,
                },
            };
            if let Err(error) = self
                .forward(sink, events, &mut content, &mut reasoning)
                .await
            {
                return match error {
                    Interrupt::Cancelled => self.abort(sink, content, reasoning, decoder.usage()),
                    Interrupt::Provider(error) => self.fail(sink, error),
                };
            }
        }

        let trailing = decoder.finish();
        if let Err(error) = self
            .forward(sink, trailing, &mut content, &mut reasoning)
            .await
        {
            return match error {
                Interrupt::Cancelled => self.abort(sink, content, reasoning, decoder.usage()),
                Interrupt::Provider(error) => self.fail(sink, error),
            };
        }

        let structured_thinking = if !reasoning.is_empty() {
            Some(reasoning)
        } else {
            decoder.reasoning_details().map(str::to_string)
        };
        let completion = match structured_thinking {
            Some(thinking) => {
                let content = if self.options.reattach_thinking {
                    format!("<think>{thinking}</think>{content}")
                } else {
                    content
                };
                Completion {
                    content,
                    thinking: Some(thinking),
                    usage: decoder.usage(),
                }
            }
            None => {
                let thinking = extract_thinking(&content).thinking().map(str::to_string);
                Completion {
                    content,
                    thinking,
                    usage: decoder.usage(),
                }
            }
        };

        self.transition(SessionState::Completed);
        info!(
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            has_thinking = completion.thinking.is_some(),
            done_marker = decoder.saw_done(),
            "chat session completed"
        );
        sink.on_complete(
            &completion.content,
            completion.thinking.as_deref(),
            completion.usage,
        );
        SessionOutcome::Completed(completion)
    }

    async fn prepare(
        &self,
        adapter: &dyn ProviderAdapter,
    ) -> Result<PreparedRequest, AdapterError> {
        let provider = &self.request.provider;
        let api_key = resolve_api_key(&self.request)?;
        let files =
            resolve_files(&self.request.files, self.options.file_resolver.as_deref()).await?;
        let fragment =
            map_reasoning_parameters(provider.kind, &self.request.model, &self.request.reasoning);
        if !fragment.is_empty() {
            debug!(fragment = %fragment.to_value(), "mapped reasoning parameters");
        }
        adapter.build_request(&self.request, &api_key, &files, &fragment)
    }

    async fn forward<S>(
        &self,
        sink: &mut S,
        events: Vec<DecodedEvent>,
        content: &mut String,
        reasoning: &mut String,
    ) -> Result<(), Interrupt>
    where
        S: CallbackSink + ?Sized,
    {
        for event in events {
            if self.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            match event {
                DecodedEvent::Token(text) => {
                    content.push_str(&text);
                    sink.on_token(&text);
                    tokio::task::yield_now().await;
                }
                DecodedEvent::ReasoningToken(text) => {
                    reasoning.push_str(&text);
                    sink.on_reasoning_token(&text);
                    tokio::task::yield_now().await;
                }
                DecodedEvent::Usage(usage) => sink.on_usage(usage),
                DecodedEvent::ProviderError(message) => {
                    return Err(Interrupt::Provider(AdapterError::new(
                        AdapterErrorCode::ProviderProtocol,
                        message,
                    )));
                }
            }
        }
        Ok(())
    }

    fn abort<S>(
        &self,
        sink: &mut S,
        content: String,
        reasoning: String,
        usage: Usage,
    ) -> SessionOutcome
    where
        S: CallbackSink + ?Sized,
    {
        self.transition(SessionState::Aborted);
        info!(partial_chars = content.len(), "chat session aborted");
        sink.on_abort();
        SessionOutcome::Aborted {
            content,
            thinking: (!reasoning.is_empty()).then_some(reasoning),
            usage,
        }
    }

    fn fail<S>(&self, sink: &mut S, error: AdapterError) -> SessionOutcome
    where
        S: CallbackSink + ?Sized,
    {
        self.transition(SessionState::Failed);
        warn!(
            code = %error.code,
            status = ?error.status(),
            before_request = error.code.is_pre_request(),
            message = %error.message,
            "chat session failed"
        );
        sink.on_error(&error.message);
        SessionOutcome::Failed(error)
    }
}

enum Interrupt {
    Cancelled,
    Provider(AdapterError),
}

fn resolve_api_key(request: &ChatRequest) -> Result<String, AdapterError> {
    let provider = &request.provider;
    if let Some(key) = provider.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }
    let env_name = provider.kind.api_key_env();
    match std::env::var(&env_name) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(AdapterError::new(
            AdapterErrorCode::ProviderAuthMissing,
            format!(
                "No API key configured for provider {}; set {env_name} or the descriptor apiKey",
                provider.kind.as_str()
            ),
        )),
    }
}

/// Collects a full completion without observing individual events.
pub async fn complete(request: ChatRequest) -> Result<Completion, AdapterError> {
    StreamSession::new(request)
        .run(&mut DiscardSink)
        .await
        .into_result()
}

struct DiscardSink;

impl CallbackSink for DiscardSink {
    fn on_token(&mut self, _text: &str) {}

    fn on_complete(&mut self, _content: &str, _thinking: Option<&str>, _usage: Usage) {}

    fn on_error(&mut self, _message: &str) {}

    fn on_abort(&mut self) {}
}

fn spawn_session_task<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(task);
        return;
    }

    std::thread::spawn(move || {
        if let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            runtime.block_on(task);
        }
    });
}
