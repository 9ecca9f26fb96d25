//! Base provider trait and common types for ChatBridge
//!
//! This module defines the Provider trait that all AI providers must implement,
//! along with the message type sent upstream, token usage accounting, and the
//! streaming contract shared by every adapter.
//!
//! # Streaming contract
//!
//! A streaming call reports progress through a [`StreamRelay`]. The relay
//! forwards [`StreamEvent`]s to a caller-supplied sink and guarantees:
//!
//! - at most one terminal event ([`StreamEvent::Finished`] or [`StreamEvent::Failed`]);
//! - no event after a terminal event;
//! - no event after the sink answered [`StreamControl::Stop`].
//!
//! [`drive_stream`] additionally converts an error escaping the provider into
//! exactly one `Failed` event, so callers observe either a terminal event or
//! their own stop request and nothing else.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message structure for conversation
///
/// Represents a message in the conversation sent to the AI provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::providers::Message;
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Builds the upstream message list: prior history followed by the new user turn
pub fn build_messages(prompt: &str, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.extend_from_slice(history);
    messages.push(Message::user(prompt));
    messages
}

/// Token usage information from a completion
///
/// Tracks the number of tokens used in prompts and completions, either as
/// reported by the AI provider or estimated locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: usize,
    /// Number of tokens in the completion
    pub completion_tokens: usize,
    /// Total tokens used (prompt + completion)
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Rough estimate used when the vendor does not report counts
    ///
    /// One token is approximated as four bytes of text.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::estimate("12345678", "1234");
    /// assert_eq!(usage.prompt_tokens, 2);
    /// assert_eq!(usage.completion_tokens, 1);
    /// ```
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        Self::new(prompt.len() / 4, completion.len() / 4)
    }
}

/// Completion response with text and optional token usage
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The generated answer
    pub content: String,
    /// Vendor-reported token usage, when present in the response envelope
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    /// Create a response without usage information
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    /// Create a response carrying vendor token usage
    pub fn with_usage(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage: Some(usage),
        }
    }
}

/// One event delivered to a streaming sink
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental piece of generated text
    Delta(String),
    /// A recoverable problem (e.g. an unparsable payload line); the stream continues
    Warning(String),
    /// Normal completion, with vendor usage when the stream carried it
    Finished(Option<TokenUsage>),
    /// Terminal failure
    Failed(String),
}

impl StreamEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Failed(_))
    }
}

/// The sink's answer to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Keep producing events
    Continue,
    /// Stop producing events and return promptly
    Stop,
}

/// Callback receiving stream events
pub type StreamSink<'a> = dyn FnMut(StreamEvent) -> StreamControl + Send + 'a;

/// Enforces the streaming contract on top of a sink
pub struct StreamRelay<'a> {
    sink: &'a mut StreamSink<'a>,
    terminated: bool,
    stopped: bool,
}

impl<'a> StreamRelay<'a> {
    /// Wrap a sink
    pub fn new(sink: &'a mut StreamSink<'a>) -> Self {
        Self {
            sink,
            terminated: false,
            stopped: false,
        }
    }

    /// Forward a text fragment. Empty fragments are dropped.
    pub fn delta(&mut self, text: impl Into<String>) -> StreamControl {
        let text = text.into();
        if text.is_empty() {
            return self.control();
        }
        self.forward(StreamEvent::Delta(text))
    }

    /// Report a non-terminal problem
    pub fn warn(&mut self, message: impl Into<String>) -> StreamControl {
        self.forward(StreamEvent::Warning(message.into()))
    }

    /// Deliver the successful terminal event (ignored if already closed)
    pub fn finish(&mut self, usage: Option<TokenUsage>) {
        if self.is_closed() {
            return;
        }
        self.terminated = true;
        (self.sink)(StreamEvent::Finished(usage));
    }

    /// Deliver the failure terminal event (ignored if already closed)
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        self.terminated = true;
        (self.sink)(StreamEvent::Failed(message.into()));
    }

    /// A terminal event was delivered
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The sink asked to stop
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// No further events will be delivered
    pub fn is_closed(&self) -> bool {
        self.terminated || self.stopped
    }

    fn control(&self) -> StreamControl {
        if self.is_closed() {
            StreamControl::Stop
        } else {
            StreamControl::Continue
        }
    }

    fn forward(&mut self, event: StreamEvent) -> StreamControl {
        if self.is_closed() {
            return StreamControl::Stop;
        }
        if (self.sink)(event) == StreamControl::Stop {
            self.stopped = true;
        }
        self.control()
    }
}

/// How a driven stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A terminal event was delivered to the sink
    Terminated,
    /// The sink stopped the stream; no terminal event was delivered
    Stopped,
}

/// Provider trait for AI providers
///
/// All AI providers (Zhipu, Coze, etc.) must implement this trait.
///
/// # Examples
///
/// ```no_run
/// use chatbridge::providers::{CompletionResponse, Message, Provider, StreamRelay};
/// use chatbridge::error::Result;
/// use async_trait::async_trait;
///
/// struct EchoProvider;
///
/// #[async_trait]
/// impl Provider for EchoProvider {
///     fn name(&self) -> &'static str {
///         "echo"
///     }
///
///     async fn complete(&self, prompt: &str, _history: &[Message]) -> Result<CompletionResponse> {
///         Ok(CompletionResponse::new(prompt))
///     }
///
///     async fn complete_stream(
///         &self,
///         prompt: &str,
///         _history: &[Message],
///         relay: &mut StreamRelay<'_>,
///     ) -> Result<()> {
///         relay.delta(prompt);
///         relay.finish(None);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier used in logs
    fn name(&self) -> &'static str;

    /// Generate a complete answer for `prompt` given prior `history`
    ///
    /// # Errors
    ///
    /// Returns a provider error on transport, authentication, or parse
    /// failure, and `EmptyResponse` when the vendor returns no choices.
    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<CompletionResponse>;

    /// Generate an answer incrementally, reporting through `relay`
    ///
    /// Implementations stop reading as soon as the relay reports
    /// [`StreamControl::Stop`] and return `Ok(())`.
    async fn complete_stream(
        &self,
        prompt: &str,
        history: &[Message],
        relay: &mut StreamRelay<'_>,
    ) -> Result<()>;
}

/// Run a streaming call and guarantee a terminal event unless the sink stopped
///
/// Errors returned by the provider, and streams that end without a terminal
/// event, are reported to the sink as a single [`StreamEvent::Failed`].
pub async fn drive_stream<'s>(
    provider: &dyn Provider,
    prompt: &str,
    history: &[Message],
    sink: &'s mut StreamSink<'s>,
) -> StreamEnd {
    let mut relay = StreamRelay::new(sink);

    match provider.complete_stream(prompt, history, &mut relay).await {
        Ok(()) if relay.is_closed() => {}
        Ok(()) => {
            tracing::warn!(
                provider = provider.name(),
                "Provider stream ended without a terminal event"
            );
            relay.fail("stream ended before completion");
        }
        Err(e) => {
            tracing::error!(provider = provider.name(), "Provider stream failed: {:#}", e);
            relay.fail(e.to_string());
        }
    }

    if relay.is_terminated() {
        StreamEnd::Terminated
    } else {
        StreamEnd::Stopped
    }
}
