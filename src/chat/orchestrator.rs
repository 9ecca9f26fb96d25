//! Conversational turn orchestration
//!
//! A turn moves through `Idle → HistoryLoaded → ProviderInvoked → Streaming`
//! and ends `Completed` or `Failed`. The user message is durable before the
//! provider is called; the assistant message is written only after a
//! successful terminal event. Every turn that gets past [`ChatService::prepare`]
//! writes exactly one usage record.

use super::events::{TurnEvent, TurnSink};
use crate::error::{ChatError, Result};
use crate::providers::{
    drive_stream, Message, Provider, ProviderFactory, StreamControl, StreamEvent, TokenUsage,
};
use crate::registry::ModelRegistry;
use crate::storage::{
    AiModel, ChatMessage, ChatSession, ChatStore, Metadata, NewMessage, UsageStore,
};
use crate::usage::{UsageRecorder, UsageSummary};

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a single turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    HistoryLoaded,
    ProviderInvoked,
    Streaming,
    Completed,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::HistoryLoaded => "history_loaded",
            Self::ProviderInvoked => "provider_invoked",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A user's request to take a turn in a session
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: i64,
    pub user_id: i64,
    pub content: String,
    /// Explicit model; the default model is used when absent or unusable
    pub model_id: Option<i64>,
}

/// A validated turn, ready to run
///
/// Produced by [`ChatService::prepare`], which performs no writes.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    session: ChatSession,
    user_id: i64,
    prompt: String,
    model: AiModel,
}

impl PreparedTurn {
    /// The caller's session the turn writes into
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// The model the turn will invoke
    pub fn model(&self) -> &AiModel {
        &self.model
    }
}

/// How a streaming turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed {
        assistant_message: ChatMessage,
        usage: UsageSummary,
    },
    Failed {
        error: String,
    },
    /// The sink or the transport stopped the turn
    Cancelled,
}

/// Result of a non-streaming turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    pub usage: UsageSummary,
}

/// Terminal result reported by the provider stream
enum StreamResult {
    Finished(Option<TokenUsage>),
    Failed(String),
}

/// Drives conversational turns against the configured providers
pub struct ChatService {
    chats: Arc<dyn ChatStore>,
    usage: Arc<dyn UsageStore>,
    registry: ModelRegistry,
    providers: Arc<dyn ProviderFactory>,
}

impl ChatService {
    /// Create a chat service
    ///
    /// # Arguments
    ///
    /// * `chats` - Session and message store
    /// * `usage` - Usage ledger written once per turn
    /// * `registry` - Model registry used to resolve the turn's model
    /// * `providers` - Factory building a provider client per turn
    ///
    /// # Returns
    ///
    /// Returns a service that can be shared across request handlers
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::chat::ChatService;
    /// use chatbridge::config::ProvidersConfig;
    /// use chatbridge::providers::ConfiguredProviderFactory;
    /// use chatbridge::registry::ModelRegistry;
    /// use chatbridge::storage::SqliteStorage;
    /// use std::sync::Arc;
    ///
    /// # fn main() -> chatbridge::error::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let storage = Arc::new(SqliteStorage::new_with_path(dir.path().join("chat.db"))?);
    /// let service = ChatService::new(
    ///     storage.clone(),
    ///     storage.clone(),
    ///     ModelRegistry::new(storage),
    ///     Arc::new(ConfiguredProviderFactory::new(ProvidersConfig::default())?),
    /// );
    /// # let _ = service;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        chats: Arc<dyn ChatStore>,
        usage: Arc<dyn UsageStore>,
        registry: ModelRegistry,
        providers: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            chats,
            usage,
            registry,
            providers,
        }
    }

    /// Registry the service resolves models from
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Validate a turn request without side effects
    ///
    /// # Errors
    ///
    /// - `EmptyPrompt` for empty or whitespace-only content
    /// - `SessionNotFound` when the session is missing, deleted, or not the caller's
    /// - `NoDefaultModel` when no model can serve the turn
    pub async fn prepare(&self, request: TurnRequest) -> Result<PreparedTurn> {
        if request.content.trim().is_empty() {
            return Err(ChatError::EmptyPrompt.into());
        }

        let session = self
            .chats
            .get_session(request.session_id, request.user_id)
            .await?;
        let model = self.registry.resolve(request.model_id).await?;
        debug!(
            "Prepared turn for session {} with model {} (id={})",
            session.id, model.name, model.id
        );

        Ok(PreparedTurn {
            session,
            user_id: request.user_id,
            prompt: request.content,
            model,
        })
    }

    /// Prepare and stream a turn in one call
    ///
    /// # Arguments
    ///
    /// * `request` - Session, caller, prompt, and optional model id
    /// * `sink` - Receives the turn's events in order
    /// * `cancel` - Fires when the client goes away
    ///
    /// # Returns
    ///
    /// Returns how the turn ended once it has been prepared
    ///
    /// # Errors
    ///
    /// Returns the errors of [`prepare`](Self::prepare); nothing is written
    /// or emitted in that case
    pub async fn run(
        &self,
        request: TurnRequest,
        sink: &mut dyn TurnSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let turn = self.prepare(request).await?;
        Ok(self.stream(turn, sink, cancel).await)
    }

    /// Run a prepared turn, relaying progress to `sink`
    ///
    /// The sink receives `user_message`, `stream_start`, any number of
    /// `stream_chunk`s, then exactly one of `stream_end` or `error`.
    /// Cancellation (the sink answering [`StreamControl::Stop`] or `cancel`
    /// firing) is observed at fragment boundaries and unwinds like a failure.
    ///
    /// # Returns
    ///
    /// Returns `Completed` with the stored assistant message, `Failed` with
    /// the error sent to the sink, or `Cancelled`
    pub async fn stream(
        &self,
        turn: PreparedTurn,
        sink: &mut dyn TurnSink,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let PreparedTurn {
            session,
            user_id,
            prompt,
            model,
        } = turn;
        let mut state = TurnState::Idle;
        let recorder = UsageRecorder::start(self.usage.clone(), user_id, &model, prompt.clone());
        info!(
            "Starting turn in session {} for user {} with model {}",
            session.id, user_id, model.name
        );

        let user_message = match self
            .chats
            .append_message(NewMessage::user(session.id, &prompt))
            .await
        {
            Ok(message) => message,
            Err(e) => {
                let error = format!("Failed to save user message: {}", e);
                return fail_turn(sink, &recorder, &mut state, "", error, false).await;
            }
        };

        if emit(sink, cancel, TurnEvent::UserMessage { message: user_message.clone() })
            == StreamControl::Stop
        {
            return fail_turn(sink, &recorder, &mut state, "", cancelled(), true).await;
        }

        let history = match self.load_history(session.id, user_message.id).await {
            Ok(history) => history,
            Err(e) => {
                let error = format!("Failed to load history: {}", e);
                return fail_turn(sink, &recorder, &mut state, "", error, false).await;
            }
        };
        advance(&mut state, TurnState::HistoryLoaded, session.id);

        let provider = match self.providers.create_provider(&model) {
            Ok(provider) => provider,
            Err(e) => {
                return fail_turn(sink, &recorder, &mut state, "", e.to_string(), false).await;
            }
        };
        advance(&mut state, TurnState::ProviderInvoked, session.id);

        let start = TurnEvent::StreamStart {
            model: model.display_name.clone(),
            model_id: model.id,
        };
        if emit(sink, cancel, start) == StreamControl::Stop {
            return fail_turn(sink, &recorder, &mut state, "", cancelled(), true).await;
        }
        advance(&mut state, TurnState::Streaming, session.id);

        let mut text = String::new();
        let mut terminal: Option<StreamResult> = None;
        let mut stopped = false;
        let driven = {
            let mut relay = |event: StreamEvent| match event {
                StreamEvent::Delta(fragment) => {
                    text.push_str(&fragment);
                    let control = emit(sink, cancel, TurnEvent::StreamChunk { text: fragment });
                    if control == StreamControl::Stop {
                        stopped = true;
                    }
                    control
                }
                StreamEvent::Warning(message) => {
                    warn!("Provider stream warning: {}", message);
                    if cancel.is_cancelled() {
                        stopped = true;
                        StreamControl::Stop
                    } else {
                        StreamControl::Continue
                    }
                }
                StreamEvent::Finished(usage) => {
                    terminal = Some(StreamResult::Finished(usage));
                    StreamControl::Continue
                }
                StreamEvent::Failed(message) => {
                    terminal = Some(StreamResult::Failed(message));
                    StreamControl::Continue
                }
            };

            tokio::select! {
                biased;
                end = drive_stream(provider.as_ref(), &prompt, &history, &mut relay) => Some(end),
                _ = cancel.cancelled() => None,
            }
        };

        if driven.is_none() || stopped {
            return fail_turn(sink, &recorder, &mut state, &text, cancelled(), true).await;
        }

        let vendor_usage = match terminal {
            Some(StreamResult::Finished(usage)) => usage,
            Some(StreamResult::Failed(message)) => {
                return fail_turn(sink, &recorder, &mut state, &text, message, false).await;
            }
            None => {
                return fail_turn(sink, &recorder, &mut state, &text, cancelled(), true).await;
            }
        };

        if text.is_empty() {
            let error = ChatError::EmptyResponse.to_string();
            return fail_turn(sink, &recorder, &mut state, &text, error, false).await;
        }

        let summary = UsageSummary::resolve(vendor_usage, &prompt, &text, recorder.elapsed());
        let assistant = NewMessage::assistant(
            session.id,
            text.clone(),
            model.id,
            usage_metadata(&summary),
        );
        let assistant_message = match self.chats.append_message(assistant).await {
            Ok(message) => message,
            Err(e) => {
                let error = format!("Failed to save assistant message: {}", e);
                return fail_turn(sink, &recorder, &mut state, &text, error, false).await;
            }
        };

        recorder
            .record_success(&summary, &text, assistant_message.id)
            .await;
        sink.send(TurnEvent::StreamEnd {
            message_id: assistant_message.id,
            full_text: text,
        });
        advance(&mut state, TurnState::Completed, session.id);
        info!(
            "Turn completed in session {} ({} tokens, {} ms)",
            session.id, summary.total_tokens, summary.duration_ms
        );

        TurnOutcome::Completed {
            assistant_message,
            usage: summary,
        }
    }

    /// Run a turn with a single blocking provider call
    ///
    /// # Errors
    ///
    /// Validation, ownership, and model errors as for [`prepare`](Self::prepare);
    /// provider and persistence errors after the user message was saved. An
    /// error usage record is written for the latter.
    pub async fn respond(&self, request: TurnRequest) -> Result<TurnReply> {
        let turn = self.prepare(request).await?;
        let recorder = UsageRecorder::start(
            self.usage.clone(),
            turn.user_id,
            &turn.model,
            turn.prompt.clone(),
        );

        let result = self.complete_turn(&turn, &recorder).await;
        if let Err(e) = &result {
            error!("Turn in session {} failed: {:#}", turn.session.id, e);
            recorder.record_error("", &e.to_string()).await;
        }
        result
    }

    async fn complete_turn(
        &self,
        turn: &PreparedTurn,
        recorder: &UsageRecorder,
    ) -> Result<TurnReply> {
        let session_id = turn.session.id;
        let user_message = self
            .chats
            .append_message(NewMessage::user(session_id, &turn.prompt))
            .await?;
        let history = self.load_history(session_id, user_message.id).await?;
        let provider: Box<dyn Provider> = self.providers.create_provider(&turn.model)?;

        let response = provider.complete(&turn.prompt, &history).await?;
        if response.content.is_empty() {
            return Err(ChatError::EmptyResponse.into());
        }

        let summary = UsageSummary::resolve(
            response.usage,
            &turn.prompt,
            &response.content,
            recorder.elapsed(),
        );
        let assistant_message = self
            .chats
            .append_message(NewMessage::assistant(
                session_id,
                response.content.clone(),
                turn.model.id,
                usage_metadata(&summary),
            ))
            .await?;
        recorder
            .record_success(&summary, &response.content, assistant_message.id)
            .await;

        Ok(TurnReply {
            user_message,
            assistant_message,
            usage: summary,
        })
    }

    /// Prior conversation for the provider, excluding the new user turn
    async fn load_history(&self, session_id: i64, exclude_id: i64) -> Result<Vec<Message>> {
        let messages = self.chats.list_messages(session_id).await?;
        Ok(messages
            .iter()
            .filter(|m| m.id != exclude_id)
            .map(ChatMessage::to_provider_message)
            .collect())
    }
}

/// Send an event, folding the transport's cancellation into the answer
fn emit(sink: &mut dyn TurnSink, cancel: &CancellationToken, event: TurnEvent) -> StreamControl {
    if sink.send(event) == StreamControl::Stop || cancel.is_cancelled() {
        StreamControl::Stop
    } else {
        StreamControl::Continue
    }
}

fn advance(state: &mut TurnState, next: TurnState, session_id: i64) {
    debug!("Turn in session {}: {} -> {}", session_id, state, next);
    *state = next;
}

fn cancelled() -> String {
    "Turn cancelled by client".to_string()
}

/// Emit the single error event and the single error usage record
async fn fail_turn(
    sink: &mut dyn TurnSink,
    recorder: &UsageRecorder,
    state: &mut TurnState,
    partial: &str,
    error: String,
    was_cancelled: bool,
) -> TurnOutcome {
    if was_cancelled {
        info!("Turn cancelled in state {}", state);
    } else {
        error!("Turn failed in state {}: {}", state, error);
    }
    *state = TurnState::Failed;

    sink.send(TurnEvent::Error {
        error: error.clone(),
    });
    recorder.record_error(partial, &error).await;

    if was_cancelled {
        TurnOutcome::Cancelled
    } else {
        TurnOutcome::Failed { error }
    }
}

fn usage_metadata(summary: &UsageSummary) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("prompt_tokens".into(), Value::from(summary.prompt_tokens));
    metadata.insert("completion_tokens".into(), Value::from(summary.completion_tokens));
    metadata.insert("total_tokens".into(), Value::from(summary.total_tokens));
    metadata.insert("duration_ms".into(), Value::from(summary.duration_ms));
    metadata.insert("usage_source".into(), Value::from(summary.source.as_str()));
    metadata
}
