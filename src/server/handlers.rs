//! Route handlers
//!
//! `POST /api/chat/:id/message` answers validation failures with a plain
//! HTTP error and otherwise opens an SSE channel. The turn runs on its own
//! task; when the client goes away the response body (and with it the event
//! receiver) is dropped, which cancels the turn.

use super::error::ApiResult;
use super::extract::AuthUser;
use super::AppState;
use crate::chat::{TurnEvent, TurnOutcome, TurnReply, TurnRequest};
use crate::providers::StreamControl;
use crate::storage::{AiModel, ChatMessage, ChatSession, UsageRecord};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// SSE event name carried by every frame
const SSE_EVENT: &str = "message";

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct CreateSession {
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "New chat".to_string()
}

/// Body of the message routes
#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub content: String,
    #[serde(default)]
    pub model_id: Option<i64>,
}

/// `GET /health`: liveness check, no token required
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /api/chat`: start a session owned by the caller
///
/// A blank title becomes `New chat`.
pub async fn create_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateSession>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let title = request.title.trim();
    let title = if title.is_empty() { "New chat" } else { title };
    let session = state.chats.create_session(user.user_id(), title).await?;
    tracing::info!("Created session {} for user {}", session.id, user.user_id());
    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /api/chat`: the caller's live sessions, newest first
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<ChatSession>>> {
    Ok(Json(state.chats.list_sessions(user.user_id()).await?))
}

/// `DELETE /api/chat/:id`: tombstone a session; its messages are kept
pub async fn delete_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.chats.delete_session(session_id, user.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/chat/:id/message`: messages of one of the caller's sessions
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<i64>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let session = state.chats.get_session(session_id, user.user_id()).await?;
    Ok(Json(state.chats.list_messages(session.id).await?))
}

/// `POST /api/chat/:id/message`: stream a turn as SSE
///
/// # Returns
///
/// Returns an event stream of `message` frames, each carrying one JSON
/// [`TurnEvent`]. The stream closes after `stream_end` or `error`.
///
/// # Errors
///
/// Returns 400, 401, or 404 before any event is sent when the prompt is
/// empty, the token is invalid, or the session is not the caller's
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<i64>,
    Json(request): Json<SendMessage>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let turn = state
        .chat
        .prepare(TurnRequest {
            session_id,
            user_id: user.user_id(),
            content: request.content,
            model_id: request.model_id,
        })
        .await?;

    // The sink is synchronous, so the channel must never block a send.
    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let cancel = CancellationToken::new();
    let disconnect = cancel.clone().drop_guard();

    let service = Arc::clone(&state.chat);
    tokio::spawn(async move {
        let mut sink = move |event: TurnEvent| {
            let frame = match sse_frame(&event) {
                Some(frame) => frame,
                None => return StreamControl::Continue,
            };
            if tx.send(Ok(frame)).is_err() {
                tracing::info!("Client disconnected, cancelling turn in session {}", session_id);
                StreamControl::Stop
            } else {
                StreamControl::Continue
            }
        };

        match service.stream(turn, &mut sink, &cancel).await {
            TurnOutcome::Completed {
                assistant_message, ..
            } => tracing::debug!(
                "Streamed turn in session {} completed with message {}",
                session_id,
                assistant_message.id
            ),
            TurnOutcome::Failed { error } => {
                tracing::debug!("Streamed turn in session {} failed: {}", session_id, error)
            }
            TurnOutcome::Cancelled => {
                tracing::debug!("Streamed turn in session {} cancelled", session_id)
            }
        }
    });

    // Dropping the body drops the guard and cancels the turn.
    let events = UnboundedReceiverStream::new(rx).map(move |frame| {
        let _ = &disconnect;
        frame
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `POST /api/chat/:id/message/sync`: run a turn and answer with both messages
pub async fn send_message_sync(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<i64>,
    Json(request): Json<SendMessage>,
) -> ApiResult<Json<TurnReply>> {
    let reply = state
        .chat
        .respond(TurnRequest {
            session_id,
            user_id: user.user_id(),
            content: request.content,
            model_id: request.model_id,
        })
        .await?;
    Ok(Json(reply))
}

/// `GET /api/ai/model`: enabled models
pub async fn list_models(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Vec<AiModel>>> {
    Ok(Json(state.chat.registry().list_enabled().await?))
}

/// `GET /api/ai/model_usage`: the caller's usage records, newest first
pub async fn list_usage(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<UsageRecord>>> {
    Ok(Json(state.usage.list_usage(user.user_id()).await?))
}

fn sse_frame(event: &TurnEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(SSE_EVENT).data(json)),
        Err(e) => {
            tracing::error!("Failed to serialize turn event: {}", e);
            None
        }
    }
}
