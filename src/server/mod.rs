//! HTTP API
//!
//! All `/api` routes require a bearer token. Turn events are pushed over SSE
//! as `message` events whose JSON body carries a `type` discriminator.

pub mod error;
pub mod extract;
pub mod handlers;

use crate::auth::TokenVerifier;
use crate::chat::ChatService;
use crate::error::Result;
use crate::storage::{ChatStore, UsageStore};

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

/// Shared handles injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub chats: Arc<dyn ChatStore>,
    pub usage: Arc<dyn UsageStore>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Build the application router
///
/// # Arguments
///
/// * `state` - Shared service and store handles
///
/// # Returns
///
/// Returns a router ready for `axum::serve` or `tower::ServiceExt::oneshot`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/chat",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route("/api/chat/:id", delete(handlers::delete_session))
        .route(
            "/api/chat/:id/message",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route("/api/chat/:id/message/sync", post(handlers::send_message_sync))
        .route("/api/ai/model", get(handlers::list_models))
        .route("/api/ai/model_usage", get(handlers::list_usage))
        .with_state(state)
}

/// Serve the API on `bind` until Ctrl-C
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
