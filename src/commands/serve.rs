//! API server command

use crate::auth::JwtAuth;
use crate::chat::ChatService;
use crate::commands::open_storage;
use crate::config::Config;
use crate::error::Result;
use crate::providers::ConfiguredProviderFactory;
use crate::registry::ModelRegistry;
use crate::server::{self, AppState};
use crate::storage::SqliteStorage;
use crate::usage;
use std::sync::Arc;

/// Wire the store, registry, providers, and verifier into handler state
///
/// Seeds the registry from `config.models` first.
///
/// # Errors
///
/// Returns an error if the model seeds are inconsistent or cannot be written,
/// or if the HTTP client cannot be built.
pub async fn build_state(config: &Config, storage: SqliteStorage) -> Result<AppState> {
    let storage = Arc::new(storage);
    let registry = ModelRegistry::new(storage.clone());
    registry.sync(&config.models).await?;

    let providers = Arc::new(ConfiguredProviderFactory::new(config.providers.clone())?);
    let chat = Arc::new(ChatService::new(
        storage.clone(),
        storage.clone(),
        registry,
        providers,
    ));

    Ok(AppState {
        chat,
        chats: storage.clone(),
        usage: storage,
        verifier: Arc::new(JwtAuth::new(&config.auth)),
    })
}

/// Run the HTTP API until interrupted
pub async fn run_serve(config: Config) -> Result<()> {
    usage::init_metrics_exporter();
    let state = build_state(&config, open_storage(&config)?).await?;
    server::serve(&config.server.bind, state).await
}
