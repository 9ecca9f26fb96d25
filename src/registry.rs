//! Model registry
//!
//! Resolves logical model identifiers to their configuration rows. Reads go
//! straight to the model store on every call; nothing is cached.

use crate::config::ModelSeed;
use crate::error::{ChatError, Result};
use crate::storage::{AiModel, ModelStore};

use std::collections::HashMap;
use std::sync::Arc;

/// Chat type served by conversational turns
pub const DEFAULT_MODEL_TYPE: &str = "chat";

/// Read-mostly view over configured models
#[derive(Clone)]
pub struct ModelRegistry {
    store: Arc<dyn ModelStore>,
}

impl ModelRegistry {
    /// Create a registry over `store`
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    /// Enabled models ordered by id
    pub async fn list_enabled(&self) -> Result<Vec<AiModel>> {
        let models = self.store.list_models().await?;
        Ok(models.into_iter().filter(|m| m.enabled).collect())
    }

    /// Look up an enabled model by id
    ///
    /// # Errors
    ///
    /// `ModelNotFound` when the id is unknown or the model is disabled.
    pub async fn get_by_id(&self, id: i64) -> Result<AiModel> {
        self.store
            .get_model(id)
            .await?
            .filter(|m| m.enabled)
            .ok_or_else(|| ChatError::ModelNotFound(id.to_string()).into())
    }

    /// Look up an enabled model by its unique name
    pub async fn get_by_name(&self, name: &str) -> Result<AiModel> {
        self.store
            .get_model_by_name(name)
            .await?
            .filter(|m| m.enabled)
            .ok_or_else(|| ChatError::ModelNotFound(name.to_string()).into())
    }

    /// Default model for conversational turns
    ///
    /// Prefers the enabled model flagged default for the chat type, then the
    /// first enabled chat model, then the first enabled model of any type.
    ///
    /// # Errors
    ///
    /// `NoDefaultModel` when no model is enabled.
    pub async fn get_default(&self) -> Result<AiModel> {
        let enabled = self.list_enabled().await?;

        if let Some(model) = enabled
            .iter()
            .find(|m| m.is_default && m.model_type == DEFAULT_MODEL_TYPE)
        {
            return Ok(model.clone());
        }

        let fallback = enabled
            .iter()
            .find(|m| m.model_type == DEFAULT_MODEL_TYPE)
            .or_else(|| enabled.first())
            .cloned()
            .ok_or(ChatError::NoDefaultModel)?;
        tracing::warn!(
            "No enabled default model; falling back to {} (id={})",
            fallback.name,
            fallback.id
        );
        Ok(fallback)
    }

    /// Resolve an optional explicit model id, falling back to the default
    ///
    /// A lookup failure for the explicit id is logged, not returned.
    ///
    /// # Arguments
    ///
    /// * `model_id` - Model requested by the caller, if any
    ///
    /// # Returns
    ///
    /// Returns the requested model when it exists and is enabled, otherwise
    /// the default model
    ///
    /// # Errors
    ///
    /// `NoDefaultModel` when the fallback finds no enabled model.
    pub async fn resolve(&self, model_id: Option<i64>) -> Result<AiModel> {
        if let Some(id) = model_id {
            match self.get_by_id(id).await {
                Ok(model) => return Ok(model),
                Err(e) => {
                    tracing::warn!("Model {} unavailable ({}); using default model", id, e)
                }
            }
        }
        self.get_default().await
    }

    /// Upsert model definitions from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if more than one seed is flagged default
    /// for the same `model_type`; nothing is written in that case.
    pub async fn sync(&self, seeds: &[ModelSeed]) -> Result<Vec<AiModel>> {
        let mut defaults: HashMap<&str, &str> = HashMap::new();
        for seed in seeds.iter().filter(|s| s.is_default) {
            if let Some(existing) = defaults.insert(&seed.model_type, &seed.name) {
                return Err(ChatError::Config(format!(
                    "Models '{}' and '{}' are both default for type '{}'",
                    existing, seed.name, seed.model_type
                ))
                .into());
            }
        }

        let mut synced = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let model = self.store.upsert_model(seed).await?;
            tracing::debug!("Synced model {} (id={})", model.name, model.id);
            synced.push(model);
        }
        tracing::info!("Synced {} model definitions", synced.len());
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use tempfile::tempdir;

    fn seed(name: &str, is_default: bool, enabled: bool) -> ModelSeed {
        ModelSeed {
            is_default,
            enabled,
            ..ModelSeed::new(name, "zhipu")
        }
    }

    fn registry() -> (ModelRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new_with_path(dir.path().join("models.db")).unwrap();
        (ModelRegistry::new(Arc::new(storage)), dir)
    }

    fn assert_chat_error(err: &anyhow::Error, check: impl Fn(&ChatError) -> bool) {
        let chat = err.downcast_ref::<ChatError>().expect("ChatError");
        assert!(check(chat), "unexpected error: {}", chat);
    }

    #[tokio::test]
    async fn test_disabled_model_is_not_found() {
        let (registry, _dir) = registry();
        let synced = registry
            .sync(&[seed("on", true, true), seed("off", false, false)])
            .await
            .unwrap();

        assert_eq!(registry.list_enabled().await.unwrap().len(), 1);
        let err = registry.get_by_id(synced[1].id).await.unwrap_err();
        assert_chat_error(&err, |e| matches!(e, ChatError::ModelNotFound(_)));
        assert!(registry.get_by_name("off").await.is_err());
        assert_eq!(registry.get_by_name("on").await.unwrap().id, synced[0].id);
    }

    #[tokio::test]
    async fn test_default_prefers_flagged_model() {
        let (registry, _dir) = registry();
        registry
            .sync(&[seed("a", false, true), seed("b", true, true)])
            .await
            .unwrap();
        assert_eq!(registry.get_default().await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn test_default_falls_back_to_first_enabled() {
        let (registry, _dir) = registry();
        registry
            .sync(&[seed("flagged-but-off", true, false), seed("x", false, true)])
            .await
            .unwrap();
        assert_eq!(registry.get_default().await.unwrap().name, "x");
    }

    #[tokio::test]
    async fn test_no_enabled_models_is_no_default() {
        let (registry, _dir) = registry();
        registry.sync(&[seed("off", true, false)]).await.unwrap();
        let err = registry.get_default().await.unwrap_err();
        assert_chat_error(&err, |e| matches!(e, ChatError::NoDefaultModel));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_falls_back() {
        let (registry, _dir) = registry();
        registry.sync(&[seed("glm-4", true, true)]).await.unwrap();
        assert_eq!(registry.resolve(Some(9999)).await.unwrap().name, "glm-4");
        assert_eq!(registry.resolve(None).await.unwrap().name, "glm-4");
    }

    #[tokio::test]
    async fn test_sync_rejects_two_defaults_per_type() {
        let (registry, _dir) = registry();
        let err = registry
            .sync(&[seed("a", true, true), seed("b", true, true)])
            .await
            .unwrap_err();
        assert_chat_error(&err, |e| matches!(e, ChatError::Config(_)));
        assert!(registry.list_enabled().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_allows_one_default_per_type() {
        let (registry, _dir) = registry();
        let mut agent = seed("agent", true, true);
        agent.model_type = "agent".into();
        registry
            .sync(&[seed("chat", true, true), agent])
            .await
            .unwrap();
        assert_eq!(registry.get_default().await.unwrap().name, "chat");
    }
}
