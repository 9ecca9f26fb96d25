//! Model listing command
//!
//! Seeds the registry from configuration and prints the enabled models.

use crate::commands::open_storage;
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::registry::ModelRegistry;
use crate::storage::AiModel;
use prettytable::{row, Table};
use std::sync::Arc;

/// List enabled models
///
/// Seeds the registry from configuration first, so a fresh database lists
/// the configured models.
///
/// # Arguments
///
/// * `config` - Loaded configuration (storage path and model seeds)
/// * `json` - Print a JSON array instead of a table
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the model seeds are
/// inconsistent.
pub async fn list_models(config: &Config, json: bool) -> Result<()> {
    let registry = ModelRegistry::new(Arc::new(open_storage(config)?));
    registry.sync(&config.models).await?;
    let models = registry.list_enabled().await?;
    tracing::debug!("Listing {} enabled models", models.len());

    if json {
        println!("{}", render_models_json(&models)?);
    } else {
        output_models_table(&models);
    }
    Ok(())
}

/// Pretty JSON array of models
fn render_models_json(models: &[AiModel]) -> Result<String> {
    serde_json::to_string_pretty(models).map_err(|e| ChatError::Serialization(e).into())
}

fn output_models_table(models: &[AiModel]) {
    if models.is_empty() {
        println!("\nNo enabled models. Add entries under `models:` in the configuration.\n");
        return;
    }

    let mut table = Table::new();
    table.add_row(row!["ID", "Name", "Display Name", "Provider", "Type", "Default"]);
    for model in models {
        let default = if model.is_default { "yes" } else { "" };
        table.add_row(row![
            model.id,
            model.name,
            model.display_name,
            model.provider,
            model.model_type,
            default
        ]);
    }

    println!("\nEnabled models:\n");
    table.printstd();
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSeed;

    #[test]
    fn test_render_models_json_is_array() {
        let models = vec![AiModel::from_seed(1, &ModelSeed::new("glm-4", "zhipu"))];
        let json = render_models_json(&models).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "glm-4");
        assert_eq!(parsed[0]["provider"], "zhipu");
    }

    #[tokio::test]
    async fn test_list_models_with_seeded_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = Some(dir.path().join("models.db"));
        config.models = vec![ModelSeed::new("glm-4", "zhipu")];

        list_models(&config, true).await.unwrap();
        list_models(&config, false).await.unwrap();
    }
}
