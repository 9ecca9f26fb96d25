/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `serve`: Run the HTTP API
- `models`: List the models seeded from configuration
- `token`: Issue an access token for an operator-chosen user id
*/

use crate::config::Config;
use crate::error::Result;
use crate::storage::SqliteStorage;

pub mod models;
pub mod serve;
pub mod token;

/// Open the SQLite store named by configuration, or the platform default
pub fn open_storage(config: &Config) -> Result<SqliteStorage> {
    let storage = match &config.storage.path {
        Some(path) => SqliteStorage::new_with_path(path.clone())?,
        None => SqliteStorage::new()?,
    };
    tracing::debug!("Using database at {}", storage.path().display());
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_storage_uses_configured_path() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = Some(dir.path().join("nested").join("chat.db"));

        let storage = open_storage(&config).unwrap();
        assert_eq!(storage.path(), dir.path().join("nested").join("chat.db"));
        assert!(storage.path().exists());
    }
}
