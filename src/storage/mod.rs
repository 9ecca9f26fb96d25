use crate::config::ModelSeed;
use crate::error::{ChatError, Result};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod types;
pub use types::{
    AiModel, ChatMessage, ChatSession, MessageRole, Metadata, NewMessage, NewUsageRecord,
    UsageRecord, UsageStatus,
};

/// Sessions and their append-only message log
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_session(&self, user_id: i64, title: &str) -> Result<ChatSession>;

    /// Fetch a live session owned by `user_id`
    ///
    /// # Errors
    ///
    /// `SessionNotFound` when the session is missing, tombstoned, or owned by
    /// another user.
    async fn get_session(&self, id: i64, user_id: i64) -> Result<ChatSession>;

    /// Live sessions owned by `user_id`, newest first
    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>>;

    /// Tombstone a session; its messages are kept
    async fn delete_session(&self, id: i64, user_id: i64) -> Result<()>;

    /// Messages in insertion order
    async fn list_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>>;

    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage>;
}

/// Model configuration rows
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// All models, enabled or not, ordered by id
    async fn list_models(&self) -> Result<Vec<AiModel>>;

    async fn get_model(&self, id: i64) -> Result<Option<AiModel>>;

    async fn get_model_by_name(&self, name: &str) -> Result<Option<AiModel>>;

    /// Insert or update by name; a default seed clears other defaults of its type
    async fn upsert_model(&self, seed: &ModelSeed) -> Result<AiModel>;
}

/// Usage audit trail
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record_usage(&self, record: NewUsageRecord) -> Result<UsageRecord>;

    /// Records for `user_id`, newest first
    async fn list_usage(&self, user_id: i64) -> Result<Vec<UsageRecord>>;
}

/// SQLite backend for sessions, messages, models, and usage
///
/// Every operation opens its own connection, so the handle is cheap to clone
/// and share across tasks.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db_path: PathBuf,
}

const SESSION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, model_id, metadata, created_at, updated_at";
const MODEL_COLUMNS: &str = "id, name, display_name, provider, model_type, url, max_tokens, \
     temperature, top_p, presence_penalty, frequency_penalty, enabled, is_default, class, \
     class_id, description, api_parameters, price_per_1k_tokens, created_at, updated_at";
const USAGE_COLUMNS: &str = "id, user_id, model_id, message_id, prompt, response, \
     prompt_tokens, completion_tokens, total_tokens, duration_ms, status, error_message, cost, \
     created_at";

impl SqliteStorage {
    /// Create a storage instance in the platform data directory
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "chatbridge", "chatbridge")
            .ok_or_else(|| ChatError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| ChatError::Storage(e.to_string()))?;

        Self::new_with_path(data_dir.join("chatbridge.db"))
    }

    /// Create a storage instance backed by the given database file
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("chat.db")).unwrap();
    /// assert!(storage.path().exists());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| ChatError::Storage(e.to_string()))?;
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage_error("Failed to set busy timeout"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_error("Failed to enable foreign keys"))?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_chat_sessions_user
                ON chat_sessions(user_id, created_at);

            CREATE TABLE IF NOT EXISTS ai_models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                model_type TEXT NOT NULL,
                url TEXT,
                max_tokens INTEGER NOT NULL,
                temperature REAL NOT NULL,
                top_p REAL NOT NULL,
                presence_penalty REAL NOT NULL,
                frequency_penalty REAL NOT NULL,
                enabled INTEGER NOT NULL,
                is_default INTEGER NOT NULL,
                class TEXT,
                class_id TEXT,
                description TEXT,
                api_parameters TEXT,
                price_per_1k_tokens REAL NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES chat_sessions(id),
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                model_id INTEGER,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session_order
                ON messages(session_id, id);

            CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                model_id INTEGER NOT NULL,
                message_id INTEGER,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('success', 'error')),
                error_message TEXT,
                cost REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_records_user
                ON usage_records(user_id, created_at);",
        )
        .map_err(storage_error("Failed to create tables"))?;
        Ok(())
    }

    /// Create a session for `user_id`
    pub fn insert_session(&self, user_id: i64, title: &str) -> Result<ChatSession> {
        let conn = self.open()?;
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO chat_sessions (user_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
            params![user_id, title, now, now],
        )
        .map_err(storage_error("Failed to insert session"))?;
        let id = conn.last_insert_rowid();

        conn.query_row(
            &format!("SELECT {} FROM chat_sessions WHERE id = ?", SESSION_COLUMNS),
            params![id],
            session_from_row,
        )
        .map_err(storage_error("Failed to read back session"))
        .map_err(Into::into)
    }

    /// Fetch a live session owned by `user_id`
    pub fn find_session(&self, id: i64, user_id: i64) -> Result<ChatSession> {
        let conn = self.open()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM chat_sessions
                 WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
                SESSION_COLUMNS
            ),
            params![id, user_id],
            session_from_row,
        )
        .optional()
        .map_err(storage_error("Failed to query session"))?
        .ok_or_else(|| ChatError::SessionNotFound(id).into())
    }

    /// Live sessions for `user_id`, newest first
    pub fn query_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM chat_sessions
                 WHERE user_id = ? AND deleted_at IS NULL
                 ORDER BY created_at DESC, id DESC",
                SESSION_COLUMNS
            ))
            .map_err(storage_error("Failed to prepare session query"))?;
        let rows = stmt
            .query_map(params![user_id], session_from_row)
            .map_err(storage_error("Failed to query sessions"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error("Failed to read session row"))
            .map_err(Into::into)
    }

    /// Tombstone a live session owned by `user_id`
    ///
    /// # Arguments
    ///
    /// * `id` - Session to delete
    /// * `user_id` - Caller, who must own the session
    ///
    /// # Errors
    ///
    /// `SessionNotFound` when the session is missing, already deleted, or
    /// owned by another user
    pub fn tombstone_session(&self, id: i64, user_id: i64) -> Result<()> {
        let conn = self.open()?;
        let now = now_timestamp();
        let changed = conn
            .execute(
                "UPDATE chat_sessions SET deleted_at = ?, updated_at = ?
                 WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
                params![now, now, id, user_id],
            )
            .map_err(storage_error("Failed to delete session"))?;
        if changed == 0 {
            return Err(ChatError::SessionNotFound(id).into());
        }
        Ok(())
    }

    /// Messages of a session in conversational order
    ///
    /// Ordered by insertion id; `created_at` is wall-clock time and is kept
    /// for display only.
    pub fn query_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM messages WHERE session_id = ? ORDER BY id",
                MESSAGE_COLUMNS
            ))
            .map_err(storage_error("Failed to prepare message query"))?;
        let rows = stmt
            .query_map(params![session_id], message_from_row)
            .map_err(storage_error("Failed to query messages"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error("Failed to read message row"))
            .map_err(Into::into)
    }

    /// Append a message and touch the session's `updated_at`
    ///
    /// Both writes happen in one transaction.
    ///
    /// # Returns
    ///
    /// Returns the stored message with its assigned id and timestamps
    pub fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        let mut conn = self.open()?;
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize message metadata")
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        let now = now_timestamp();

        let tx = conn
            .transaction()
            .map_err(storage_error("Failed to start transaction"))?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, model_id, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                message.session_id,
                message.role.as_str(),
                message.content,
                message.model_id,
                metadata,
                now,
                now
            ],
        )
        .map_err(storage_error("Failed to insert message"))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE chat_sessions SET updated_at = ? WHERE id = ?",
            params![now, message.session_id],
        )
        .map_err(storage_error("Failed to touch session"))?;
        let stored = tx
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS),
                params![id],
                message_from_row,
            )
            .map_err(storage_error("Failed to read back message"))?;
        tx.commit()
            .map_err(storage_error("Failed to commit transaction"))?;

        Ok(stored)
    }

    /// All models ordered by id
    pub fn query_models(&self) -> Result<Vec<AiModel>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM ai_models ORDER BY id", MODEL_COLUMNS))
            .map_err(storage_error("Failed to prepare model query"))?;
        let rows = stmt
            .query_map([], model_from_row)
            .map_err(storage_error("Failed to query models"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error("Failed to read model row"))
            .map_err(Into::into)
    }

    /// Model row by id, enabled or not
    pub fn find_model(&self, id: i64) -> Result<Option<AiModel>> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {} FROM ai_models WHERE id = ?", MODEL_COLUMNS),
            params![id],
            model_from_row,
        )
        .optional()
        .map_err(storage_error("Failed to query model"))
        .map_err(Into::into)
    }

    /// Model row by unique name
    ///
    /// # Arguments
    ///
    /// * `name` - Vendor model identifier, e.g. `glm-4`
    ///
    /// # Returns
    ///
    /// Returns `None` when no row has that name
    pub fn find_model_by_name(&self, name: &str) -> Result<Option<AiModel>> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {} FROM ai_models WHERE name = ?", MODEL_COLUMNS),
            params![name],
            model_from_row,
        )
        .optional()
        .map_err(storage_error("Failed to query model"))
        .map_err(Into::into)
    }

    /// Insert or update a model from a configuration seed
    ///
    /// # Arguments
    ///
    /// * `seed` - Model definition; its `name` is the upsert key
    ///
    /// # Returns
    ///
    /// Returns the stored row. A default seed clears the default flag of
    /// every other model of the same `model_type`.
    pub fn save_model(&self, seed: &ModelSeed) -> Result<AiModel> {
        let mut conn = self.open()?;
        let api_parameters = seed
            .api_parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize api_parameters")
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        let now = now_timestamp();

        let tx = conn
            .transaction()
            .map_err(storage_error("Failed to start transaction"))?;
        if seed.is_default {
            tx.execute(
                "UPDATE ai_models SET is_default = 0, updated_at = ?
                 WHERE model_type = ? AND name <> ? AND is_default = 1",
                params![now, seed.model_type, seed.name],
            )
            .map_err(storage_error("Failed to clear previous default"))?;
        }
        tx.execute(
            "INSERT INTO ai_models (name, display_name, provider, model_type, url, max_tokens,
                temperature, top_p, presence_penalty, frequency_penalty, enabled, is_default,
                class, class_id, description, api_parameters, price_per_1k_tokens,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)
             ON CONFLICT(name) DO UPDATE SET
                display_name = excluded.display_name,
                provider = excluded.provider,
                model_type = excluded.model_type,
                url = excluded.url,
                max_tokens = excluded.max_tokens,
                temperature = excluded.temperature,
                top_p = excluded.top_p,
                presence_penalty = excluded.presence_penalty,
                frequency_penalty = excluded.frequency_penalty,
                enabled = excluded.enabled,
                is_default = excluded.is_default,
                class = excluded.class,
                class_id = excluded.class_id,
                description = excluded.description,
                api_parameters = excluded.api_parameters,
                price_per_1k_tokens = excluded.price_per_1k_tokens,
                updated_at = excluded.updated_at",
            params![
                seed.name,
                seed.display_name,
                seed.provider,
                seed.model_type,
                seed.url,
                seed.max_tokens,
                seed.temperature,
                seed.top_p,
                seed.presence_penalty,
                seed.frequency_penalty,
                seed.enabled,
                seed.is_default,
                seed.class,
                seed.class_id,
                seed.description,
                api_parameters,
                seed.price_per_1k_tokens,
                now
            ],
        )
        .map_err(storage_error("Failed to upsert model"))?;
        let stored = tx
            .query_row(
                &format!("SELECT {} FROM ai_models WHERE name = ?", MODEL_COLUMNS),
                params![seed.name],
                model_from_row,
            )
            .map_err(storage_error("Failed to read back model"))?;
        tx.commit()
            .map_err(storage_error("Failed to commit transaction"))?;

        Ok(stored)
    }

    /// Append one usage row
    pub fn insert_usage(&self, record: &NewUsageRecord) -> Result<UsageRecord> {
        let conn = self.open()?;
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO usage_records (user_id, model_id, message_id, prompt, response,
                prompt_tokens, completion_tokens, total_tokens, duration_ms, status,
                error_message, cost, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.user_id,
                record.model_id,
                record.message_id,
                record.prompt,
                record.response,
                record.prompt_tokens,
                record.completion_tokens,
                record.total_tokens,
                record.duration_ms,
                record.status.as_str(),
                record.error_message,
                record.cost,
                now
            ],
        )
        .map_err(storage_error("Failed to insert usage record"))?;
        let id = conn.last_insert_rowid();

        conn.query_row(
            &format!("SELECT {} FROM usage_records WHERE id = ?", USAGE_COLUMNS),
            params![id],
            usage_from_row,
        )
        .map_err(storage_error("Failed to read back usage record"))
        .map_err(Into::into)
    }

    /// Usage rows for `user_id`, newest first
    pub fn query_usage(&self, user_id: i64) -> Result<Vec<UsageRecord>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM usage_records WHERE user_id = ? ORDER BY created_at DESC, id DESC",
                USAGE_COLUMNS
            ))
            .map_err(storage_error("Failed to prepare usage query"))?;
        let rows = stmt
            .query_map(params![user_id], usage_from_row)
            .map_err(storage_error("Failed to query usage records"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error("Failed to read usage row"))
            .map_err(Into::into)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStorage) -> Result<T> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || op(&storage))
            .await
            .map_err(|e| ChatError::Storage(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl ChatStore for SqliteStorage {
    async fn create_session(&self, user_id: i64, title: &str) -> Result<ChatSession> {
        let title = title.to_string();
        self.blocking(move |s| s.insert_session(user_id, &title))
            .await
    }

    async fn get_session(&self, id: i64, user_id: i64) -> Result<ChatSession> {
        self.blocking(move |s| s.find_session(id, user_id)).await
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        self.blocking(move |s| s.query_sessions(user_id)).await
    }

    async fn delete_session(&self, id: i64, user_id: i64) -> Result<()> {
        self.blocking(move |s| s.tombstone_session(id, user_id))
            .await
    }

    async fn list_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        self.blocking(move |s| s.query_messages(session_id)).await
    }

    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage> {
        self.blocking(move |s| s.insert_message(&message)).await
    }
}

#[async_trait]
impl ModelStore for SqliteStorage {
    async fn list_models(&self) -> Result<Vec<AiModel>> {
        self.blocking(|s| s.query_models()).await
    }

    async fn get_model(&self, id: i64) -> Result<Option<AiModel>> {
        self.blocking(move |s| s.find_model(id)).await
    }

    async fn get_model_by_name(&self, name: &str) -> Result<Option<AiModel>> {
        let name = name.to_string();
        self.blocking(move |s| s.find_model_by_name(&name)).await
    }

    async fn upsert_model(&self, seed: &ModelSeed) -> Result<AiModel> {
        let seed = seed.clone();
        self.blocking(move |s| s.save_model(&seed)).await
    }
}

#[async_trait]
impl UsageStore for SqliteStorage {
    async fn record_usage(&self, record: NewUsageRecord) -> Result<UsageRecord> {
        self.blocking(move |s| s.insert_usage(&record)).await
    }

    async fn list_usage(&self, user_id: i64) -> Result<Vec<UsageRecord>> {
        self.blocking(move |s| s.query_usage(user_id)).await
    }
}

fn storage_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> ChatError {
    move |e| ChatError::Storage(format!("{}: {}", context, e))
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: timestamp(row, 3)?,
        updated_at: timestamp(row, 4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(2)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role.parse().map_err(|e| conversion_error(2, e))?,
        content: row.get(3)?,
        model_id: row.get(4)?,
        metadata: json_column(row, 5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<AiModel> {
    Ok(AiModel {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        provider: row.get(3)?,
        model_type: row.get(4)?,
        url: row.get(5)?,
        max_tokens: row.get(6)?,
        temperature: row.get(7)?,
        top_p: row.get(8)?,
        presence_penalty: row.get(9)?,
        frequency_penalty: row.get(10)?,
        enabled: row.get(11)?,
        is_default: row.get(12)?,
        class: row.get(13)?,
        class_id: row.get(14)?,
        description: row.get(15)?,
        api_parameters: json_column(row, 16)?,
        price_per_1k_tokens: row.get(17)?,
        created_at: timestamp(row, 18)?,
        updated_at: timestamp(row, 19)?,
    })
}

fn usage_from_row(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let status: String = row.get(10)?;
    Ok(UsageRecord {
        id: row.get(0)?,
        record: NewUsageRecord {
            user_id: row.get(1)?,
            model_id: row.get(2)?,
            message_id: row.get(3)?,
            prompt: row.get(4)?,
            response: row.get(5)?,
            prompt_tokens: row.get(6)?,
            completion_tokens: row.get(7)?,
            total_tokens: row.get(8)?,
            duration_ms: row.get(9)?,
            status: status.parse().map_err(|e| conversion_error(10, e))?,
            error_message: row.get(11)?,
            cost: row.get(12)?,
        },
        created_at: timestamp(row, 13)?,
    })
}
