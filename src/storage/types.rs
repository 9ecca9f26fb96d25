use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ModelSeed;
use crate::error::ChatError;
use crate::providers::Message;

/// Open key/value map attached to a message
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A conversation owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Row id
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// User-visible title
    pub title: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session last received a message
    pub updated_at: DateTime<Utc>,
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Wire and column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ChatError::Storage(format!("Unknown message role: {}", other))),
        }
    }
}

/// A persisted, immutable chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    /// Model that produced (or was asked to produce) this message
    pub model_id: Option<i64>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Convert into the shape sent to providers as conversation history
    pub fn to_provider_message(&self) -> Message {
        match self.role {
            MessageRole::User => Message::user(self.content.clone()),
            MessageRole::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// Insert payload for [`ChatMessage`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub model_id: Option<i64>,
    pub metadata: Option<Metadata>,
}

impl NewMessage {
    /// A user turn with no model or metadata
    pub fn user(session_id: i64, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role: MessageRole::User,
            content: content.into(),
            model_id: None,
            metadata: None,
        }
    }

    /// An assistant answer produced by `model_id`
    pub fn assistant(
        session_id: i64,
        content: impl Into<String>,
        model_id: i64,
        metadata: Metadata,
    ) -> Self {
        Self {
            session_id,
            role: MessageRole::Assistant,
            content: content.into(),
            model_id: Some(model_id),
            metadata: Some(metadata),
        }
    }
}

/// Configured AI model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiModel {
    pub id: i64,
    /// Unique name, also the vendor model identifier
    pub name: String,
    pub display_name: String,
    /// Provider identifier (`zhipu`, `coze`, ...)
    pub provider: String,
    /// Logical chat type; at most one default per type
    pub model_type: String,
    /// Request URL; falls back to the provider's base URL when absent
    pub url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub enabled: bool,
    pub is_default: bool,
    /// Provider class tag (`bigmodel`, `workflow`, `bot`)
    pub class: Option<String>,
    /// Workflow or bot id for agent providers
    pub class_id: Option<String>,
    pub description: Option<String>,
    /// Extra vendor parameters passed through verbatim
    pub api_parameters: Option<serde_json::Value>,
    pub price_per_1k_tokens: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiModel {
    /// Materialize a seed as a row with the given id, stamped now
    pub fn from_seed(id: i64, seed: &ModelSeed) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: seed.name.clone(),
            display_name: seed.display_name.clone(),
            provider: seed.provider.clone(),
            model_type: seed.model_type.clone(),
            url: seed.url.clone(),
            max_tokens: seed.max_tokens,
            temperature: seed.temperature,
            top_p: seed.top_p,
            presence_penalty: seed.presence_penalty,
            frequency_penalty: seed.frequency_penalty,
            enabled: seed.enabled,
            is_default: seed.is_default,
            class: seed.class.clone(),
            class_id: seed.class_id.clone(),
            description: seed.description.clone(),
            api_parameters: seed.api_parameters.clone(),
            price_per_1k_tokens: seed.price_per_1k_tokens,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of a provider invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

impl UsageStatus {
    /// Column value stored in `usage_records.status`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for UsageStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(ChatError::Storage(format!("Unknown usage status: {}", other))),
        }
    }
}

/// Insert payload for [`UsageRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUsageRecord {
    pub user_id: i64,
    pub model_id: i64,
    /// Assistant message this invocation produced, if any
    pub message_id: Option<i64>,
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub duration_ms: i64,
    pub status: UsageStatus,
    /// Set iff `status` is [`UsageStatus::Error`]
    pub error_message: Option<String>,
    /// Estimated cost in the model's pricing currency
    pub cost: f64,
}

/// Write-once audit row for one provider invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: NewUsageRecord,
    pub created_at: DateTime<Utc>,
}
