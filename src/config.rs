//! Configuration management for ChatBridge
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Provider identifiers the factory knows about
pub const KNOWN_PROVIDERS: [&str; 3] = ["zhipu", "coze", "openai"];

/// Main configuration structure for ChatBridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// SQLite store settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Access-token settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Upstream AI provider credentials and endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Models seeded into the registry at startup
    #[serde(default)]
    pub models: Vec<ModelSeed>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:8080`
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. When unset the platform data directory is used.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Access-token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret for access tokens
    #[serde(default = "default_auth_secret")]
    pub secret: String,

    /// `iss` claim written and required on access tokens
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Lifetime of issued access tokens (seconds)
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_auth_secret() -> String {
    "change-me".to_string()
}

fn default_issuer() -> String {
    "chatbridge".to_string()
}

fn default_token_ttl() -> u64 {
    24 * 60 * 60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_auth_secret(),
            issuer: default_issuer(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Zhipu (GLM) completion provider
    #[serde(default)]
    pub zhipu: ZhipuConfig,

    /// Coze agent/workflow provider
    #[serde(default)]
    pub coze: CozeConfig,
}

/// Zhipu provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZhipuConfig {
    /// Two-part API key in `id.secret` form
    #[serde(default)]
    pub api_key: Option<String>,

    /// Chat completions endpoint used when a model row has no URL
    #[serde(default = "default_zhipu_base_url")]
    pub base_url: String,

    /// Artificial pause before each relayed fragment (0 disables pacing)
    #[serde(default)]
    pub fragment_delay_ms: u64,

    /// Whole-request timeout for completion calls (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_zhipu_base_url() -> String {
    "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for ZhipuConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_zhipu_base_url(),
            fragment_delay_ms: 0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Coze provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CozeConfig {
    /// API base URL (also the OAuth audience)
    #[serde(default = "default_coze_api_base")]
    pub api_base: String,

    /// OAuth application client id
    #[serde(default)]
    pub client_id: Option<String>,

    /// Id of the public key registered for the OAuth application
    #[serde(default)]
    pub public_key_id: Option<String>,

    /// PEM-encoded RSA private key used to sign the JWT assertion
    #[serde(default)]
    pub private_key: Option<String>,

    /// Bot used when a model row does not carry a class id
    #[serde(default)]
    pub bot_id: Option<String>,

    /// Workflow used when a model row does not carry a class id
    #[serde(default)]
    pub workflow_id: Option<String>,

    /// How long a fetched access token is reused before refreshing (seconds)
    #[serde(default = "default_token_refresh")]
    pub token_refresh_secs: u64,

    /// Lifetime requested for access tokens (seconds)
    #[serde(default = "default_coze_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_coze_api_base() -> String {
    "https://api.coze.cn".to_string()
}

fn default_token_refresh() -> u64 {
    14 * 60
}

fn default_coze_token_ttl() -> u64 {
    15 * 60
}

impl Default for CozeConfig {
    fn default() -> Self {
        Self {
            api_base: default_coze_api_base(),
            client_id: None,
            public_key_id: None,
            private_key: None,
            bot_id: None,
            workflow_id: None,
            token_refresh_secs: default_token_refresh(),
            token_ttl_secs: default_coze_token_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

/// A model definition seeded into the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSeed {
    /// Unique model name sent to the vendor (e.g. `glm-4`)
    pub name: String,
    /// Human readable name shown to clients
    pub display_name: String,
    /// Provider identifier (`zhipu`, `coze`, ...)
    pub provider: String,
    /// Logical chat type; at most one default per type
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// Request URL overriding the provider default
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    /// Provider class tag (`bigmodel`, `workflow`, `bot`)
    #[serde(default)]
    pub class: Option<String>,
    /// Workflow or bot id for agent-style providers
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Extra vendor parameters passed through opaquely
    #[serde(default)]
    pub api_parameters: Option<serde_json::Value>,
    /// Price per thousand tokens used for cost estimates
    #[serde(default)]
    pub price_per_1k_tokens: f64,
}

fn default_model_type() -> String {
    "chat".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_enabled() -> bool {
    true
}

impl ModelSeed {
    /// Seed with default sampling parameters, enabled and not default
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            provider: provider.into(),
            model_type: default_model_type(),
            url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            enabled: default_enabled(),
            is_default: false,
            class: None,
            class_id: None,
            description: None,
            api_parameters: None,
            price_per_1k_tokens: 0.0,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(bind) = std::env::var("CHATBRIDGE_BIND") {
            self.server.bind = bind;
        }

        if let Ok(path) = std::env::var("CHATBRIDGE_DB") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(secret) = std::env::var("CHATBRIDGE_JWT_SECRET") {
            self.auth.secret = secret;
        }

        if let Ok(ttl) = std::env::var("CHATBRIDGE_TOKEN_TTL_SECS") {
            if let Ok(value) = ttl.parse() {
                self.auth.token_ttl_secs = value;
            } else {
                tracing::warn!("Invalid CHATBRIDGE_TOKEN_TTL_SECS: {}", ttl);
            }
        }

        if let Ok(json) = std::env::var("CHATBRIDGE_LOG_JSON") {
            self.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        // Zhipu
        if let Ok(key) = std::env::var("ZHIPU_API_KEY") {
            self.providers.zhipu.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("ZHIPU_BASE_URL") {
            self.providers.zhipu.base_url = url;
        }

        if let Ok(delay) = std::env::var("CHATBRIDGE_FRAGMENT_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.providers.zhipu.fragment_delay_ms = value;
            } else {
                tracing::warn!("Invalid CHATBRIDGE_FRAGMENT_DELAY_MS: {}", delay);
            }
        }

        // Coze
        let coze = &mut self.providers.coze;
        if let Ok(url) = std::env::var("COZE_API_URL") {
            coze.api_base = url;
        }
        if let Ok(client_id) = std::env::var("COZE_CLIENT_ID") {
            coze.client_id = Some(client_id);
        }
        if let Ok(key_id) = std::env::var("COZE_PUBLIC_KEY_ID") {
            coze.public_key_id = Some(key_id);
        }
        if let Ok(private_key) = std::env::var("COZE_PRIVATE_KEY") {
            coze.private_key = Some(private_key);
        }
        if let Ok(bot_id) = std::env::var("COZE_BOT_ID") {
            coze.bot_id = Some(bot_id);
        }
        if let Ok(workflow_id) = std::env::var("COZE_WORKFLOW_ID") {
            coze.workflow_id = Some(workflow_id);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let crate::cli::Commands::Serve {
            bind: Some(bind), ..
        } = &cli.command
        {
            self.server.bind = bind.clone();
        }

        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ChatError::Config(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            ))
            .into());
        }

        if self.auth.secret.is_empty() {
            return Err(ChatError::Config("auth.secret cannot be empty".to_string()).into());
        }
        if self.auth.secret == default_auth_secret() {
            tracing::warn!("auth.secret is the built-in default; set CHATBRIDGE_JWT_SECRET");
        }

        if self.auth.token_ttl_secs == 0 {
            return Err(
                ChatError::Config("auth.token_ttl_secs must be greater than 0".to_string()).into(),
            );
        }

        if url::Url::parse(&self.providers.zhipu.base_url).is_err() {
            return Err(ChatError::Config(format!(
                "providers.zhipu.base_url is not a valid URL: {}",
                self.providers.zhipu.base_url
            ))
            .into());
        }

        if self.providers.zhipu.request_timeout_secs == 0 {
            return Err(ChatError::Config(
                "providers.zhipu.request_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        let coze = &self.providers.coze;
        if url::Url::parse(&coze.api_base).is_err() {
            return Err(ChatError::Config(format!(
                "providers.coze.api_base is not a valid URL: {}",
                coze.api_base
            ))
            .into());
        }

        if coze.token_refresh_secs == 0 || coze.token_refresh_secs >= coze.token_ttl_secs {
            return Err(ChatError::Config(
                "providers.coze.token_refresh_secs must be between 1 and token_ttl_secs"
                    .to_string(),
            )
            .into());
        }

        self.validate_models()
    }

    fn validate_models(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut default_types = HashSet::new();

        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(ChatError::Config("models[].name cannot be empty".to_string()).into());
            }

            if !names.insert(model.name.as_str()) {
                return Err(
                    ChatError::Config(format!("Duplicate model name: {}", model.name)).into(),
                );
            }

            if !KNOWN_PROVIDERS.contains(&model.provider.as_str()) {
                return Err(ChatError::Config(format!(
                    "Invalid provider for model {}: {}. Must be one of: {}",
                    model.name,
                    model.provider,
                    KNOWN_PROVIDERS.join(", ")
                ))
                .into());
            }

            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(ChatError::Config(format!(
                    "Model {}: temperature must be between 0.0 and 2.0",
                    model.name
                ))
                .into());
            }

            if model.top_p <= 0.0 || model.top_p > 1.0 {
                return Err(ChatError::Config(format!(
                    "Model {}: top_p must be in (0.0, 1.0]",
                    model.name
                ))
                .into());
            }

            if model.is_default && !default_types.insert(model.model_type.as_str()) {
                return Err(ChatError::Config(format!(
                    "More than one default model for type {}",
                    model.model_type
                ))
                .into());
            }
        }

        Ok(())
    }
}
