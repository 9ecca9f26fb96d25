//! Zhipu (BigModel) provider implementation
//!
//! Talks to the OpenAI-compatible chat completions endpoint. Every request
//! carries a freshly signed HS256 bearer credential derived from the
//! `id.secret` API key; credentials are never cached.

use crate::config::ZhipuConfig;
use crate::error::{ChatError, Result};
use crate::providers::sse::SseLines;
use crate::providers::{
    build_messages, CompletionResponse, Message, Provider, StreamControl, StreamRelay, TokenUsage,
};
use crate::storage::AiModel;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Model used when the row carries an empty name
const DEFAULT_MODEL: &str = "glm-4";

/// Lifetime of a signed credential
const TOKEN_LIFETIME_MS: i64 = 3_600_000;

/// Zhipu chat completions provider
///
/// # Examples
///
/// ```no_run
/// use chatbridge::config::{ModelSeed, ZhipuConfig};
/// use chatbridge::providers::{http_client, Provider, ZhipuProvider};
/// use chatbridge::storage::AiModel;
///
/// # async fn example() -> chatbridge::error::Result<()> {
/// let config = ZhipuConfig {
///     api_key: Some("key-id.key-secret".to_string()),
///     ..ZhipuConfig::default()
/// };
/// let model = AiModel::from_seed(1, &ModelSeed::new("glm-4", "zhipu"));
/// let provider = ZhipuProvider::new(&config, &model, http_client()?)?;
/// let answer = provider.complete("Hello!", &[]).await?;
/// println!("{}", answer.content);
/// # Ok(())
/// # }
/// ```
pub struct ZhipuProvider {
    client: Client,
    key_id: String,
    key_secret: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    presence_penalty: f64,
    frequency_penalty: f64,
    extra: serde_json::Map<String, serde_json::Value>,
    request_timeout: Duration,
    fragment_delay: Duration,
}

#[derive(Serialize)]
struct TokenHeader<'a> {
    alg: &'a str,
    sign_type: &'a str,
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    api_key: &'a str,
    exp: i64,
    timestamp: i64,
}

/// Request body for the completions endpoint
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "is_zero")]
    presence_penalty: f64,
    #[serde(skip_serializing_if = "is_zero")]
    frequency_penalty: f64,
    #[serde(flatten)]
    extra: &'a serde_json::Map<String, serde_json::Value>,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

/// Response envelope, shared by full responses and stream chunks
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceContent>,
    #[serde(default)]
    delta: Option<ChoiceContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

impl From<UsageBody> for TokenUsage {
    fn from(body: UsageBody) -> Self {
        let mut usage = TokenUsage::new(body.prompt_tokens, body.completion_tokens);
        if body.total_tokens > 0 {
            usage.total_tokens = body.total_tokens;
        }
        usage
    }
}

impl ZhipuProvider {
    /// Create a provider for `model` using the shared Zhipu settings
    ///
    /// # Arguments
    ///
    /// * `config` - Zhipu credentials, base URL and timeouts
    /// * `model` - Model row carrying the sampling parameters
    /// * `client` - Pooled HTTP client shared across providers
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` when no API key is configured, and a
    /// configuration error when the key is not of the form `id.secret`.
    pub fn new(config: &ZhipuConfig, model: &AiModel, client: Client) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ChatError::MissingCredential("zhipu".to_string()))?;
        let (key_id, key_secret) = api_key
            .split_once('.')
            .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
            .ok_or_else(|| {
                ChatError::Config("Zhipu API key must have the form <id>.<secret>".to_string())
            })?;

        let endpoint = model
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| config.base_url.clone());
        let model_name = if model.name.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            model.name.clone()
        };
        let extra = match &model.api_parameters {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };

        tracing::debug!(
            "Initialized Zhipu provider: endpoint={}, model={}",
            endpoint,
            model_name
        );

        Ok(Self {
            client,
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            endpoint,
            model: model_name,
            max_tokens: model.max_tokens,
            temperature: model.temperature,
            top_p: model.top_p,
            presence_penalty: model.presence_penalty,
            frequency_penalty: model.frequency_penalty,
            extra,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            fragment_delay: Duration::from_millis(config.fragment_delay_ms),
        })
    }

    /// Vendor model identifier sent with each request
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sign a bearer credential valid for one hour from now
    fn sign_token(&self) -> Result<String> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let header = serde_json::to_vec(&TokenHeader {
            alg: "HS256",
            sign_type: "SIGN",
        })?;
        let claims = serde_json::to_vec(&TokenClaims {
            api_key: &self.key_id,
            exp: now_ms + TOKEN_LIFETIME_MS,
            timestamp: now_ms,
        })?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let mut mac = HmacSha256::new_from_slice(self.key_secret.as_bytes())
            .map_err(|e| ChatError::Provider(format!("Failed to initialize signer: {}", e)))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    fn request<'a>(&'a self, prompt: &str, history: &[Message], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: build_messages(prompt, history),
            stream,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            extra: &self.extra,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let token = self.sign_token()?;
        tracing::debug!(
            "Sending Zhipu request: model={}, messages={}, stream={}",
            body.model,
            body.messages.len(),
            body.stream
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send request to Zhipu: {}", e);
                ChatError::Provider(format!("Failed to reach Zhipu: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Zhipu returned error {}: {}", status, error_text);
            return Err(ChatError::Provider(format!(
                "Zhipu returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for ZhipuProvider {
    fn name(&self) -> &'static str {
        "zhipu"
    }

    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<CompletionResponse> {
        let body = self.request(prompt, history, false);
        let response = self.send(&body).await?;

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse Zhipu response: {}", e);
            ChatError::Provider(format!("Failed to parse Zhipu response: {}", e))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::EmptyResponse)?;
        let content = choice.message.and_then(|m| m.content).unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage: parsed.usage.map(TokenUsage::from),
        })
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        history: &[Message],
        relay: &mut StreamRelay<'_>,
    ) -> Result<()> {
        let body = self.request(prompt, history, true);
        let response = self.send(&body).await?;
        let mut lines = SseLines::new(response.bytes_stream());
        let mut usage: Option<TokenUsage> = None;

        while let Some(raw) = lines.next_line().await? {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();

            if payload == "[DONE]" {
                relay.finish(usage);
                return Ok(());
            }

            let chunk: ChatResponse = match serde_json::from_str(payload) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("Skipping unparsable Zhipu stream payload: {}", e);
                    if relay.warn(format!("Failed to parse stream payload: {}", e))
                        == StreamControl::Stop
                    {
                        return Ok(());
                    }
                    continue;
                }
            };

            if let Some(body) = chunk.usage {
                usage = Some(body.into());
            }
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };

            if let Some(text) = choice.delta.and_then(|d| d.content) {
                if relay.delta(text) == StreamControl::Stop {
                    return Ok(());
                }
                if !self.fragment_delay.is_zero() {
                    tokio::time::sleep(self.fragment_delay).await;
                }
            }

            if choice.finish_reason.is_some_and(|r| !r.is_empty()) {
                relay.finish(usage);
                return Ok(());
            }
        }

        Err(ChatError::Provider("Zhipu stream ended before completion".to_string()).into())
    }
}
