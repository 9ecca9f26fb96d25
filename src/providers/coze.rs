//! Coze agent provider implementation
//!
//! Supports two targets:
//!
//! - **workflow**: `POST /v1/workflow/stream_run`, events `Message`, `Done`,
//!   `Error`, `Interrupt`
//! - **bot**: `POST /v3/chat`, events `conversation.message.delta`,
//!   `conversation.chat.completed`, `conversation.chat.failed`, `done`, `error`
//!
//! Requests are authorized with an OAuth access token obtained through the
//! JWT-bearer grant (an RS256 assertion signed with the app's private key).
//! Tokens live in a [`TokenCache`] shared across provider instances; a 401
//! from Coze invalidates the cached value.

use crate::config::CozeConfig;
use crate::error::{ChatError, Result};
use crate::providers::sse::{SseEvent, SseEvents};
use crate::providers::token_cache::TokenCache;
use crate::providers::{
    drive_stream, CompletionResponse, Message, Provider, StreamControl, StreamEvent, StreamRelay,
    TokenUsage,
};
use crate::storage::AiModel;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of the signed assertion sent to the token endpoint
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Per-request timeout; workflow runs can be slow
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// User id reported to Coze for bot conversations
const BOT_USER_ID: &str = "chatbridge";

/// What a Coze model runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CozeTarget {
    /// Workflow id
    Workflow(String),
    /// Bot id
    Bot(String),
}

/// Coze workflow/bot provider
pub struct CozeProvider {
    client: Client,
    api_base: String,
    audience: String,
    client_id: String,
    public_key_id: String,
    private_key: String,
    token_ttl_secs: u64,
    tokens: Arc<TokenCache>,
    target: CozeTarget,
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Serialize)]
struct TokenRequest {
    duration_seconds: u64,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Serialize)]
struct WorkflowRequest<'a> {
    workflow_id: &'a str,
    parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct BotChatRequest<'a> {
    bot_id: &'a str,
    user_id: &'a str,
    stream: bool,
    auto_save_history: bool,
    additional_messages: Vec<BotMessage>,
    #[serde(flatten)]
    extra: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct BotMessage {
    role: &'static str,
    content: String,
    content_type: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Usage block carried by completed chats and workflow messages
#[derive(Debug, Default, Deserialize)]
struct CozeUsage {
    #[serde(default)]
    input_count: usize,
    #[serde(default)]
    output_count: usize,
    #[serde(default)]
    token_count: usize,
}

impl From<CozeUsage> for TokenUsage {
    fn from(body: CozeUsage) -> Self {
        let mut usage = TokenUsage::new(body.input_count, body.output_count);
        if body.token_count > 0 {
            usage.total_tokens = body.token_count;
        }
        usage
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    usage: Option<CozeUsage>,
}

#[derive(Debug, Deserialize)]
struct WorkflowError {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Deserialize)]
struct BotDelta {
    #[serde(default)]
    content: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotChat {
    #[serde(default)]
    usage: Option<CozeUsage>,
    #[serde(default)]
    last_error: Option<ApiError>,
}

/// `{code, msg}` error body used across the Coze API
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Whether the event loop should keep reading
enum Flow {
    Continue,
    Return,
}

impl CozeProvider {
    /// Create a provider for `model`
    ///
    /// # Arguments
    ///
    /// * `config` - OAuth app settings and default bot/workflow ids
    /// * `model` - Model row selecting the bot or workflow
    /// * `client` - Pooled HTTP client shared across providers
    /// * `tokens` - Access-token cache shared by all Coze providers
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` when the OAuth app settings or the
    /// bot/workflow id are absent.
    pub fn new(
        config: &CozeConfig,
        model: &AiModel,
        client: Client,
        tokens: Arc<TokenCache>,
    ) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| -> Result<String> {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ChatError::MissingCredential(format!("coze ({})", name)).into())
        };
        let client_id = required(&config.client_id, "client_id")?;
        let public_key_id = required(&config.public_key_id, "public_key_id")?;
        // Keys passed through environment variables often carry escaped newlines
        let private_key = required(&config.private_key, "private_key")?.replace("\\n", "\n");
        let target = resolve_target(config, model)?;

        let api_base = model
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| config.api_base.clone())
            .trim_end_matches('/')
            .to_string();
        let audience = url::Url::parse(&api_base)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| ChatError::Config(format!("Invalid Coze API base: {}", api_base)))?;

        let extra = match &model.api_parameters {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };

        tracing::debug!("Initialized Coze provider: api={}, target={:?}", api_base, target);

        Ok(Self {
            client,
            api_base,
            audience,
            client_id,
            public_key_id,
            private_key,
            token_ttl_secs: config.token_ttl_secs,
            tokens,
            target,
            extra,
        })
    }

    /// The bot or workflow this provider runs
    pub fn target(&self) -> &CozeTarget {
        &self.target
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Sign the RS256 assertion presented to the token endpoint
    fn sign_assertion(&self) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| ChatError::Config(format!("Invalid Coze private key: {}", e)))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.public_key_id.clone());

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_id,
            aud: &self.audience,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| {
                ChatError::Provider(format!("Failed to sign Coze assertion: {}", e)).into()
            })
    }

    /// Exchange a signed assertion for an access token
    async fn exchange_token(&self) -> Result<String> {
        let assertion = self.sign_assertion()?;

        let response = self
            .client
            .post(self.endpoint("/api/permission/oauth2/token"))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(assertion)
            .json(&TokenRequest {
                duration_seconds: self.token_ttl_secs,
                grant_type: JWT_BEARER_GRANT,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach Coze token endpoint: {}", e);
                ChatError::Provider(format!("Failed to reach Coze token endpoint: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Coze token exchange failed {}: {}", status, error_text);
            return Err(ChatError::Provider(format!(
                "Coze token exchange failed {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            ChatError::Provider(format!("Failed to parse Coze token response: {}", e))
        })?;
        tracing::info!("Obtained Coze access token (expires_in={}s)", body.expires_in);
        Ok(body.access_token)
    }

    async fn access_token(&self) -> Result<String> {
        self.tokens.get_or_refresh(|| self.exchange_token()).await
    }

    async fn open_stream(&self, prompt: &str, history: &[Message]) -> Result<reqwest::Response> {
        let token = self.access_token().await?;

        let request = match &self.target {
            CozeTarget::Workflow(workflow_id) => {
                let mut parameters = self.extra.clone();
                parameters.insert("input".to_string(), serde_json::Value::from(prompt));
                self.client
                    .post(self.endpoint("/v1/workflow/stream_run"))
                    .json(&WorkflowRequest {
                        workflow_id,
                        parameters,
                    })
            }
            CozeTarget::Bot(bot_id) => {
                let mut additional_messages: Vec<BotMessage> =
                    history.iter().map(bot_message).collect();
                additional_messages.push(bot_message(&Message::user(prompt)));
                self.client.post(self.endpoint("/v3/chat")).json(&BotChatRequest {
                    bot_id,
                    user_id: BOT_USER_ID,
                    stream: true,
                    auto_save_history: false,
                    additional_messages,
                    extra: &self.extra,
                })
            }
        };

        tracing::debug!("Sending Coze request: target={:?}", self.target);
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send request to Coze: {}", e);
                ChatError::Provider(format!("Failed to reach Coze: {}", e))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Coze returned 401 Unauthorized; invalidating cached access token");
            self.tokens.invalidate();
            return Err(ChatError::Provider("Coze rejected the access token".to_string()).into());
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Coze returned error {}: {}", status, error_text);
            return Err(ChatError::Provider(format!(
                "Coze returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        // Coze reports request errors as a 200 JSON body instead of a stream
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_json {
            let body: ApiError = response.json().await.unwrap_or_default();
            tracing::error!("Coze rejected request: code={}, msg={}", body.code, body.msg);
            return Err(ChatError::Provider(format!(
                "Coze rejected request (code {}): {}",
                body.code, body.msg
            ))
            .into());
        }

        Ok(response)
    }

    fn handle_workflow_event(
        event: &SseEvent,
        relay: &mut StreamRelay<'_>,
        usage: &mut Option<TokenUsage>,
    ) -> Flow {
        match event.event.as_deref().unwrap_or_default() {
            "Message" => match serde_json::from_str::<WorkflowMessage>(&event.data) {
                Ok(message) => {
                    if let Some(body) = message.usage {
                        *usage = Some(body.into());
                    }
                    if relay.delta(message.content) == StreamControl::Stop {
                        return Flow::Return;
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping unparsable Coze workflow message: {}", e);
                    if relay.warn(format!("Failed to parse workflow message: {}", e))
                        == StreamControl::Stop
                    {
                        return Flow::Return;
                    }
                }
            },
            "Error" => {
                let message = serde_json::from_str::<WorkflowError>(&event.data)
                    .map(|e| format!("Workflow error {}: {}", e.error_code, e.error_message))
                    .unwrap_or_else(|_| "Workflow execution failed".to_string());
                relay.fail(message);
                return Flow::Return;
            }
            "Interrupt" => {
                relay.fail("Workflow interrupted waiting for input");
                return Flow::Return;
            }
            "Done" => {
                relay.finish(*usage);
                return Flow::Return;
            }
            _ => {}
        }
        Flow::Continue
    }

    fn handle_bot_event(
        event: &SseEvent,
        relay: &mut StreamRelay<'_>,
        usage: &mut Option<TokenUsage>,
    ) -> Flow {
        match event.event.as_deref().unwrap_or_default() {
            "conversation.message.delta" => match serde_json::from_str::<BotDelta>(&event.data) {
                Ok(delta) if delta.kind.as_deref().map_or(true, |k| k == "answer") => {
                    if relay.delta(delta.content) == StreamControl::Stop {
                        return Flow::Return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Skipping unparsable Coze message delta: {}", e);
                    if relay.warn(format!("Failed to parse message delta: {}", e))
                        == StreamControl::Stop
                    {
                        return Flow::Return;
                    }
                }
            },
            "conversation.chat.completed" => {
                if let Ok(chat) = serde_json::from_str::<BotChat>(&event.data) {
                    if let Some(body) = chat.usage {
                        *usage = Some(body.into());
                    }
                }
                relay.finish(*usage);
                return Flow::Return;
            }
            "conversation.chat.failed" => {
                let message = serde_json::from_str::<BotChat>(&event.data)
                    .ok()
                    .and_then(|chat| chat.last_error)
                    .map(|e| format!("Chat failed {}: {}", e.code, e.msg))
                    .unwrap_or_else(|| "Chat failed".to_string());
                relay.fail(message);
                return Flow::Return;
            }
            "error" => {
                let message = serde_json::from_str::<ApiError>(&event.data)
                    .map(|e| format!("Coze error {}: {}", e.code, e.msg))
                    .unwrap_or_else(|_| "Coze stream error".to_string());
                relay.fail(message);
                return Flow::Return;
            }
            "done" => {
                relay.finish(*usage);
                return Flow::Return;
            }
            _ => {}
        }
        Flow::Continue
    }
}

fn resolve_target(config: &CozeConfig, model: &AiModel) -> Result<CozeTarget> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
    let class_id = non_empty(&model.class_id);

    let target = match model.class.as_deref() {
        Some("workflow") => class_id
            .or_else(|| non_empty(&config.workflow_id))
            .map(CozeTarget::Workflow),
        Some("bot") => class_id
            .or_else(|| non_empty(&config.bot_id))
            .map(CozeTarget::Bot),
        _ => non_empty(&config.workflow_id)
            .map(CozeTarget::Workflow)
            .or_else(|| class_id.or_else(|| non_empty(&config.bot_id)).map(CozeTarget::Bot)),
    };

    target.ok_or_else(|| ChatError::MissingCredential("coze (bot_id or workflow_id)".into()).into())
}

fn bot_message(message: &Message) -> BotMessage {
    let (role, kind) = match message.role.as_str() {
        "assistant" => ("assistant", "answer"),
        _ => ("user", "question"),
    };
    BotMessage {
        role,
        content: message.content.clone(),
        content_type: "text",
        kind,
    }
}

#[async_trait]
impl Provider for CozeProvider {
    fn name(&self) -> &'static str {
        "coze"
    }

    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<CompletionResponse> {
        let mut text = String::new();
        let mut outcome: Option<std::result::Result<Option<TokenUsage>, String>> = None;
        {
            let mut sink = |event: StreamEvent| {
                match event {
                    StreamEvent::Delta(fragment) => text.push_str(&fragment),
                    StreamEvent::Warning(_) => {}
                    StreamEvent::Finished(usage) => outcome = Some(Ok(usage)),
                    StreamEvent::Failed(message) => outcome = Some(Err(message)),
                }
                StreamControl::Continue
            };
            drive_stream(self, prompt, history, &mut sink).await;
        }

        match outcome {
            Some(Ok(_)) if text.is_empty() => Err(ChatError::EmptyResponse.into()),
            Some(Ok(usage)) => Ok(CompletionResponse {
                content: text,
                usage,
            }),
            Some(Err(message)) => Err(ChatError::Provider(message).into()),
            None => Err(ChatError::Provider("Coze stream stopped early".to_string()).into()),
        }
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        history: &[Message],
        relay: &mut StreamRelay<'_>,
    ) -> Result<()> {
        let response = self.open_stream(prompt, history).await?;
        let mut events = SseEvents::new(response.bytes_stream());
        let mut usage: Option<TokenUsage> = None;

        while let Some(event) = events.next_event().await? {
            let flow = match self.target {
                CozeTarget::Workflow(_) => Self::handle_workflow_event(&event, relay, &mut usage),
                CozeTarget::Bot(_) => Self::handle_bot_event(&event, relay, &mut usage),
            };
            if let Flow::Return = flow {
                return Ok(());
            }
        }

        Err(ChatError::Provider("Coze stream ended before completion".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSeed;
    use crate::providers::{http_client, StreamEnd};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/coze_test_private.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/coze_test_public.pem");

    fn config(server: &MockServer) -> CozeConfig {
        CozeConfig {
            api_base: server.uri(),
            client_id: Some("client-1".into()),
            public_key_id: Some("kid-1".into()),
            private_key: Some(TEST_PRIVATE_KEY.into()),
            ..CozeConfig::default()
        }
    }

    fn model(class: &str, class_id: &str) -> AiModel {
        let mut seed = ModelSeed::new("coze-agent", "coze");
        seed.class = Some(class.to_string());
        seed.class_id = Some(class_id.to_string());
        AiModel::from_seed(2, &seed)
    }

    async fn warm_cache(token: &str) -> Arc<TokenCache> {
        let cache = Arc::new(TokenCache::new(Duration::from_secs(840)));
        let token = token.to_string();
        cache.get_or_refresh(|| async { Ok(token) }).await.unwrap();
        cache
    }

    fn sse(events: &[(&str, &str)]) -> ResponseTemplate {
        let body: String = events
            .iter()
            .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
            .collect();
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    fn build(config: &CozeConfig, model: &AiModel, cache: Arc<TokenCache>) -> CozeProvider {
        CozeProvider::new(config, model, http_client().unwrap(), cache).unwrap()
    }

    async fn collect(provider: &CozeProvider) -> (Vec<StreamEvent>, StreamEnd) {
        let mut events = Vec::new();
        let end = {
            let mut sink = |event: StreamEvent| {
                events.push(event);
                StreamControl::Continue
            };
            drive_stream(provider, "Hello", &[Message::assistant("earlier")], &mut sink).await
        };
        (events, end)
    }

    #[test]
    fn test_missing_oauth_settings_rejected() {
        let cache = Arc::new(TokenCache::new(Duration::from_secs(60)));
        let err = CozeProvider::new(
            &CozeConfig::default(),
            &model("bot", "b1"),
            http_client().unwrap(),
            cache,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_resolve_target() {
        let mut config = CozeConfig {
            workflow_id: Some("wf-config".into()),
            bot_id: Some("bot-config".into()),
            ..CozeConfig::default()
        };
        assert_eq!(
            resolve_target(&config, &model("bot", "bot-model")).unwrap(),
            CozeTarget::Bot("bot-model".into())
        );
        assert_eq!(
            resolve_target(&config, &model("workflow", "")).unwrap(),
            CozeTarget::Workflow("wf-config".into())
        );

        let plain = AiModel::from_seed(3, &ModelSeed::new("coze", "coze"));
        assert_eq!(
            resolve_target(&config, &plain).unwrap(),
            CozeTarget::Workflow("wf-config".into())
        );

        config.workflow_id = None;
        assert_eq!(
            resolve_target(&config, &plain).unwrap(),
            CozeTarget::Bot("bot-config".into())
        );

        config.bot_id = None;
        assert!(resolve_target(&config, &plain).is_err());
    }

    #[tokio::test]
    async fn test_bot_stream_relays_answer_deltas() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/chat"))
            .and(header("authorization", "Bearer cached-token"))
            .and(body_partial_json(serde_json::json!({"bot_id": "bot-7", "stream": true})))
            .respond_with(sse(&[
                ("conversation.chat.created", "{}"),
                ("conversation.message.delta", r#"{"type":"answer","content":"Hel"}"#),
                ("conversation.message.delta", r#"{"type":"verbose","content":"noise"}"#),
                ("conversation.message.delta", r#"{"type":"answer","content":"lo"}"#),
                (
                    "conversation.chat.completed",
                    r#"{"usage":{"token_count":9,"input_count":5,"output_count":4}}"#,
                ),
                ("done", "\"[DONE]\""),
            ]))
            .expect(1)
            .mount(&server)
            .await;

        let cache = warm_cache("cached-token").await;
        let provider = build(&config(&server), &model("bot", "bot-7"), cache);
        let (events, end) = collect(&provider).await;

        assert_eq!(end, StreamEnd::Terminated);
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hel".into()),
                StreamEvent::Delta("lo".into()),
                StreamEvent::Finished(Some(TokenUsage::new(5, 4))),
            ]
        );
    }

    #[tokio::test]
    async fn test_bot_chat_failed_is_terminal_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/chat"))
            .respond_with(sse(&[
                ("conversation.message.delta", r#"{"type":"answer","content":"par"}"#),
                (
                    "conversation.chat.failed",
                    r#"{"last_error":{"code":4011,"msg":"quota exceeded"}}"#,
                ),
            ]))
            .mount(&server)
            .await;

        let provider = build(&config(&server), &model("bot", "bot-7"), warm_cache("t").await);
        let (events, _) = collect(&provider).await;

        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed(m)) if m.contains("quota exceeded")
        ));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_workflow_stream_and_collecting_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workflow/stream_run"))
            .and(body_partial_json(serde_json::json!({
                "workflow_id": "wf-1",
                "parameters": {"input": "Hello"}
            })))
            .respond_with(sse(&[
                ("PING", "{}"),
                ("Message", r#"{"content":"Step one. ","node_is_finish":false}"#),
                ("Message", r#"{"content":"Step two.","node_is_finish":true}"#),
                ("Done", r#"{"debug_url":""}"#),
            ]))
            .mount(&server)
            .await;

        let provider = build(&config(&server), &model("workflow", "wf-1"), warm_cache("t").await);
        let response = provider.complete("Hello", &[]).await.unwrap();
        assert_eq!(response.content, "Step one. Step two.");
        assert_eq!(response.usage, None);
    }

    #[tokio::test]
    async fn test_workflow_interrupt_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workflow/stream_run"))
            .respond_with(sse(&[("Interrupt", r#"{"interrupt_data":{}}"#)]))
            .mount(&server)
            .await;

        let provider = build(&config(&server), &model("workflow", "wf-1"), warm_cache("t").await);
        let err = provider.complete("Hello", &[]).await.unwrap_err();
        assert!(err.to_string().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/chat"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;

        let cache = warm_cache("stale").await;
        let provider = build(&config(&server), &model("bot", "bot-7"), Arc::clone(&cache));
        assert!(provider.complete("Hello", &[]).await.is_err());
        assert!(cache.cached().is_none());
    }

    #[tokio::test]
    async fn test_json_error_body_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 4000, "msg": "invalid bot"})),
            )
            .mount(&server)
            .await;

        let provider = build(&config(&server), &model("bot", "bot-7"), warm_cache("t").await);
        let err = provider.complete("Hello", &[]).await.unwrap_err();
        assert!(err.to_string().contains("invalid bot"));
    }

    #[tokio::test]
    async fn test_exchanged_token_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/permission/oauth2/token"))
            .and(body_partial_json(serde_json::json!({"grant_type": JWT_BEARER_GRANT})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "fresh", "expires_in": 900})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/chat"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(sse(&[
                ("conversation.message.delta", r#"{"type":"answer","content":"ok"}"#),
                ("done", "\"[DONE]\""),
            ]))
            .expect(2)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new(Duration::from_secs(840)));
        let provider = build(&config(&server), &model("bot", "bot-7"), Arc::clone(&cache));

        assert_eq!(provider.complete("one", &[]).await.unwrap().content, "ok");
        assert_eq!(provider.complete("two", &[]).await.unwrap().content, "ok");
        assert_eq!(cache.cached().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_assertion_is_rs256_with_kid_and_audience() {
        let config = CozeConfig {
            api_base: "https://api.coze.cn".into(),
            client_id: Some("client-1".into()),
            public_key_id: Some("kid-1".into()),
            private_key: Some(TEST_PRIVATE_KEY.replace('\n', "\\n")),
            ..CozeConfig::default()
        };
        let cache = Arc::new(TokenCache::new(Duration::from_secs(60)));
        let provider = build(&config, &model("bot", "bot-7"), cache);
        let assertion = provider.sign_assertion().unwrap();

        let header = jsonwebtoken::decode_header(&assertion).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("kid-1"));

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&["api.coze.cn"]);
        validation.set_issuer(&["client-1"]);
        let key = jsonwebtoken::DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap();
        let decoded =
            jsonwebtoken::decode::<serde_json::Value>(&assertion, &key, &validation).unwrap();
        assert!(decoded.claims["jti"].is_string());
    }
}
