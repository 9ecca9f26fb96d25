//! Usage accounting for provider invocations
//!
//! A [`UsageRecorder`] is created when a turn starts invoking a provider and
//! writes exactly one [`UsageRecord`](crate::storage::UsageRecord), success or
//! error, no matter how many times the turn's exit paths try to record.
//!
//! # Metrics
//!
//! - `chat_turns_total`: Counter of finished turns by provider and status
//! - `chat_turn_duration_seconds`: Histogram of turn latency by status
//! - `chat_tokens_total`: Counter of tokens by source (`provider` or `estimate`)
//! - `chat_turns_active`: Gauge of turns currently invoking a provider

use crate::providers::TokenUsage;
use crate::storage::{AiModel, NewUsageRecord, UsageStatus, UsageStore};

use metrics::{counter, decrement_gauge, histogram, increment_counter, increment_gauge};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where token counts came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSource {
    /// Reported by the vendor
    Provider,
    /// Estimated locally from text length
    Estimate,
}

impl UsageSource {
    /// Label used in message metadata and metric tags
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Estimate => "estimate",
        }
    }
}

/// Token counts and latency for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub duration_ms: u64,
    pub source: UsageSource,
}

impl UsageSummary {
    /// Vendor counts when present, otherwise the length estimate
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::usage::{UsageSource, UsageSummary};
    /// use std::time::Duration;
    ///
    /// let summary = UsageSummary::resolve(None, "abcdefgh", "abcd", Duration::from_millis(7));
    /// assert_eq!(summary.total_tokens, 3);
    /// assert_eq!(summary.source, UsageSource::Estimate);
    /// ```
    pub fn resolve(
        vendor: Option<TokenUsage>,
        prompt: &str,
        completion: &str,
        elapsed: Duration,
    ) -> Self {
        let (usage, source) = match vendor {
            Some(usage) => (usage, UsageSource::Provider),
            None => (TokenUsage::estimate(prompt, completion), UsageSource::Estimate),
        };
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            duration_ms: elapsed.as_millis() as u64,
            source,
        }
    }
}

/// Records usage for a single provider invocation
///
/// The `recorded` guard makes every `record_*` call after the first a no-op,
/// so racing error and cancellation paths cannot produce a second row.
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
    user_id: i64,
    model_id: i64,
    provider: String,
    price_per_1k_tokens: f64,
    prompt: String,
    start: Instant,
    recorded: AtomicBool,
}

impl UsageRecorder {
    /// Start timing an invocation of `model` for `user_id`
    ///
    /// Increments the `chat_turns_active` gauge until the recorder is dropped.
    ///
    /// # Arguments
    ///
    /// * `store` - Ledger the single usage record is written to
    /// * `user_id` - Caller the invocation is billed to
    /// * `model` - Model row supplying the provider tag and price
    /// * `prompt` - Prompt text, kept for the record and token estimates
    pub fn start(
        store: Arc<dyn UsageStore>,
        user_id: i64,
        model: &AiModel,
        prompt: impl Into<String>,
    ) -> Self {
        increment_gauge!("chat_turns_active", 1.0, "provider" => model.provider.clone());

        Self {
            store,
            user_id,
            model_id: model.id,
            provider: model.provider.clone(),
            price_per_1k_tokens: model.price_per_1k_tokens,
            prompt: prompt.into(),
            start: Instant::now(),
            recorded: AtomicBool::new(false),
        }
    }

    /// Time since the invocation started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether a record has already been written (or attempted)
    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }

    /// Record a successful invocation that produced `message_id`
    ///
    /// # Arguments
    ///
    /// * `summary` - Token counts and latency for the turn
    /// * `response` - Full assistant text
    /// * `message_id` - Id of the stored assistant message
    ///
    /// # Returns
    ///
    /// Returns `false` if usage was already recorded for this invocation
    pub async fn record_success(
        &self,
        summary: &UsageSummary,
        response: &str,
        message_id: i64,
    ) -> bool {
        if !self.claim() {
            return false;
        }

        self.emit_metrics(UsageStatus::Success, summary);
        self.persist(NewUsageRecord {
            user_id: self.user_id,
            model_id: self.model_id,
            message_id: Some(message_id),
            prompt: self.prompt.clone(),
            response: response.to_string(),
            prompt_tokens: summary.prompt_tokens as i64,
            completion_tokens: summary.completion_tokens as i64,
            total_tokens: summary.total_tokens as i64,
            duration_ms: summary.duration_ms as i64,
            status: UsageStatus::Success,
            error_message: None,
            cost: self.cost(summary.total_tokens),
        })
        .await;
        true
    }

    /// Record a failed or cancelled invocation
    ///
    /// `partial` is whatever text was produced before the failure; token
    /// counts are estimated from it. Returns `false` if usage was already
    /// recorded for this invocation.
    pub async fn record_error(&self, partial: &str, error: &str) -> bool {
        if !self.claim() {
            return false;
        }

        let summary = UsageSummary::resolve(None, &self.prompt, partial, self.elapsed());
        self.emit_metrics(UsageStatus::Error, &summary);
        self.persist(NewUsageRecord {
            user_id: self.user_id,
            model_id: self.model_id,
            message_id: None,
            prompt: self.prompt.clone(),
            response: partial.to_string(),
            prompt_tokens: summary.prompt_tokens as i64,
            completion_tokens: summary.completion_tokens as i64,
            total_tokens: summary.total_tokens as i64,
            duration_ms: summary.duration_ms as i64,
            status: UsageStatus::Error,
            error_message: Some(error.to_string()),
            cost: self.cost(summary.total_tokens),
        })
        .await;
        true
    }

    fn claim(&self) -> bool {
        !self.recorded.swap(true, Ordering::SeqCst)
    }

    fn cost(&self, total_tokens: usize) -> f64 {
        total_tokens as f64 / 1000.0 * self.price_per_1k_tokens
    }

    fn emit_metrics(&self, status: UsageStatus, summary: &UsageSummary) {
        increment_counter!(
            "chat_turns_total",
            "provider" => self.provider.clone(),
            "status" => status.as_str()
        );
        histogram!(
            "chat_turn_duration_seconds",
            summary.duration_ms as f64 / 1000.0,
            "status" => status.as_str()
        );
        counter!(
            "chat_tokens_total",
            summary.total_tokens as u64,
            "source" => summary.source.as_str()
        );
        decrement_gauge!("chat_turns_active", 1.0, "provider" => self.provider.clone());
    }

    /// Write failures are logged and swallowed
    async fn persist(&self, record: NewUsageRecord) {
        let status = record.status;
        match self.store.record_usage(record).await {
            Ok(stored) => tracing::debug!(
                "Recorded usage {} (status={}, model={})",
                stored.id,
                status.as_str(),
                self.model_id
            ),
            Err(e) => tracing::warn!(
                "Failed to record usage for model {} (status={}): {:#}",
                self.model_id,
                status.as_str(),
                e
            ),
        }
    }
}

impl Drop for UsageRecorder {
    fn drop(&mut self) {
        if !self.is_recorded() {
            decrement_gauge!("chat_turns_active", 1.0, "provider" => self.provider.clone());
        }
    }
}

/// Initializes the metrics exporter for Prometheus
///
/// Only has an effect when compiled with the `prometheus` feature.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSeed;
    use crate::error::{ChatError, Result};
    use crate::storage::UsageRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryUsage {
        records: Mutex<Vec<NewUsageRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl UsageStore for MemoryUsage {
        async fn record_usage(&self, record: NewUsageRecord) -> Result<UsageRecord> {
            if self.fail {
                return Err(ChatError::Storage("disk full".into()).into());
            }
            let mut records = self.records.lock().unwrap();
            records.push(record.clone());
            Ok(UsageRecord {
                id: records.len() as i64,
                record,
                created_at: chrono::Utc::now(),
            })
        }

        async fn list_usage(&self, _user_id: i64) -> Result<Vec<UsageRecord>> {
            Ok(Vec::new())
        }
    }

    fn model() -> AiModel {
        let mut seed = ModelSeed::new("glm-4", "zhipu");
        seed.price_per_1k_tokens = 0.1;
        AiModel::from_seed(7, &seed)
    }

    #[test]
    fn test_resolve_prefers_vendor_counts() {
        let summary = UsageSummary::resolve(
            Some(TokenUsage::new(10, 20)),
            "short",
            "short",
            Duration::from_millis(3),
        );
        assert_eq!(summary.total_tokens, 30);
        assert_eq!(summary.source, UsageSource::Provider);
        assert_eq!(summary.duration_ms, 3);
    }

    #[tokio::test]
    async fn test_records_exactly_once() {
        let store = Arc::new(MemoryUsage::default());
        let recorder = UsageRecorder::start(store.clone(), 42, &model(), "Hello there!");

        let summary =
            UsageSummary::resolve(Some(TokenUsage::new(500, 500)), "", "", recorder.elapsed());
        assert!(recorder.record_success(&summary, "answer", 11).await);
        assert!(!recorder.record_error("", "late error").await);
        assert!(!recorder.record_success(&summary, "again", 12).await);

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UsageStatus::Success);
        assert_eq!(records[0].message_id, Some(11));
        assert_eq!(records[0].model_id, 7);
        assert!((records[0].cost - 0.1).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_error_record_estimates_tokens() {
        let store = Arc::new(MemoryUsage::default());
        let recorder = UsageRecorder::start(store.clone(), 42, &model(), "12345678");

        assert!(recorder.record_error("1234", "upstream reset").await);

        let records = store.records.lock().unwrap();
        assert_eq!(records[0].status, UsageStatus::Error);
        assert_eq!(records[0].error_message.as_deref(), Some("upstream reset"));
        assert_eq!(records[0].message_id, None);
        assert_eq!(records[0].prompt_tokens, 2);
        assert_eq!(records[0].completion_tokens, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let store = Arc::new(MemoryUsage {
            fail: true,
            ..MemoryUsage::default()
        });
        let recorder = UsageRecorder::start(store, 1, &model(), "p");
        assert!(recorder.record_error("", "boom").await);
        assert!(recorder.is_recorded());
    }

    #[test]
    fn test_drop_without_recording() {
        let store = Arc::new(MemoryUsage::default());
        let _recorder = UsageRecorder::start(store, 1, &model(), "p");
    }

    #[test]
    fn test_init_metrics_exporter() {
        init_metrics_exporter();
    }
}
