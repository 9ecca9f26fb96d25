//! In-memory access-token cache shared by provider instances
//!
//! Readers take the `RwLock` fast path. A miss serializes on an async mutex
//! so only one caller performs the upstream exchange; callers queued behind
//! it re-check the cache and reuse the fresh value.

use crate::error::Result;

use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Token value with its acquisition time
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Single-writer token cache with a fixed refresh window
#[derive(Debug)]
pub struct TokenCache {
    current: RwLock<Option<CachedToken>>,
    refresh: tokio::sync::Mutex<()>,
    refresh_after: Duration,
}

impl TokenCache {
    /// Create an empty cache whose entries are reused for `refresh_after`
    pub fn new(refresh_after: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            refresh_after,
        }
    }

    /// Cached value if it is still inside the refresh window
    pub fn cached(&self) -> Option<String> {
        let guard = self.current.read().ok()?;
        guard
            .as_ref()
            .filter(|t| t.fetched_at.elapsed() < self.refresh_after)
            .map(|t| t.value.clone())
    }

    /// Return the cached value, fetching a new one with `fetch` on a miss
    ///
    /// # Errors
    ///
    /// Propagates the fetch error; the cache is left empty in that case.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _refreshing = self.refresh.lock().await;
        if let Some(token) = self.cached() {
            tracing::debug!("Using access token refreshed by a concurrent request");
            return Ok(token);
        }

        tracing::debug!("Access token missing or stale; refreshing");
        let value = fetch().await?;
        match self.current.write() {
            Ok(mut guard) => {
                *guard = Some(CachedToken {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
            }
            Err(_) => tracing::warn!("Failed to acquire write lock on token cache"),
        }
        Ok(value)
    }

    /// Drop the cached value so the next call refreshes
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
    }
}
