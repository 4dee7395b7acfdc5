//! Sliding-window rate limiter.
//!
//! Keys are `(session, method)` by default, or `global:<method>` when
//! per-session bucketing is disabled. Each bucket keeps the admission
//! timestamps still inside the window; a denied check reports how long until
//! the oldest one ages out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Derives a bucket key from request params, overriding the method name.
pub type KeyExtractor = Arc<dyn Fn(&serde_json::Value) -> Option<String> + Send + Sync>;

/// Limiter configuration.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Admissions allowed inside one window.
    pub max_requests: usize,
    /// Window duration.
    pub window: Duration,
    /// Bucket per session (`true`) or globally per method (`false`).
    pub per_session: bool,
    /// Optional custom key derivation over params.
    pub key_extractor: Option<KeyExtractor>,
}

impl RateLimitConfig {
    /// Per-session config with the given budget.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self { max_requests, window, per_session: true, key_extractor: None }
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("per_session", &self.per_session)
            .finish()
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Under budget; the timestamp was recorded.
    Admit,
    /// Over budget; retry once the oldest admission ages out.
    Deny {
        /// Time until a slot frees up.
        retry_after: Duration,
    },
}

/// Sliding-window limiter over per-key timestamp buckets.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    /// Check one request. Admission appends the current timestamp; denial
    /// leaves the bucket untouched.
    pub fn check(
        &self,
        session_id: &str,
        method: &str,
        params: &serde_json::Value,
    ) -> RateDecision {
        let key = self.bucket_key(session_id, method, params);
        let now = Instant::now();

        let mut buckets = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = buckets.entry(key).or_default();

        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) >= self.config.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() < self.config.max_requests {
            bucket.push_back(now);
            return RateDecision::Admit;
        }

        match bucket.front() {
            Some(oldest) => {
                let retry_after = (*oldest + self.config.window).saturating_duration_since(now);
                RateDecision::Deny { retry_after }
            }
            // max_requests == 0 admits nothing and has no slot to wait on.
            None => RateDecision::Deny { retry_after: self.config.window },
        }
    }

    /// Drop every bucket belonging to a closed session.
    pub fn flush_session(&self, session_id: &str) {
        let prefix = format!("{session_id}:");
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|key, _| !key.starts_with(&prefix));
    }

    fn bucket_key(&self, session_id: &str, method: &str, params: &serde_json::Value) -> String {
        let discriminator = self
            .config
            .key_extractor
            .as_ref()
            .and_then(|extract| extract(params))
            .unwrap_or_else(|| method.to_owned());
        if self.config.per_session {
            format!("{session_id}:{discriminator}")
        } else {
            format!("global:{discriminator}")
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish()
    }
}
