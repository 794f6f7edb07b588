//! Sliding-window rate governor.
//!
//! Admission control over a shared counter backend (Redis in production),
//! so the same ceiling holds across every process serving a deployment.
//! Each admission check atomically trims entries older than the window,
//! records the current request, and reads the resulting count. A backend
//! failure admits the request: an unreachable counter must not take the
//! memory service down with it.
//!
//! # Example
//!
//! ```rust,ignore
//! use mnemo_core::ratelimit::{RateGovernor, RedisCounter};
//! use std::sync::Arc;
//!
//! let counter = RedisCounter::connect("redis://127.0.0.1/").await?;
//! let governor = RateGovernor::new(Arc::new(counter), 120);
//!
//! match governor.admit("mnm_abc123").await {
//!     Admission::Admitted => { /* serve the request */ }
//!     Admission::Denied { limit } => { /* reject with the ceiling */ }
//! }
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::GovernorConfig;
use crate::error::{Error, Result};

/// Default window width in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Admitted,
    /// The client exceeded its per-window ceiling.
    Denied {
        /// The configured ceiling, for the client-facing message.
        limit: u32,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Shared request counter.
///
/// One logical operation: trim entries at or before `window_start`, record
/// a hit at `now`, and return how many hits remain in the window (the one
/// just recorded included). Implementations must make the three steps
/// atomic with respect to concurrent callers on the same key.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    async fn record_and_count(
        &self,
        key: &str,
        now: f64,
        window_start: f64,
        ttl_secs: i64,
    ) -> Result<u64>;
}

// ==================== Redis backend ====================

/// Counter backed by a Redis sorted set per client.
///
/// Scores are epoch seconds; members carry a random suffix so two requests
/// landing on the same timestamp still count as two. The key expires one
/// window after the last request, so idle clients cost nothing.
pub struct RedisCounter {
    manager: ConnectionManager,
}

impl RedisCounter {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::counter(format!("invalid redis url: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::counter(format!("redis connection failed: {}", e)))?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl CounterBackend for RedisCounter {
    async fn record_and_count(
        &self,
        key: &str,
        now: f64,
        window_start: f64,
        ttl_secs: i64,
    ) -> Result<u64> {
        let member = format!("{}-{}", now, Uuid::new_v4());
        let mut conn = self.manager.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, "-inf", window_start)
            .ignore()
            .zadd(key, member, now)
            .ignore()
            .zcard(key)
            .expire(key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::counter(e.to_string()))?;

        Ok(count)
    }
}

// ==================== Governor ====================

/// Distributed sliding-window admission gate.
pub struct RateGovernor {
    backend: Option<Arc<dyn CounterBackend>>,
    max_per_window: u32,
    window_secs: u64,
}

impl RateGovernor {
    /// Governor with an explicit backend and per-window ceiling.
    pub fn new(backend: Arc<dyn CounterBackend>, max_per_window: u32) -> Self {
        Self {
            backend: Some(backend),
            max_per_window,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }

    /// Governor that admits everything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            max_per_window: 0,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }

    /// Override the window width (testing, mostly).
    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs;
        self
    }

    /// Build a governor from configuration.
    ///
    /// Limiting is off unless both a ceiling and a Redis URL are set. A
    /// failed Redis connection also leaves the governor disabled rather
    /// than blocking startup.
    pub async fn from_config(config: &GovernorConfig) -> Self {
        if config.max_per_minute == 0 {
            return Self::disabled();
        }
        let Some(url) = &config.redis_url else {
            return Self::disabled();
        };

        match RedisCounter::connect(url).await {
            Ok(counter) => {
                info!("rate governor connected to {}", url);
                Self::new(Arc::new(counter), config.max_per_minute)
                    .with_window_secs(config.window_secs)
            }
            Err(e) => {
                error!("rate governor init failed, limiting is off: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some() && self.max_per_window > 0
    }

    /// Check whether a request from `client_id` may proceed.
    ///
    /// Never returns an error: a broken backend logs and admits.
    pub async fn admit(&self, client_id: &str) -> Admission {
        let Some(backend) = &self.backend else {
            return Admission::Admitted;
        };
        if self.max_per_window == 0 {
            return Admission::Admitted;
        }

        let now = epoch_secs();
        let window_start = now - self.window_secs as f64;
        let key = format!("rate_limit:{}", client_id);

        match backend
            .record_and_count(&key, now, window_start, self.window_secs as i64)
            .await
        {
            Ok(count) if count > self.max_per_window as u64 => {
                let prefix: String = client_id.chars().take(16).collect();
                warn!(
                    "rate limit hit: client={} requests={} ceiling={}",
                    prefix, count, self.max_per_window
                );
                Admission::Denied {
                    limit: self.max_per_window,
                }
            }
            Ok(_) => Admission::Admitted,
            Err(e) => {
                error!("counter backend failed, admitting request: {}", e);
                Admission::Admitted
            }
        }
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
