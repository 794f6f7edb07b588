//! Service configuration with environment-variable overrides.

use std::path::PathBuf;

/// Default number of results for a semantic search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Default number of turns returned from session history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Configuration for the search-index REST backend.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Base URL of the search-index service.
    pub base_url: String,
    /// Optional bearer token sent with every request.
    pub api_key: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:6333".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

impl IndexConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("MNEMO_INDEX_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("MNEMO_INDEX_API_KEY").ok(),
            timeout_ms: std::env::var("MNEMO_INDEX_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_ms),
        }
    }
}

/// Configuration for the request-rate governor.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Redis connection URL; `None` disables the governor.
    pub redis_url: Option<String>,
    /// Admitted requests per client per window; 0 disables the governor.
    pub max_per_minute: u32,
    /// Sliding-window length in seconds.
    pub window_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            max_per_minute: 0,
            window_secs: 60,
        }
    }
}

impl GovernorConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("MNEMO_REDIS_URL").ok(),
            max_per_minute: std::env::var("MNEMO_RATE_LIMIT_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_per_minute),
            window_secs: defaults.window_secs,
        }
    }

    /// Whether the governor is active under this configuration.
    pub fn enabled(&self) -> bool {
        self.redis_url.is_some() && self.max_per_minute > 0
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Record store database path.
    pub db_path: PathBuf,
    pub index: IndexConfig,
    pub governor: GovernorConfig,
    /// Default result count for search when the caller passes none.
    pub default_search_limit: usize,
    /// Default turn count for session history when the caller passes none.
    pub default_history_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/mnemo.db"),
            index: IndexConfig::default(),
            governor: GovernorConfig::default(),
            default_search_limit: DEFAULT_SEARCH_LIMIT,
            default_history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("MNEMO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            index: IndexConfig::from_env(),
            governor: GovernorConfig::from_env(),
            default_search_limit: std::env::var("MNEMO_SEARCH_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_search_limit),
            default_history_limit: std::env::var("MNEMO_HISTORY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_history_limit),
        }
    }
}
