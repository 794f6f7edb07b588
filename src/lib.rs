//! # mnemo-core
//!
//! Multi-tenant memory storage core for AI applications: short text
//! fragments persisted per (tenant, project, user) with semantic retrieval
//! over them.
//!
//! ## Core Components
//!
//! - **Model**: fragments, scopes, patches, and write outcomes
//! - **Record store**: authoritative SQLite store of fragments and hierarchy
//! - **Search index**: derived per-(tenant, project) similarity partitions
//! - **Service**: the consistency layer mediating every dual-store operation
//! - **Rate governor**: distributed sliding-window admission control
//! - **Channel manager**: tenant, project, and API key administration
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnemo_core::{
//!     MemoryService, MemoryType, NewFragment, RestSearchIndex, Scope,
//!     SearchOptions, ServiceConfig, SqliteRecordStore,
//! };
//! use std::sync::Arc;
//!
//! let config = ServiceConfig::from_env();
//! let records = Arc::new(SqliteRecordStore::open(&config.db_path)?);
//! let index = Arc::new(RestSearchIndex::new(config.index.clone())?);
//! let service = MemoryService::new(records, index);
//!
//! let scope = Scope::new("t1", "p1", "u1");
//! service
//!     .add(NewFragment::new(
//!         scope.clone(),
//!         "birthday is 1990-03-15",
//!         MemoryType::Factual,
//!     ))
//!     .await?;
//!
//! let found = service
//!     .search(&scope, "birthday", SearchOptions::default())
//!     .await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod ratelimit;
pub mod record;
pub mod service;

// Re-exports for convenience
pub use channel::ChannelManager;
pub use config::{
    GovernorConfig, IndexConfig, ServiceConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT,
};
pub use error::{Error, Result};
pub use index::{
    partition_name, IndexDoc, IndexFilter, IndexHit, RestSearchIndex, SearchIndex,
    MAX_PARTITION_LEN,
};
pub use model::{
    ApiKey, ChatTurn, FragmentPatch, MemoryFragment, MemoryRecord, MemoryType, NewFragment,
    Project, Role, Scope, Tenant, UserStats, WriteOutcome, MAX_CONTENT_CHARS,
};
pub use ratelimit::{Admission, CounterBackend, RateGovernor, RedisCounter, DEFAULT_WINDOW_SECS};
pub use record::{RecordStore, SqliteRecordStore, SCHEMA_VERSION};
pub use service::{MemoryService, SearchOptions};
