//! Search-index abstraction: partitioned similarity search over fragment text.
//!
//! The index is a derived store. It holds one partition per (tenant, project)
//! pair and, inside each partition, a minimal projection of every fragment:
//! the immutable scope keys, the classification, the optional session id, the
//! creation time, and a copy of the content it ranks on. The record store
//! alone decides whether a fragment exists; readers resolve every id returned
//! from here against it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnemo_core::index::{partition_name, IndexFilter, RestSearchIndex};
//! use mnemo_core::IndexConfig;
//!
//! let index = RestSearchIndex::new(IndexConfig::default());
//! let partition = partition_name("t1", "p1");
//! let hits = index
//!     .query(&partition, "birthday", 10, &IndexFilter::for_user("u1"))
//!     .await?;
//! ```

mod partition;
mod rest;

#[cfg(test)]
mod proptest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{MemoryFragment, MemoryType};

pub use partition::{partition_name, MAX_PARTITION_LEN};
pub use rest::RestSearchIndex;

/// The minimal projection of a fragment held by the search index.
///
/// Mutable annotations (tags, importance, metadata, hit counts) are
/// deliberately not duplicated here; only `content` is, because the index
/// ranks on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDoc {
    pub id: String,
    /// Copy of the fragment text at the time of the last index write.
    pub content: String,
    pub tenant_id: String,
    pub project_id: String,
    pub user_id: String,
    pub memory_type: MemoryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IndexDoc {
    /// Build the index projection of a fragment.
    pub fn project(fragment: &MemoryFragment) -> Self {
        Self {
            id: fragment.id.clone(),
            content: fragment.content.clone(),
            tenant_id: fragment.tenant_id.clone(),
            project_id: fragment.project_id.clone(),
            user_id: fragment.user_id.clone(),
            memory_type: fragment.memory_type,
            session_id: fragment.session_id.clone(),
            created_at: fragment.created_at,
        }
    }
}

/// One ranked candidate from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    /// Raw distance reported by the index; lower is closer.
    pub distance: f64,
    /// The indexed content copy, as of the last successful index write.
    pub content: String,
}

/// Equality predicates applied inside a partition.
///
/// `user_id` is mandatory by construction: every index read is pinned to one
/// user, which is how per-user isolation holds inside a shared partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFilter {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl IndexFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            memory_type: None,
            session_id: None,
        }
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether a document satisfies every predicate.
    pub fn matches(&self, doc: &IndexDoc) -> bool {
        if doc.user_id != self.user_id {
            return false;
        }
        if let Some(t) = self.memory_type {
            if doc.memory_type != t {
                return false;
            }
        }
        if let Some(s) = &self.session_id {
            if doc.session_id.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Derived similarity-search backend, partitioned per (tenant, project).
///
/// Implementations must treat reads against a missing partition as empty and
/// deletes of missing documents or partitions as success.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the partition if it does not already exist.
    async fn ensure_partition(&self, partition: &str) -> Result<()>;

    /// Insert or replace one document.
    async fn upsert(&self, partition: &str, doc: &IndexDoc) -> Result<()>;

    /// Rank documents matching `filter` against `text`, closest first.
    async fn query(
        &self,
        partition: &str,
        text: &str,
        limit: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexHit>>;

    /// Exact-match retrieval without ranking. No ordering guarantee.
    async fn fetch(
        &self,
        partition: &str,
        filter: &IndexFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<IndexDoc>>;

    /// Single-document lookup by id.
    async fn get(&self, partition: &str, id: &str) -> Result<Option<IndexDoc>>;

    /// Delete one document. Deleting an absent document succeeds.
    async fn remove(&self, partition: &str, id: &str) -> Result<()>;

    /// Drop the whole partition. Dropping an absent partition succeeds.
    async fn drop_partition(&self, partition: &str) -> Result<()>;
}
