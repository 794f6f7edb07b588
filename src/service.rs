//! Consistency layer over the record store and search index.
//!
//! `MemoryService` mediates every fragment read and write across the two
//! backends. The record store is authoritative: a fragment exists exactly
//! when its row exists, and the index holds a derived projection used only
//! for retrieval. Writes land on the record store first; an index failure
//! after that commit degrades the write instead of failing it, and reads
//! drop any index candidate whose row has since disappeared.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnemo_core::{MemoryService, NewFragment, MemoryType, Scope, SearchOptions};
//!
//! let service = MemoryService::new(records, index);
//! let scope = Scope::new("t1", "p1", "u1");
//!
//! service
//!     .add(NewFragment::new(scope.clone(), "likes tea", MemoryType::Preference))
//!     .await?;
//! let found = service.search(&scope, "tea", SearchOptions::default()).await?;
//! ```

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{DEFAULT_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT};
use crate::error::Result;
use crate::index::{partition_name, IndexDoc, IndexFilter, SearchIndex};
use crate::model::{
    ChatTurn, FragmentPatch, MemoryFragment, MemoryRecord, MemoryType, NewFragment, Role, Scope,
    UserStats, WriteOutcome,
};
use crate::record::RecordStore;

/// Knobs for a similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Maximum candidates to return; the service default applies when unset.
    pub limit: Option<usize>,
    pub memory_type: Option<MemoryType>,
    pub session_id: Option<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Mediates fragment operations across the record store and search index.
pub struct MemoryService {
    records: Arc<dyn RecordStore>,
    index: Arc<dyn SearchIndex>,
    default_search_limit: usize,
    default_history_limit: usize,
}

impl MemoryService {
    pub fn new(records: Arc<dyn RecordStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            records,
            index,
            default_search_limit: DEFAULT_SEARCH_LIMIT,
            default_history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Override the limits applied when a caller passes none.
    pub fn with_default_limits(mut self, search: usize, history: usize) -> Self {
        self.default_search_limit = search;
        self.default_history_limit = history;
        self
    }

    // ==================== Writes ====================

    /// Store a new fragment.
    ///
    /// The record store commit defines existence. The index write that
    /// follows may fail without reversing it; the outcome then reports the
    /// fragment as durable but unsearchable until the index catches up.
    pub async fn add(&self, new: NewFragment) -> Result<WriteOutcome<MemoryFragment>> {
        new.validate()?;
        let fragment = new.into_fragment();

        self.records.create_fragment(&fragment).await?;
        debug!("fragment {} committed", fragment.id);

        let partition = fragment.scope().partition();
        let doc = IndexDoc::project(&fragment);
        match self.propagate(&partition, &doc).await {
            Ok(()) => Ok(WriteOutcome::Committed(fragment)),
            Err(e) => {
                warn!("fragment {} committed but not indexed: {}", fragment.id, e);
                Ok(WriteOutcome::IndexDegraded {
                    value: fragment,
                    index_error: e.to_string(),
                })
            }
        }
    }

    /// Store one turn of session history.
    pub async fn add_message(
        &self,
        scope: Scope,
        content: impl Into<String>,
        role: Role,
        session_id: impl Into<String>,
        metadata: Option<Value>,
    ) -> Result<WriteOutcome<MemoryFragment>> {
        let mut new = NewFragment::new(scope, content, MemoryType::Session)
            .with_role(role)
            .with_session(session_id);
        if let Some(metadata) = metadata {
            new = new.with_metadata(metadata);
        }
        self.add(new).await
    }

    /// Apply a patch to a fragment the caller's scope owns.
    ///
    /// Ownership is checked against the index projection before anything is
    /// written; a missing projection or a foreign `user_id` reads as absent.
    /// The index copy is rewritten only when the patch changes content.
    pub async fn update(
        &self,
        scope: &Scope,
        fragment_id: &str,
        patch: &FragmentPatch,
    ) -> Result<Option<WriteOutcome<MemoryRecord>>> {
        patch.validate()?;

        let partition = scope.partition();
        let Some(doc) = self.index.get(&partition, fragment_id).await? else {
            return Ok(None);
        };
        if doc.user_id != scope.user_id {
            debug!("update of {} refused, scope mismatch", fragment_id);
            return Ok(None);
        }

        if !self.records.update_fragment(fragment_id, patch).await? {
            return Ok(None);
        }
        let Some(updated) = self.records.get_fragment(fragment_id).await? else {
            return Ok(None);
        };

        let content_changed = matches!(&patch.content, Some(c) if *c != doc.content);
        if !content_changed {
            return Ok(Some(WriteOutcome::Committed(MemoryRecord::unranked(
                updated,
            ))));
        }

        let new_doc = IndexDoc::project(&updated);
        let outcome = match self.index.upsert(&partition, &new_doc).await {
            Ok(()) => WriteOutcome::Committed(MemoryRecord::unranked(updated)),
            Err(e) => {
                warn!(
                    "fragment {} updated but index copy is stale: {}",
                    fragment_id, e
                );
                WriteOutcome::IndexDegraded {
                    value: MemoryRecord::unranked(updated),
                    index_error: e.to_string(),
                }
            }
        };
        Ok(Some(outcome))
    }

    /// Delete a fragment the caller's scope owns.
    ///
    /// Record row first; a fragment outside the scope reads as absent. Index
    /// removal failures are logged and swallowed since readers already drop
    /// candidates without a backing row.
    pub async fn delete(&self, scope: &Scope, fragment_id: &str) -> Result<bool> {
        let Some(existing) = self.records.get_fragment(fragment_id).await? else {
            return Ok(false);
        };
        if existing.scope() != *scope {
            debug!("delete of {} refused, scope mismatch", fragment_id);
            return Ok(false);
        }

        if !self.records.delete_fragment(fragment_id).await? {
            return Ok(false);
        }

        let partition = scope.partition();
        if let Err(e) = self.index.remove(&partition, fragment_id).await {
            warn!(
                "fragment {} deleted but index removal failed: {}",
                fragment_id, e
            );
        }
        Ok(true)
    }

    // ==================== Reads ====================

    /// Rank the caller's fragments against a free-text query.
    ///
    /// Candidates come from the index alone; each one is resolved against
    /// the record store and dropped if the row is gone. Returned content is
    /// the index copy, every other field the authoritative row. Hit counts
    /// for the returned fragments are bumped after resolution; the records
    /// themselves carry the pre-bump counts.
    pub async fn search(
        &self,
        scope: &Scope,
        query: &str,
        opts: SearchOptions,
    ) -> Result<Vec<MemoryRecord>> {
        let limit = opts.limit.unwrap_or(self.default_search_limit);
        let partition = scope.partition();

        let mut filter = IndexFilter::for_user(&scope.user_id);
        if let Some(t) = opts.memory_type {
            filter = filter.with_memory_type(t);
        }
        if let Some(s) = &opts.session_id {
            filter = filter.with_session(s.clone());
        }

        let hits = self.index.query(&partition, query, limit, &filter).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let mut resolved = self.records.get_fragments(&ids).await?;

        let mut records = Vec::with_capacity(hits.len());
        let mut returned_ids = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(mut fragment) = resolved.remove(&hit.id) else {
                debug!("dropping index hit {} with no backing row", hit.id);
                continue;
            };
            fragment.content = hit.content;
            returned_ids.push(fragment.id.clone());
            records.push(MemoryRecord::ranked(fragment, 1.0 / (1.0 + hit.distance)));
        }

        if !returned_ids.is_empty() {
            if let Err(e) = self.records.increment_hit_counts(&returned_ids).await {
                warn!(
                    "hit-count bump failed for {} fragments: {}",
                    returned_ids.len(),
                    e
                );
            }
        }

        Ok(records)
    }

    /// Enumerate the caller's fragments, newest first.
    pub async fn list(
        &self,
        scope: &Scope,
        memory_type: Option<MemoryType>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let limit = limit.unwrap_or(self.default_history_limit);
        let partition = scope.partition();

        let mut filter = IndexFilter::for_user(&scope.user_id);
        if let Some(t) = memory_type {
            filter = filter.with_memory_type(t);
        }

        let docs = self.index.fetch(&partition, &filter, limit, offset).await?;
        let mut records = self.resolve_docs(docs).await?;
        records.sort_by(|a, b| b.fragment.created_at.cmp(&a.fragment.created_at));
        Ok(records)
    }

    /// Fetch one session's turns in the order they happened.
    pub async fn get_history(
        &self,
        scope: &Scope,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let limit = limit.unwrap_or(self.default_history_limit);
        let partition = scope.partition();
        let filter = IndexFilter::for_user(&scope.user_id).with_session(session_id);

        let docs = self.index.fetch(&partition, &filter, limit, offset).await?;
        let mut records = self.resolve_docs(docs).await?;
        records.sort_by(|a, b| a.fragment.created_at.cmp(&b.fragment.created_at));
        Ok(records)
    }

    /// Session history shaped for an LLM messages API.
    ///
    /// Fragments stored without a role come back as `user` turns.
    pub async fn history_for_llm(
        &self,
        scope: &Scope,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatTurn>> {
        let records = self.get_history(scope, session_id, limit, 0).await?;
        Ok(records
            .into_iter()
            .map(|r| ChatTurn {
                role: r.fragment.role.unwrap_or(Role::User),
                content: r.fragment.content,
            })
            .collect())
    }

    /// Per-user totals, computed entirely from the record store.
    pub async fn get_stats(&self, scope: &Scope) -> Result<UserStats> {
        self.records.user_stats(scope).await
    }

    // ==================== Counters & maintenance ====================

    pub async fn increment_hit_count(&self, fragment_id: &str) -> Result<()> {
        self.records.increment_hit_count(fragment_id).await
    }

    pub async fn increment_hit_counts(&self, fragment_ids: &[String]) -> Result<()> {
        self.records.increment_hit_counts(fragment_ids).await
    }

    /// Drop the index partition for a project. Derived state only, so a
    /// failed drop is logged and swallowed.
    pub async fn drop_project_partition(&self, tenant_id: &str, project_id: &str) {
        let partition = partition_name(tenant_id, project_id);
        if let Err(e) = self.index.drop_partition(&partition).await {
            warn!("failed to drop partition {}: {}", partition, e);
        }
    }

    // ==================== Internals ====================

    async fn propagate(&self, partition: &str, doc: &IndexDoc) -> Result<()> {
        self.index.ensure_partition(partition).await?;
        self.index.upsert(partition, doc).await
    }

    /// Resolve index documents against the record store, dropping any whose
    /// backing row is gone. Content stays the index copy.
    async fn resolve_docs(&self, docs: Vec<IndexDoc>) -> Result<Vec<MemoryRecord>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        let mut resolved = self.records.get_fragments(&ids).await?;

        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            let Some(mut fragment) = resolved.remove(&doc.id) else {
                debug!("dropping index document {} with no backing row", doc.id);
                continue;
            };
            fragment.content = doc.content;
            records.push(MemoryRecord::unranked(fragment));
        }
        Ok(records)
    }
}
