//! Authoritative record store for fragments and the tenant hierarchy.
//!
//! The record store is the single source of truth: a fragment exists exactly
//! when its row does, whatever the search index currently claims. Writes are
//! atomic single-row statements and hit-count increments happen inside the
//! database, never as read-modify-write round trips.

mod schema;
mod sqlite;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{ApiKey, FragmentPatch, MemoryFragment, Project, Scope, Tenant, UserStats};

pub use schema::{get_schema_version, initialize_schema, SCHEMA_VERSION};
pub use sqlite::SqliteRecordStore;

/// Authoritative relational backend.
///
/// Not-found is a negative result (`Option`/`bool`), distinct from `Err`,
/// which is reserved for backend failure.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ==================== Fragments ====================

    /// Insert a new fragment row.
    async fn create_fragment(&self, fragment: &MemoryFragment) -> Result<()>;

    /// Fetch one fragment by id.
    async fn get_fragment(&self, id: &str) -> Result<Option<MemoryFragment>>;

    /// Batch lookup. Ids without a row are simply absent from the map.
    async fn get_fragments(&self, ids: &[String]) -> Result<HashMap<String, MemoryFragment>>;

    /// Apply a patch to the supplied fields and bump `updated_at`.
    /// Returns `false` when the id has no row.
    async fn update_fragment(&self, id: &str, patch: &FragmentPatch) -> Result<bool>;

    /// Delete one fragment row. Returns `false` when the id has no row.
    async fn delete_fragment(&self, id: &str) -> Result<bool>;

    /// Atomically increment one fragment's hit count.
    async fn increment_hit_count(&self, id: &str) -> Result<()>;

    /// Atomically increment hit counts for a batch of ids.
    async fn increment_hit_counts(&self, ids: &[String]) -> Result<()>;

    /// Count fragments and break them down by type for one scope.
    async fn user_stats(&self, scope: &Scope) -> Result<UserStats>;

    // ==================== Hierarchy ====================

    async fn create_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>>;

    /// All tenants, newest first.
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Delete a tenant, cascading its projects, API keys, and fragments.
    async fn delete_tenant(&self, id: &str) -> Result<bool>;

    async fn create_project(&self, project: &Project) -> Result<()>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// Projects under one tenant, newest first.
    async fn list_projects(&self, tenant_id: &str) -> Result<Vec<Project>>;

    /// Delete a project owned by `tenant_id`, cascading its API keys and
    /// fragments. Returns `false` when the project is missing or owned by a
    /// different tenant.
    async fn delete_project(&self, id: &str, tenant_id: &str) -> Result<bool>;

    // ==================== API keys ====================

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()>;

    /// Resolve an active key to its binding. Revoked keys resolve to `None`.
    async fn verify_api_key(&self, key: &str) -> Result<Option<ApiKey>>;

    /// Deactivate a key. Returns `false` when missing or already revoked.
    async fn revoke_api_key(&self, key: &str) -> Result<bool>;
}
