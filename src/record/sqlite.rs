//! SQLite-backed record store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::model::{
    ApiKey, FragmentPatch, MemoryFragment, MemoryType, Project, Scope, Tenant, UserStats,
};
use crate::record::schema::initialize_schema;
use crate::record::RecordStore;

/// SQLite-backed record store.
///
/// The connection mutex is a std `Mutex` and is never held across an await:
/// every database call runs synchronously inside the lock and completes
/// before the surrounding future yields.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open or create a record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        initialize_schema(&conn).map_err(Error::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn).map_err(Error::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::record_store(format!("failed to lock connection: {}", e)))?;
        f(&conn).map_err(Error::from)
    }

    fn row_to_fragment(row: &rusqlite::Row) -> rusqlite::Result<MemoryFragment> {
        let memory_type = row
            .get::<_, String>(5)?
            .parse()
            .unwrap_or(MemoryType::Factual);
        let role = row
            .get::<_, Option<String>>(6)?
            .and_then(|s| s.parse().ok());
        let tags: Vec<String> = row
            .get::<_, String>(8)
            .map(|s| serde_json::from_str(&s).unwrap_or_default())?;
        let metadata: Option<Value> = row
            .get::<_, Option<String>>(10)?
            .and_then(|s| serde_json::from_str(&s).ok());

        Ok(MemoryFragment {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            project_id: row.get(2)?,
            user_id: row.get(3)?,
            content: row.get(4)?,
            memory_type,
            role,
            session_id: row.get(7)?,
            tags,
            importance: row.get(9)?,
            metadata,
            hit_count: row.get::<_, i64>(11)? as u64,
            created_at: parse_datetime(row.get::<_, String>(12)?),
            updated_at: parse_datetime(row.get::<_, String>(13)?),
        })
    }

    fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<Tenant> {
        Ok(Tenant {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: parse_datetime(row.get::<_, String>(2)?),
        })
    }

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
        Ok(Project {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            created_at: parse_datetime(row.get::<_, String>(3)?),
        })
    }

    fn row_to_api_key(row: &rusqlite::Row) -> rusqlite::Result<ApiKey> {
        Ok(ApiKey {
            key: row.get(0)?,
            tenant_id: row.get(1)?,
            project_id: row.get(2)?,
            created_at: parse_datetime(row.get::<_, String>(3)?),
            is_active: row.get::<_, i64>(4)? != 0,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    // ==================== Fragments ====================

    async fn create_fragment(&self, fragment: &MemoryFragment) -> Result<()> {
        let tags = serde_json::to_string(&fragment.tags)?;
        let metadata = fragment
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memory_fragments (
                    id, tenant_id, project_id, user_id, content, memory_type, role,
                    session_id, tags, importance, metadata, hit_count, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    fragment.id,
                    fragment.tenant_id,
                    fragment.project_id,
                    fragment.user_id,
                    fragment.content,
                    fragment.memory_type.as_str(),
                    fragment.role.map(|r| r.as_str()),
                    fragment.session_id,
                    tags,
                    fragment.importance,
                    metadata,
                    fragment.hit_count as i64,
                    fragment.created_at.to_rfc3339(),
                    fragment.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    async fn get_fragment(&self, id: &str) -> Result<Option<MemoryFragment>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, tenant_id, project_id, user_id, content, memory_type, role,
                        session_id, tags, importance, metadata, hit_count, created_at, updated_at
                 FROM memory_fragments WHERE id = ?1",
                params![id],
                |row| Self::row_to_fragment(row),
            )
            .optional()
        })
    }

    async fn get_fragments(&self, ids: &[String]) -> Result<HashMap<String, MemoryFragment>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = ids.iter().map(|_| "?".to_string()).collect();
            let sql = format!(
                "SELECT id, tenant_id, project_id, user_id, content, memory_type, role,
                        session_id, tags, importance, metadata, hit_count, created_at, updated_at
                 FROM memory_fragments WHERE id IN ({})",
                placeholders.join(",")
            );

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let fragments = stmt
                .query_map(params_refs.as_slice(), |row| Self::row_to_fragment(row))?
                .filter_map(|r| r.ok())
                .map(|f| (f.id.clone(), f))
                .collect();

            Ok(fragments)
        })
    }

    async fn update_fragment(&self, id: &str, patch: &FragmentPatch) -> Result<bool> {
        let tags = patch
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = patch
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(move |conn| {
            let mut sets: Vec<&str> = Vec::new();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(content) = &patch.content {
                sets.push("content = ?");
                params_vec.push(Box::new(content.clone()));
            }
            if let Some(tags) = tags {
                sets.push("tags = ?");
                params_vec.push(Box::new(tags));
            }
            if let Some(importance) = patch.importance {
                sets.push("importance = ?");
                params_vec.push(Box::new(importance));
            }
            if let Some(metadata) = metadata {
                sets.push("metadata = ?");
                params_vec.push(Box::new(metadata));
            }
            sets.push("updated_at = ?");
            params_vec.push(Box::new(Utc::now().to_rfc3339()));
            params_vec.push(Box::new(id.to_string()));

            let sql = format!("UPDATE memory_fragments SET {} WHERE id = ?", sets.join(", "));
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let rows = conn.execute(&sql, params_refs.as_slice())?;
            Ok(rows > 0)
        })
    }

    async fn delete_fragment(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM memory_fragments WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    async fn increment_hit_count(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memory_fragments SET hit_count = hit_count + 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    async fn increment_hit_counts(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = ids.iter().map(|_| "?".to_string()).collect();
            let sql = format!(
                "UPDATE memory_fragments SET hit_count = hit_count + 1 WHERE id IN ({})",
                placeholders.join(",")
            );
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            conn.execute(&sql, params_refs.as_slice())?;
            Ok(())
        })
    }

    async fn user_stats(&self, scope: &Scope) -> Result<UserStats> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memory_fragments
                 WHERE tenant_id = ?1 AND project_id = ?2 AND user_id = ?3",
                params![scope.tenant_id, scope.project_id, scope.user_id],
                |row| row.get(0),
            )?;

            let by_type: HashMap<MemoryType, u64> = {
                let mut stmt = conn.prepare(
                    "SELECT memory_type, COUNT(*) FROM memory_fragments
                     WHERE tenant_id = ?1 AND project_id = ?2 AND user_id = ?3
                     GROUP BY memory_type",
                )?;
                let rows = stmt.query_map(
                    params![scope.tenant_id, scope.project_id, scope.user_id],
                    |row| {
                        let type_str: String = row.get(0)?;
                        let count: i64 = row.get(1)?;
                        Ok((type_str, count))
                    },
                )?;
                rows.filter_map(|r| r.ok())
                    .filter_map(|(type_str, count)| {
                        type_str.parse().ok().map(|t| (t, count as u64))
                    })
                    .collect()
            };

            Ok(UserStats {
                user_id: scope.user_id.clone(),
                total: total as u64,
                by_type,
            })
        })
    }

    // ==================== Hierarchy ====================

    async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![tenant.id, tenant.name, tenant.created_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM tenants WHERE id = ?1",
                params![id],
                |row| Self::row_to_tenant(row),
            )
            .optional()
        })
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, created_at FROM tenants ORDER BY created_at DESC")?;
            let tenants = stmt
                .query_map([], |row| Self::row_to_tenant(row))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(tenants)
        })
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM tenants WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    async fn create_project(&self, project: &Project) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, tenant_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.id,
                    project.tenant_id,
                    project.name,
                    project.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, tenant_id, name, created_at FROM projects WHERE id = ?1",
                params![id],
                |row| Self::row_to_project(row),
            )
            .optional()
        })
    }

    async fn list_projects(&self, tenant_id: &str) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, name, created_at FROM projects
                 WHERE tenant_id = ?1 ORDER BY created_at DESC",
            )?;
            let projects = stmt
                .query_map(params![tenant_id], |row| Self::row_to_project(row))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(projects)
        })
    }

    async fn delete_project(&self, id: &str, tenant_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM projects WHERE id = ?1 AND tenant_id = ?2",
                params![id, tenant_id],
            )?;
            Ok(rows > 0)
        })
    }

    // ==================== API keys ====================

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_keys (key, tenant_id, project_id, created_at, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key.key,
                    key.tenant_id,
                    key.project_id,
                    key.created_at.to_rfc3339(),
                    key.is_active as i64,
                ],
            )?;
            Ok(())
        })
    }

    async fn verify_api_key(&self, key: &str) -> Result<Option<ApiKey>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT key, tenant_id, project_id, created_at, is_active
                 FROM api_keys WHERE key = ?1 AND is_active = 1",
                params![key],
                |row| Self::row_to_api_key(row),
            )
            .optional()
        })
    }

    async fn revoke_api_key(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE api_keys SET is_active = 0 WHERE key = ?1 AND is_active = 1",
                params![key],
            )?;
            Ok(rows > 0)
        })
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewFragment;
    use pretty_assertions::assert_eq;

    async fn seed_channel(store: &SqliteRecordStore, tenant_id: &str, project_id: &str) {
        store
            .create_tenant(&Tenant {
                id: tenant_id.to_string(),
                name: format!("{} org", tenant_id),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .create_project(&Project {
                id: project_id.to_string(),
                tenant_id: tenant_id.to_string(),
                name: format!("{} project", project_id),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn seeded_store() -> SqliteRecordStore {
        let store = SqliteRecordStore::in_memory().unwrap();
        seed_channel(&store, "t1", "p1").await;
        store
    }

    fn fragment(content: &str, memory_type: MemoryType) -> MemoryFragment {
        NewFragment::new(Scope::new("t1", "p1", "u1"), content, memory_type).into_fragment()
    }

    #[tokio::test]
    async fn test_create_and_get_fragment() {
        let store = seeded_store().await;
        let original = NewFragment::new(
            Scope::new("t1", "p1", "u1"),
            "the deploy runs at midnight",
            MemoryType::Factual,
        )
        .with_tags(vec!["ops".to_string()])
        .with_importance(0.7)
        .with_metadata(serde_json::json!({"source": "runbook"}))
        .into_fragment();

        store.create_fragment(&original).await.unwrap();
        let retrieved = store.get_fragment(&original.id).await.unwrap().unwrap();

        assert_eq!(retrieved, original);
    }

    #[tokio::test]
    async fn test_get_fragment_missing() {
        let store = seeded_store().await;
        assert!(store.get_fragment("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_fragments_batch_skips_missing() {
        let store = seeded_store().await;
        let a = fragment("alpha", MemoryType::Factual);
        let b = fragment("beta", MemoryType::Preference);
        store.create_fragment(&a).await.unwrap();
        store.create_fragment(&b).await.unwrap();

        let ids = vec![a.id.clone(), "ghost".to_string(), b.id.clone()];
        let found = store.get_fragments(&ids).await.unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.contains_key(&a.id));
        assert!(found.contains_key(&b.id));

        assert!(store.get_fragments(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_fragment() {
        let store = seeded_store().await;
        let f = fragment("draft", MemoryType::Factual);
        store.create_fragment(&f).await.unwrap();

        let patch = FragmentPatch::new()
            .with_content("final")
            .with_importance(0.9);
        assert!(store.update_fragment(&f.id, &patch).await.unwrap());

        let updated = store.get_fragment(&f.id).await.unwrap().unwrap();
        assert_eq!(updated.content, "final");
        assert_eq!(updated.importance, 0.9);
        assert_eq!(updated.tags, f.tags);
        assert!(updated.updated_at >= f.updated_at);

        assert!(!store.update_fragment("ghost", &patch).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_fragment_idempotent() {
        let store = seeded_store().await;
        let f = fragment("short lived", MemoryType::Episodic);
        store.create_fragment(&f).await.unwrap();

        assert!(store.delete_fragment(&f.id).await.unwrap());
        assert!(!store.delete_fragment(&f.id).await.unwrap());
        assert!(store.get_fragment(&f.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hit_count_increments() {
        let store = seeded_store().await;
        let a = fragment("a", MemoryType::Factual);
        let b = fragment("b", MemoryType::Factual);
        store.create_fragment(&a).await.unwrap();
        store.create_fragment(&b).await.unwrap();

        store.increment_hit_count(&a.id).await.unwrap();
        store
            .increment_hit_counts(&[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        store.increment_hit_counts(&[]).await.unwrap();

        assert_eq!(
            store.get_fragment(&a.id).await.unwrap().unwrap().hit_count,
            2
        );
        assert_eq!(
            store.get_fragment(&b.id).await.unwrap().unwrap().hit_count,
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hit_count_increments() {
        let store = Arc::new(seeded_store().await);
        let f = fragment("contended", MemoryType::Factual);
        store.create_fragment(&f).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let id = f.id.clone();
            handles.push(tokio::spawn(async move {
                store.increment_hit_count(&id).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let updated = store.get_fragment(&f.id).await.unwrap().unwrap();
        assert_eq!(updated.hit_count, 10);
    }

    #[tokio::test]
    async fn test_user_stats_scoped() {
        let store = seeded_store().await;
        store
            .create_fragment(&fragment("f1", MemoryType::Factual))
            .await
            .unwrap();
        store
            .create_fragment(&fragment("f2", MemoryType::Factual))
            .await
            .unwrap();
        store
            .create_fragment(&fragment("p1", MemoryType::Preference))
            .await
            .unwrap();

        let other_user = NewFragment::new(
            Scope::new("t1", "p1", "u2"),
            "other",
            MemoryType::Factual,
        )
        .into_fragment();
        store.create_fragment(&other_user).await.unwrap();

        let stats = store
            .user_stats(&Scope::new("t1", "p1", "u1"))
            .await
            .unwrap();
        assert_eq!(stats.user_id, "u1");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get(&MemoryType::Factual), Some(&2));
        assert_eq!(stats.by_type.get(&MemoryType::Preference), Some(&1));
        assert!(stats.by_type.get(&MemoryType::Session).is_none());
    }

    #[tokio::test]
    async fn test_tenant_listing_newest_first() {
        let store = SqliteRecordStore::in_memory().unwrap();
        store
            .create_tenant(&Tenant {
                id: "old".to_string(),
                name: "old org".to_string(),
                created_at: Utc::now() - chrono::Duration::days(1),
            })
            .await
            .unwrap();
        store
            .create_tenant(&Tenant {
                id: "new".to_string(),
                name: "new org".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let tenants = store.list_tenants().await.unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].id, "new");
        assert_eq!(tenants[1].id, "old");
    }

    #[tokio::test]
    async fn test_delete_tenant_cascades() {
        let store = seeded_store().await;
        let f = fragment("doomed", MemoryType::Factual);
        store.create_fragment(&f).await.unwrap();
        store
            .insert_api_key(&ApiKey::new("mnm_test", "t1", "p1"))
            .await
            .unwrap();

        assert!(store.delete_tenant("t1").await.unwrap());
        assert!(!store.delete_tenant("t1").await.unwrap());

        assert!(store.get_project("p1").await.unwrap().is_none());
        assert!(store.get_fragment(&f.id).await.unwrap().is_none());
        assert!(store.verify_api_key("mnm_test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_project_checks_ownership() {
        let store = seeded_store().await;
        seed_channel(&store, "t2", "p2").await;
        let f = fragment("in p1", MemoryType::Factual);
        store.create_fragment(&f).await.unwrap();

        // Wrong tenant: nothing happens
        assert!(!store.delete_project("p1", "t2").await.unwrap());
        assert!(store.get_project("p1").await.unwrap().is_some());

        // Owning tenant: project and fragments go
        assert!(store.delete_project("p1", "t1").await.unwrap());
        assert!(store.get_project("p1").await.unwrap().is_none());
        assert!(store.get_fragment(&f.id).await.unwrap().is_none());
        assert_eq!(store.list_projects("t1").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_api_key_lifecycle() {
        let store = seeded_store().await;
        let key = ApiKey::new("mnm_lifecycle", "t1", "p1");
        store.insert_api_key(&key).await.unwrap();

        let verified = store.verify_api_key("mnm_lifecycle").await.unwrap().unwrap();
        assert_eq!(verified.tenant_id, "t1");
        assert_eq!(verified.project_id, "p1");
        assert!(verified.is_active);

        assert!(store.revoke_api_key("mnm_lifecycle").await.unwrap());
        assert!(store.verify_api_key("mnm_lifecycle").await.unwrap().is_none());
        assert!(!store.revoke_api_key("mnm_lifecycle").await.unwrap());
        assert!(!store.revoke_api_key("mnm_missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let id = {
            let store = SqliteRecordStore::open(&path).unwrap();
            seed_channel(&store, "t1", "p1").await;
            let f = fragment("durable", MemoryType::Factual);
            store.create_fragment(&f).await.unwrap();
            f.id
        };

        let reopened = SqliteRecordStore::open(&path).unwrap();
        let found = reopened.get_fragment(&id).await.unwrap().unwrap();
        assert_eq!(found.content, "durable");
    }
}
