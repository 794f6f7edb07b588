//! Tenant, project, and API key administration.
//!
//! `ChannelManager` wraps the record store's hierarchy tables and keeps the
//! search index in step: deleting a project or tenant cascades the
//! authoritative rows away and then drops the matching index partitions.
//! Partition drops are best effort, since readers never trust the index
//! without a backing row anyway.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::index::{partition_name, SearchIndex};
use crate::model::{ApiKey, Project, Tenant};
use crate::record::RecordStore;

const KEY_PREFIX: &str = "mnm_";
/// Random characters after the prefix, sized like a 32-byte url-safe token.
const KEY_TOKEN_LEN: usize = 43;

/// Administration surface for onboarding (tenant, project) channels.
pub struct ChannelManager {
    records: Arc<dyn RecordStore>,
    index: Arc<dyn SearchIndex>,
}

impl ChannelManager {
    pub fn new(records: Arc<dyn RecordStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self { records, index }
    }

    // ==================== Tenants ====================

    pub async fn register_tenant(&self, name: impl Into<String>) -> Result<Tenant> {
        let tenant = Tenant::new(name);
        self.records.create_tenant(&tenant).await?;
        info!("registered tenant {} ({})", tenant.name, tenant.id);
        Ok(tenant)
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        self.records.get_tenant(tenant_id).await
    }

    pub async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.records.list_tenants().await
    }

    /// Delete a tenant with everything under it: keys, projects, fragments,
    /// and each project's index partition.
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<bool> {
        // Capture the projects before the cascade erases them.
        let projects = self.records.list_projects(tenant_id).await?;

        if !self.records.delete_tenant(tenant_id).await? {
            return Ok(false);
        }

        // Partitions are independent, so drop them in parallel.
        let drops: Vec<_> = projects
            .iter()
            .map(|project| self.drop_partition_logged(tenant_id, &project.id))
            .collect();
        futures::future::join_all(drops).await;
        info!(
            "deleted tenant {} and {} projects",
            tenant_id,
            projects.len()
        );
        Ok(true)
    }

    // ==================== Projects ====================

    pub async fn create_project(
        &self,
        tenant_id: &str,
        name: impl Into<String>,
    ) -> Result<Project> {
        if self.records.get_tenant(tenant_id).await?.is_none() {
            return Err(Error::validation(format!("unknown tenant: {}", tenant_id)));
        }

        let project = Project::new(tenant_id, name);
        self.records.create_project(&project).await?;
        Ok(project)
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.records.get_project(project_id).await
    }

    pub async fn list_projects(&self, tenant_id: &str) -> Result<Vec<Project>> {
        self.records.list_projects(tenant_id).await
    }

    /// Delete a project owned by `tenant_id`, then drop its partition.
    pub async fn delete_project(&self, project_id: &str, tenant_id: &str) -> Result<bool> {
        if !self.records.delete_project(project_id, tenant_id).await? {
            return Ok(false);
        }

        self.drop_partition_logged(tenant_id, project_id).await;
        Ok(true)
    }

    // ==================== API keys ====================

    /// Mint a key bound to an existing (tenant, project) pair.
    ///
    /// The project must belong to the tenant; a key crossing tenants would
    /// let its holder read another organization's partition.
    pub async fn generate_api_key(&self, tenant_id: &str, project_id: &str) -> Result<ApiKey> {
        if self.records.get_tenant(tenant_id).await?.is_none() {
            return Err(Error::validation(format!("unknown tenant: {}", tenant_id)));
        }
        let Some(project) = self.records.get_project(project_id).await? else {
            return Err(Error::validation(format!(
                "unknown project: {}",
                project_id
            )));
        };
        if project.tenant_id != tenant_id {
            return Err(Error::validation(format!(
                "project {} does not belong to tenant {}",
                project_id, tenant_id
            )));
        }

        let key = ApiKey::new(generate_key_value(), tenant_id, project_id);
        self.records.insert_api_key(&key).await?;
        Ok(key)
    }

    /// Resolve a key value to its binding. Inactive keys read as absent.
    pub async fn verify_api_key(&self, key: &str) -> Result<Option<ApiKey>> {
        self.records.verify_api_key(key).await
    }

    /// Deactivate a key. Returns false if it was already inactive or unknown.
    pub async fn revoke_api_key(&self, key: &str) -> Result<bool> {
        self.records.revoke_api_key(key).await
    }

    async fn drop_partition_logged(&self, tenant_id: &str, project_id: &str) {
        let partition = partition_name(tenant_id, project_id);
        if let Err(e) = self.index.drop_partition(&partition).await {
            warn!("failed to drop partition {}: {}", partition, e);
        }
    }
}

fn generate_key_value() -> String {
    let token: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(KEY_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", KEY_PREFIX, token)
}
