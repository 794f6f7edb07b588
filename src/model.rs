//! Core data model: fragments, scopes, and the derived read/write result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum accepted content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;

/// Classification of a memory fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Factual,
    Preference,
    Episodic,
    Session,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Preference => "preference",
            Self::Episodic => "episodic",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "factual" => Ok(Self::Factual),
            "preference" => Ok(Self::Preference),
            "episodic" => Ok(Self::Episodic),
            "session" => Ok(Self::Session),
            other => Err(Error::validation(format!("unknown memory type: {other}"))),
        }
    }
}

/// Speaker role carried by session fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(Error::validation(format!("unknown role: {other}"))),
        }
    }
}

/// The isolation triple every fragment operation is scoped to.
///
/// Tenant and project select the index partition; `user_id` is enforced as a
/// mandatory filter inside the partition. An operation holding one scope can
/// never observe a fragment stored under a different one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: String,
    pub project_id: String,
    pub user_id: String,
}

impl Scope {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Search-index partition name for this scope's (tenant, project) pair.
    pub fn partition(&self) -> String {
        crate::index::partition_name(&self.tenant_id, &self.project_id)
    }
}

/// A stored memory fragment in its authoritative form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    /// Globally unique id, assigned at creation, never reused.
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub user_id: String,
    /// Free text payload.
    pub content: String,
    pub memory_type: MemoryType,
    /// Speaker role, required for session fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Conversation grouping, required for session fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Importance annotation in [0, 1].
    #[serde(default)]
    pub importance: f64,
    /// Open-ended caller metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Times this fragment was returned by a retrieval.
    #[serde(default)]
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryFragment {
    /// The scope triple this fragment belongs to.
    pub fn scope(&self) -> Scope {
        Scope::new(&self.tenant_id, &self.project_id, &self.user_id)
    }
}

/// Parameters for creating a fragment.
#[derive(Debug, Clone)]
pub struct NewFragment {
    pub scope: Scope,
    pub content: String,
    pub memory_type: MemoryType,
    pub role: Option<Role>,
    pub session_id: Option<String>,
    pub tags: Vec<String>,
    pub importance: f64,
    pub metadata: Option<serde_json::Value>,
}

impl NewFragment {
    pub fn new(scope: Scope, content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            scope,
            content: content.into(),
            memory_type,
            role: None,
            session_id: None,
            tags: Vec::new(),
            importance: 0.0,
            metadata: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check the classification/role/session combination and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::validation("content must not be empty"));
        }
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(Error::validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(Error::validation("importance must be within [0, 1]"));
        }
        if self.memory_type == MemoryType::Session {
            if self.role.is_none() {
                return Err(Error::validation("session memories require a role"));
            }
            if self.session_id.as_deref().map_or(true, |s| s.is_empty()) {
                return Err(Error::validation("session memories require a session_id"));
            }
        }
        Ok(())
    }

    /// Materialize into a full fragment with a fresh id and timestamps.
    pub fn into_fragment(self) -> MemoryFragment {
        let now = Utc::now();
        MemoryFragment {
            id: Uuid::new_v4().to_string(),
            tenant_id: self.scope.tenant_id,
            project_id: self.scope.project_id,
            user_id: self.scope.user_id,
            content: self.content,
            memory_type: self.memory_type,
            role: self.role,
            session_id: self.session_id,
            tags: self.tags,
            importance: self.importance,
            metadata: self.metadata,
            hit_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update to a fragment's mutable fields.
///
/// `None` fields are left untouched; scope keys, id, classification, and
/// timestamps are not updatable through this type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl FragmentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tags.is_none()
            && self.importance.is_none()
            && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::validation("update must set at least one field"));
        }
        if let Some(content) = &self.content {
            if content.trim().is_empty() {
                return Err(Error::validation("content must not be empty"));
            }
            if content.chars().count() > MAX_CONTENT_CHARS {
                return Err(Error::validation(format!(
                    "content exceeds {MAX_CONTENT_CHARS} characters"
                )));
            }
        }
        if let Some(importance) = self.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(Error::validation("importance must be within [0, 1]"));
            }
        }
        Ok(())
    }
}

/// A resolved fragment as returned by read operations.
///
/// All fields come from the record store except `content`, which reflects the
/// search index's copy (the text at the time of the last successful index
/// write), and `score`, which is set for ranked search results only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(flatten)]
    pub fragment: MemoryFragment,
    /// Similarity score in (0, 1]; higher is closer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl MemoryRecord {
    pub fn unranked(fragment: MemoryFragment) -> Self {
        Self {
            fragment,
            score: None,
        }
    }

    pub fn ranked(fragment: MemoryFragment, score: f64) -> Self {
        Self {
            fragment,
            score: Some(score),
        }
    }
}

/// One turn of session history shaped for an LLM messages API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Per-user fragment statistics, computed entirely from the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub total: u64,
    pub by_type: HashMap<MemoryType, u64>,
}

/// An onboarded tenant organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A project under a tenant. Each project owns one search-index partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// An API key bound to a (tenant, project) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// The key value itself; also the primary identifier.
    pub key: String,
    pub tenant_id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl ApiKey {
    pub fn new(
        key: impl Into<String>,
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            created_at: Utc::now(),
            is_active: true,
        }
    }
}

/// Outcome of a write that must land in both stores.
///
/// The record store commit alone defines existence; an index failure after a
/// successful commit degrades the write instead of failing it.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// Record store and search index both committed.
    Committed(T),
    /// Record store committed but the index write failed; the value is durable
    /// yet invisible to semantic search until the index catches up.
    IndexDegraded { value: T, index_error: String },
}

impl<T> WriteOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Committed(v) => v,
            Self::IndexDegraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Committed(v) => v,
            Self::IndexDegraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::IndexDegraded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope() -> Scope {
        Scope::new("t1", "p1", "u1")
    }

    #[test]
    fn test_memory_type_round_trip() {
        for t in [
            MemoryType::Factual,
            MemoryType::Preference,
            MemoryType::Episodic,
            MemoryType::Session,
        ] {
            let parsed: MemoryType = t.as_str().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("ephemeral".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_new_fragment_builder() {
        let new = NewFragment::new(scope(), "hello", MemoryType::Session)
            .with_role(Role::User)
            .with_session("s1")
            .with_tags(vec!["greeting".to_string()])
            .with_importance(0.4);
        assert!(new.validate().is_ok());

        let fragment = new.into_fragment();
        assert_eq!(fragment.user_id, "u1");
        assert_eq!(fragment.memory_type, MemoryType::Session);
        assert_eq!(fragment.role, Some(Role::User));
        assert_eq!(fragment.session_id.as_deref(), Some("s1"));
        assert_eq!(fragment.hit_count, 0);
        assert!(!fragment.id.is_empty());
    }

    #[test]
    fn test_session_fragment_requires_role_and_session() {
        let missing_both = NewFragment::new(scope(), "hi", MemoryType::Session);
        assert!(missing_both.validate().is_err());

        let missing_session =
            NewFragment::new(scope(), "hi", MemoryType::Session).with_role(Role::User);
        assert!(missing_session.validate().is_err());

        let complete = NewFragment::new(scope(), "hi", MemoryType::Session)
            .with_role(Role::User)
            .with_session("s1");
        assert!(complete.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let empty = NewFragment::new(scope(), "   ", MemoryType::Factual);
        assert!(empty.validate().is_err());

        let out_of_range =
            NewFragment::new(scope(), "ok", MemoryType::Factual).with_importance(1.5);
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_patch_validation() {
        assert!(FragmentPatch::new().validate().is_err());
        assert!(FragmentPatch::new().with_content(" ").validate().is_err());
        assert!(FragmentPatch::new()
            .with_importance(-0.1)
            .validate()
            .is_err());
        assert!(FragmentPatch::new()
            .with_content("updated")
            .with_importance(0.9)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_fragment_serde_round_trip() {
        let fragment = NewFragment::new(scope(), "likes tea", MemoryType::Preference)
            .with_tags(vec!["drink".to_string()])
            .with_metadata(serde_json::json!({"source": "chat"}))
            .into_fragment();

        let json = serde_json::to_string(&fragment).unwrap();
        let back: MemoryFragment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fragment);
        assert!(json.contains("\"memory_type\":\"preference\""));
    }

    #[test]
    fn test_record_flattens_fragment() {
        let fragment = NewFragment::new(scope(), "x", MemoryType::Factual).into_fragment();
        let record = MemoryRecord::ranked(fragment.clone(), 0.5);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], serde_json::json!(fragment.id));
        assert_eq!(value["score"], serde_json::json!(0.5));

        let unranked = serde_json::to_value(MemoryRecord::unranked(fragment)).unwrap();
        assert!(unranked.get("score").is_none());
    }

    #[test]
    fn test_write_outcome_accessors() {
        let committed: WriteOutcome<i32> = WriteOutcome::Committed(1);
        assert!(!committed.is_degraded());
        assert_eq!(*committed.value(), 1);

        let degraded = WriteOutcome::IndexDegraded {
            value: 2,
            index_error: "down".to_string(),
        };
        assert!(degraded.is_degraded());
        assert_eq!(degraded.into_value(), 2);
    }
}
