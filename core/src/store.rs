use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a user holds on a document. Stored lowercase in the durable store
/// and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Owner,
    Editor,
    Viewer,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Owner => "owner",
            Permission::Editor => "editor",
            Permission::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Permission::Owner),
            "editor" => Some(Permission::Editor),
            "viewer" => Some(Permission::Viewer),
            _ => None,
        }
    }

    /// Whether this role may mutate document content.
    pub fn can_edit(&self) -> bool {
        !matches!(self, Permission::Viewer)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Explicit `(document, user)` grant row.
#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub document_id: String,
    pub user_id: String,
    pub permission: Permission,
}

/// Share-link row. A `None` expiry never expires; otherwise the link
/// grants access only strictly before `expires_at`.
#[derive(Debug, Clone)]
pub struct ShareLinkRecord {
    pub document_id: String,
    pub token: String,
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One append-only document snapshot.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub id: String,
    pub document_id: String,
    pub author_id: String,
    pub summary: String,
    pub snapshot: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The read/append surface the relay consumes from the durable store.
/// The authoring application owns the rest of the schema.
#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn find_document_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>>;

    async fn find_share_by_document_and_user(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<ShareRecord>>;

    /// Looks up a share link that is either unexpired at `now` or has no
    /// expiry at all.
    async fn find_valid_share_link(
        &self,
        document_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ShareLinkRecord>>;

    /// Most recent version by `created_at` (ties broken by insertion order).
    async fn find_latest_version(&self, document_id: &str) -> Result<Option<VersionRecord>>;

    async fn create_version(
        &self,
        document_id: &str,
        author_id: &str,
        summary: &str,
        snapshot: &[u8],
    ) -> Result<VersionRecord>;
}
