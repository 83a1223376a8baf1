use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::store::{
    DocumentRecord, Permission, RelayStore, ShareLinkRecord, ShareRecord, VersionRecord,
};

pub type PostgresPool = Pool<Postgres>;

pub async fn create_pool(url: &str, max_connections: u32) -> Result<PostgresPool> {
    let max_connections = max_connections.max(1);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .with_context(|| format!("failed to connect to postgres database: {url}"))
}

/// Durable store backed by the authoring application's Postgres schema.
/// The relay reads `documents`, `shares`, and `share_links`, and appends
/// to `versions`; it never mutates anything else.
pub struct PostgresRelayStore {
    pool: PostgresPool,
}

impl PostgresRelayStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    fn map_document(row: PgRow) -> DocumentRecord {
        DocumentRecord {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            title: row.get("title"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        }
    }

    fn map_version(row: PgRow) -> VersionRecord {
        VersionRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            author_id: row.get("author_id"),
            summary: row.get("summary"),
            snapshot: row.get::<Vec<u8>, _>("snapshot"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        }
    }

    fn parse_permission(raw: &str) -> Result<Permission> {
        Permission::parse(raw).ok_or_else(|| anyhow!("unknown permission value '{raw}'"))
    }
}

#[async_trait]
impl RelayStore for PostgresRelayStore {
    async fn find_document_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, owner_id, title, created_at, updated_at
             FROM documents
             WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::map_document))
    }

    async fn find_share_by_document_and_user(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<ShareRecord>> {
        let row = sqlx::query(
            "SELECT document_id, user_id, permission
             FROM shares
             WHERE document_id = $1 AND user_id = $2",
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ShareRecord {
                document_id: row.get("document_id"),
                user_id: row.get("user_id"),
                permission: Self::parse_permission(row.get::<String, _>("permission").as_str())?,
            })
        })
        .transpose()
    }

    async fn find_valid_share_link(
        &self,
        document_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ShareLinkRecord>> {
        let row = sqlx::query(
            "SELECT document_id, token, permission, expires_at
             FROM share_links
             WHERE document_id = $1
               AND token = $2
               AND (expires_at IS NULL OR expires_at > $3)",
        )
        .bind(document_id)
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ShareLinkRecord {
                document_id: row.get("document_id"),
                token: row.get("token"),
                permission: Self::parse_permission(row.get::<String, _>("permission").as_str())?,
                expires_at: row.get::<Option<DateTime<Utc>>, _>("expires_at"),
            })
        })
        .transpose()
    }

    async fn find_latest_version(&self, document_id: &str) -> Result<Option<VersionRecord>> {
        let row = sqlx::query(
            "SELECT id, document_id, author_id, summary, snapshot, created_at
             FROM versions
             WHERE document_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::map_version))
    }

    async fn create_version(
        &self,
        document_id: &str,
        author_id: &str,
        summary: &str,
        snapshot: &[u8],
    ) -> Result<VersionRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO versions (id, document_id, author_id, summary, snapshot, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(document_id)
        .bind(author_id)
        .bind(summary)
        .bind(snapshot)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(VersionRecord {
            id,
            document_id: document_id.to_owned(),
            author_id: author_id.to_owned(),
            summary: summary.to_owned(),
            snapshot: snapshot.to_vec(),
            created_at,
        })
    }
}
