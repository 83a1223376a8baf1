use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{
    DocumentRecord, Permission, RelayStore, ShareLinkRecord, ShareRecord, VersionRecord,
};

/// In-process durable store used by the test suites. Mirrors the Postgres
/// backend's query semantics, including `created_at DESC` version ordering
/// with insertion-order tie-breaks.
#[derive(Default)]
pub struct MemoryRelayStore {
    documents: DashMap<String, DocumentRecord>,
    shares: DashMap<(String, String), ShareRecord>,
    links: DashMap<(String, String), ShareLinkRecord>,
    versions: Mutex<Vec<(u64, VersionRecord)>>,
    insert_seq: AtomicU64,
    fail_reads: AtomicBool,
}

impl MemoryRelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_document(&self, id: &str, owner_id: &str, title: &str) {
        let now = Utc::now();
        self.documents.insert(
            id.to_owned(),
            DocumentRecord {
                id: id.to_owned(),
                owner_id: owner_id.to_owned(),
                title: title.to_owned(),
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn insert_share(&self, document_id: &str, user_id: &str, permission: Permission) {
        self.shares.insert(
            (document_id.to_owned(), user_id.to_owned()),
            ShareRecord {
                document_id: document_id.to_owned(),
                user_id: user_id.to_owned(),
                permission,
            },
        );
    }

    pub fn insert_share_link(
        &self,
        document_id: &str,
        token: &str,
        permission: Permission,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.links.insert(
            (document_id.to_owned(), token.to_owned()),
            ShareLinkRecord {
                document_id: document_id.to_owned(),
                token: token.to_owned(),
                permission,
                expires_at,
            },
        );
    }

    /// Makes every read query fail until cleared. Exercises the resolver's
    /// store-error conflation and the load-path fallback.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn version_count(&self, document_id: &str) -> usize {
        self.versions
            .lock()
            .await
            .iter()
            .filter(|(_, version)| version.document_id == document_id)
            .count()
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(anyhow!("memory store reads disabled"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelayStore for MemoryRelayStore {
    async fn find_document_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        self.check_reads()?;
        Ok(self.documents.get(document_id).map(|doc| doc.clone()))
    }

    async fn find_share_by_document_and_user(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<ShareRecord>> {
        self.check_reads()?;
        Ok(self
            .shares
            .get(&(document_id.to_owned(), user_id.to_owned()))
            .map(|share| share.clone()))
    }

    async fn find_valid_share_link(
        &self,
        document_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ShareLinkRecord>> {
        self.check_reads()?;
        Ok(self
            .links
            .get(&(document_id.to_owned(), token.to_owned()))
            .filter(|link| link.expires_at.map_or(true, |expiry| expiry > now))
            .map(|link| link.clone()))
    }

    async fn find_latest_version(&self, document_id: &str) -> Result<Option<VersionRecord>> {
        self.check_reads()?;
        let versions = self.versions.lock().await;
        Ok(versions
            .iter()
            .filter(|(_, version)| version.document_id == document_id)
            .max_by_key(|(seq, version)| (version.created_at, *seq))
            .map(|(_, version)| version.clone()))
    }

    async fn create_version(
        &self,
        document_id: &str,
        author_id: &str,
        summary: &str,
        snapshot: &[u8],
    ) -> Result<VersionRecord> {
        let version = VersionRecord {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_owned(),
            author_id: author_id.to_owned(),
            summary: summary.to_owned(),
            snapshot: snapshot.to_vec(),
            created_at: Utc::now(),
        };

        let seq = self.insert_seq.fetch_add(1, Ordering::SeqCst);
        self.versions.lock().await.push((seq, version.clone()));
        Ok(version)
    }
}

/// Seeds a version row with an explicit `created_at`, for restore tests.
impl MemoryRelayStore {
    pub async fn insert_version_at(
        &self,
        document_id: &str,
        author_id: &str,
        summary: &str,
        snapshot: &[u8],
        created_at: DateTime<Utc>,
    ) {
        let version = VersionRecord {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_owned(),
            author_id: author_id.to_owned(),
            summary: summary.to_owned(),
            snapshot: snapshot.to_vec(),
            created_at,
        };
        let seq = self.insert_seq.fetch_add(1, Ordering::SeqCst);
        self.versions.lock().await.push((seq, version));
    }
}
