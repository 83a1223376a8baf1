use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use dashmap::DashMap;
use quillpad_core::RelayStore;
use tracing::{debug, warn};

use crate::cache::{CacheError, SnapshotCache, state_key};

/// Tiered snapshot persistence: an optional fast cache in front of the
/// append-only durable version store.
///
/// While the cache is ready it is authoritative for live collaboration
/// and absorbs the whole update stream; durable rows are only written by
/// the degraded path below (and by explicit user saves, which live in the
/// authoring surface). When the cache reports a lost connection the tier
/// flips to durable-only and writes rate-limited auto-saves so a cold
/// restart still has something recent to restore from.
pub struct SnapshotStore {
    cache: Option<Arc<dyn SnapshotCache>>,
    cache_ready: AtomicBool,
    store: Arc<dyn RelayStore>,
    durable_write_floor: Duration,
    last_durable_save: DashMap<String, Instant>,
}

pub const AUTO_SAVE_SUMMARY: &str = "Auto-save";

impl SnapshotStore {
    pub fn new(
        store: Arc<dyn RelayStore>,
        cache: Option<Arc<dyn SnapshotCache>>,
        durable_write_floor: Duration,
    ) -> Self {
        let has_cache = cache.is_some();
        Self {
            cache,
            cache_ready: AtomicBool::new(has_cache),
            store,
            durable_write_floor,
            last_durable_save: DashMap::new(),
        }
    }

    /// Whether the fast tier is currently usable. Never cache this across
    /// awaits; the bit can flip under load.
    pub fn cache_ready(&self) -> bool {
        self.cache.is_some() && self.cache_ready.load(Ordering::SeqCst)
    }

    /// Latest known snapshot bytes for a document: cache first, then the
    /// most recent durable version, then none.
    pub async fn load_latest(&self, document_id: &str) -> Result<Option<Vec<u8>>> {
        if let Some(cache) = self.ready_cache() {
            match cache.get(&state_key(document_id)).await {
                Ok(Some(encoded)) => match BASE64.decode(encoded.as_bytes()) {
                    Ok(bytes) => return Ok(Some(bytes)),
                    Err(err) => {
                        warn!(document_id, error = %err, "cache held undecodable snapshot; falling back");
                    }
                },
                Ok(None) => {}
                Err(CacheError::ConnectionLost) => self.mark_cache_down(document_id),
                Err(err) => {
                    warn!(document_id, error = %err, "cache read failed; falling back to durable store");
                }
            }
        }

        let version = self
            .store
            .find_latest_version(document_id)
            .await
            .context("load latest version")?;
        Ok(version.map(|version| version.snapshot))
    }

    /// Persists the current document state. Cache-only while the cache is
    /// ready; otherwise a rate-limited, deduplicated durable auto-save.
    pub async fn save_snapshot(&self, document_id: &str, bytes: &[u8]) -> Result<()> {
        if let Some(cache) = self.ready_cache() {
            let encoded = BASE64.encode(bytes);
            match cache.set(&state_key(document_id), &encoded).await {
                Ok(()) => return Ok(()),
                Err(CacheError::ConnectionLost) => self.mark_cache_down(document_id),
                Err(err) => {
                    return Err(anyhow::anyhow!(err)).context("cache snapshot write");
                }
            }
        }

        self.save_durable(document_id, bytes).await
    }

    async fn save_durable(&self, document_id: &str, bytes: &[u8]) -> Result<()> {
        if let Some(last) = self.last_durable_save.get(document_id) {
            if last.elapsed() < self.durable_write_floor {
                debug!(document_id, "durable auto-save floor not reached; skipping");
                return Ok(());
            }
        }

        let latest = self
            .store
            .find_latest_version(document_id)
            .await
            .context("compare against latest version")?;
        if latest.is_some_and(|version| version.snapshot == bytes) {
            debug!(document_id, "snapshot unchanged since latest version; skipping");
            return Ok(());
        }

        let Some(document) = self
            .store
            .find_document_by_id(document_id)
            .await
            .context("resolve document owner for auto-save")?
        else {
            warn!(document_id, "document vanished before auto-save; skipping");
            return Ok(());
        };

        self.store
            .create_version(document_id, &document.owner_id, AUTO_SAVE_SUMMARY, bytes)
            .await
            .context("append auto-save version")?;
        self.last_durable_save
            .insert(document_id.to_owned(), Instant::now());

        debug!(document_id, bytes = bytes.len(), "durable auto-save written");
        Ok(())
    }

    /// Issued from the sweeper tick so a recovered cache flips the tier
    /// back to the fast path.
    pub async fn probe_cache(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        if self.cache_ready.load(Ordering::SeqCst) {
            return;
        }

        match cache.ping().await {
            Ok(()) => {
                self.cache_ready.store(true, Ordering::SeqCst);
                warn!("snapshot cache back online; resuming cache-first persistence");
            }
            Err(err) => {
                debug!(error = %err, "snapshot cache still unreachable");
            }
        }
    }

    fn ready_cache(&self) -> Option<&Arc<dyn SnapshotCache>> {
        if self.cache_ready() {
            self.cache.as_ref()
        } else {
            None
        }
    }

    fn mark_cache_down(&self, document_id: &str) {
        if self.cache_ready.swap(false, Ordering::SeqCst) {
            warn!(document_id, "snapshot cache connection lost; falling back to durable writes");
        }
    }
}
