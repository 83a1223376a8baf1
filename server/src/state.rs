use std::sync::Arc;

use dashmap::DashMap;
use quillpad_core::{RelayStore, TokenVerifier, config::RelayTimings, store::Permission};
use uuid::Uuid;

use crate::{
    cache::SnapshotCache, metrics::RelayMetrics, persist::SnapshotStore, registry::RoomRegistry,
};

/// What a joined connection is bound to. Kept in a process-wide map next
/// to the room's seat and presence entries; the three are always updated
/// together.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub document_id: String,
    pub user_id: String,
    pub permission: Permission,
}

#[derive(Clone)]
pub struct AppState {
    pub timings: RelayTimings,
    pub verifier: Arc<TokenVerifier>,
    pub store: Arc<dyn RelayStore>,
    pub snapshots: Arc<SnapshotStore>,
    pub registry: Arc<RoomRegistry>,
    pub connections: Arc<DashMap<Uuid, ConnectionState>>,
    pub metrics: Arc<RelayMetrics>,
}

pub fn build_state(
    jwt_secret: &str,
    timings: RelayTimings,
    store: Arc<dyn RelayStore>,
    cache: Option<Arc<dyn SnapshotCache>>,
) -> AppState {
    let snapshots = Arc::new(SnapshotStore::new(
        store.clone(),
        cache,
        timings.durable_write_floor,
    ));

    AppState {
        timings,
        verifier: Arc::new(TokenVerifier::new(jwt_secret)),
        store,
        snapshots,
        registry: Arc::new(RoomRegistry::new()),
        connections: Arc::new(DashMap::new()),
        metrics: Arc::new(RelayMetrics::default()),
    }
}
