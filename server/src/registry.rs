use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

use crate::{persist::SnapshotStore, room::Room};

/// Lazily-populated `documentId → Room` map. Rooms are created on first
/// join (restoring the latest snapshot) and reclaimed once they are empty
/// with no persist pending.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up or creates the room for a document. Snapshot-load
    /// failures start the room empty rather than failing the join; CRDT
    /// merge reconverges reconnecting peers either way.
    pub async fn open(&self, document_id: &str, snapshots: &SnapshotStore) -> Arc<Room> {
        if let Some(existing) = self.rooms.get(document_id) {
            return existing.clone();
        }

        let initial = match snapshots.load_latest(document_id).await {
            Ok(initial) => initial,
            Err(err) => {
                warn!(document_id, error = %err, "snapshot load failed; opening room empty");
                None
            }
        };

        let fresh = Arc::new(Room::new(document_id, initial));
        match self.rooms.entry(document_id.to_owned()) {
            // Someone else won the creation race while we were loading.
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(slot) => {
                debug!(document_id, "room created");
                slot.insert(fresh.clone());
                fresh
            }
        }
    }

    pub fn get(&self, document_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(document_id).map(|room| room.clone())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Drops the room if it is empty with no persist pending. The room is
    /// retired under its own lock inside the predicate, so a concurrent
    /// joiner holding a stale `Arc` observes the retirement and re-opens.
    pub fn remove_idle(&self, document_id: &str) {
        let removed = self
            .rooms
            .remove_if(document_id, |_, room| room.retire_if_idle());
        if removed.is_some() {
            debug!(document_id, "room reclaimed");
        }
    }

    /// Sweeper pass over every room.
    pub fn sweep_idle(&self) {
        let ids: Vec<String> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        for document_id in ids {
            self.remove_idle(&document_id);
        }
    }

    /// Shutdown: complete every owed persist before the process exits.
    pub async fn flush_all(&self, snapshots: &SnapshotStore) {
        for room in self.rooms() {
            room.flush_if_pending(snapshots).await;
        }
    }
}
