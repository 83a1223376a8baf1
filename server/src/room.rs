use std::{collections::HashMap, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use quillpad_core::store::Permission;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update, updates::decoder::Decode};

use crate::{
    error::RelayError,
    metrics::RelayMetrics,
    persist::SnapshotStore,
    presence::{self, PresenceChange, PresenceEntry},
    socket::{Outgoing, OutboundSender, frames::ServerFrame},
};

/// One connection's membership in a room.
pub struct Seat {
    pub user_id: String,
    pub permission: Permission,
    pub outbound: OutboundSender,
    pub kill: Arc<Notify>,
}

/// Returned by `join` when the sweeper retired the room between lookup
/// and join; the caller re-opens through the registry.
#[derive(Debug)]
pub struct RoomRetired;

pub enum ApplyOutcome {
    /// Update merged and broadcast. `schedule_persist` is set for exactly
    /// one update per debounce window.
    Applied { schedule_persist: bool },
    /// Sender is a viewer; an error frame was sent, nothing changed.
    ReadOnly,
    /// Undecodable payload; logged and dropped, sender keeps its stream.
    Dropped,
    /// Sender is no longer a member (raced with eviction).
    NotMember,
}

pub struct EvictedConn {
    pub conn_id: Uuid,
    pub kill: Arc<Notify>,
}

/// Per-document in-memory state. Every mutation of `{doc, seats,
/// presence, persist_pending}` happens under the one mutex, so the
/// decode→apply→broadcast→schedule sequence of one update is atomic with
/// respect to every other update in the room.
pub struct Room {
    document_id: String,
    inner: Mutex<RoomState>,
}

struct RoomState {
    doc: Doc,
    seats: HashMap<Uuid, Seat>,
    presence: HashMap<Uuid, PresenceEntry>,
    persist_pending: bool,
    retired: bool,
}

impl Room {
    /// Builds a room from the latest persisted snapshot, or empty when
    /// there is none (or it fails to decode — reconnecting peers converge
    /// through CRDT merge either way).
    pub fn new(document_id: impl Into<String>, initial: Option<Vec<u8>>) -> Self {
        let document_id = document_id.into();
        let doc = Doc::new();

        if let Some(bytes) = initial {
            match Update::decode_v1(&bytes) {
                Ok(update) => {
                    let mut txn = doc.transact_mut();
                    if let Err(err) = txn.apply_update(update) {
                        warn!(document_id, error = %err, "failed to apply restored snapshot; starting empty");
                    }
                }
                Err(err) => {
                    warn!(document_id, error = %err, "failed to decode restored snapshot; starting empty");
                }
            }
        }

        Self {
            document_id,
            inner: Mutex::new(RoomState {
                doc,
                seats: HashMap::new(),
                presence: HashMap::new(),
                persist_pending: false,
                retired: false,
            }),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Registers a connection: inserts its seat and presence entry, sends
    /// the joiner (alone) a `doc_sync` with the state at this moment, and
    /// broadcasts the refreshed presence view to the whole room.
    pub async fn join(
        &self,
        conn_id: Uuid,
        seat: Seat,
        entry: PresenceEntry,
    ) -> Result<(), RoomRetired> {
        let mut state = self.inner.lock().await;
        if state.retired {
            return Err(RoomRetired);
        }

        let sync_frame = ServerFrame::DocSync {
            update: BASE64.encode(encode_state(&state.doc)),
        }
        .to_json();
        let _ = seat.outbound.send(Outgoing::Frame(sync_frame));

        state.seats.insert(conn_id, seat);
        state.presence.insert(conn_id, entry);
        self.broadcast_presence(&state);
        Ok(())
    }

    /// Permission gate, decode, merge, fan-out, persist scheduling — one
    /// critical section per update.
    pub async fn apply_update(
        &self,
        conn_id: Uuid,
        encoded: &str,
        metrics: &RelayMetrics,
    ) -> ApplyOutcome {
        let mut state = self.inner.lock().await;

        let Some(seat) = state.seats.get(&conn_id) else {
            return ApplyOutcome::NotMember;
        };

        if !seat.permission.can_edit() {
            let frame = ServerFrame::error(RelayError::ReadOnly.frame_message()).to_json();
            let _ = seat.outbound.send(Outgoing::Frame(frame));
            return ApplyOutcome::ReadOnly;
        }

        let bytes = match BASE64.decode(encoded.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(document_id = %self.document_id, error = %err, "dropping update with invalid base64");
                return ApplyOutcome::Dropped;
            }
        };

        let update = match Update::decode_v1(&bytes) {
            Ok(update) => update,
            Err(err) => {
                debug!(document_id = %self.document_id, error = %err, "dropping undecodable update");
                return ApplyOutcome::Dropped;
            }
        };

        {
            let mut txn = state.doc.transact_mut();
            if let Err(err) = txn.apply_update(update) {
                debug!(document_id = %self.document_id, error = %err, "dropping unappliable update");
                return ApplyOutcome::Dropped;
            }
        }

        metrics.record_op();

        // The sender's replica already reflects the change; everyone else
        // gets the original encoded payload.
        let frame = ServerFrame::YjsUpdate {
            update: encoded.to_owned(),
        }
        .to_json();
        for (id, peer) in &state.seats {
            if *id != conn_id {
                let _ = peer.outbound.send(Outgoing::Frame(frame.clone()));
            }
        }

        let schedule_persist = if state.persist_pending {
            false
        } else {
            state.persist_pending = true;
            true
        };

        ApplyOutcome::Applied { schedule_persist }
    }

    /// Merges a partial presence change and rebroadcasts. Returns false
    /// when the connection is not (or no longer) a member.
    pub async fn merge_presence(&self, conn_id: Uuid, change: &PresenceChange) -> bool {
        let mut state = self.inner.lock().await;
        let Some(entry) = state.presence.get_mut(&conn_id) else {
            return false;
        };

        entry.merge(change);
        entry.touch();
        self.broadcast_presence(&state);
        true
    }

    /// Heartbeat refresh only; no broadcast.
    pub async fn touch(&self, conn_id: Uuid) {
        let mut state = self.inner.lock().await;
        if let Some(entry) = state.presence.get_mut(&conn_id) {
            entry.touch();
        }
    }

    /// Removes a connection from the seat and presence maps. Idempotent:
    /// the close handler and the sweeper both call it, in any order.
    pub async fn remove(&self, conn_id: Uuid) -> bool {
        let mut state = self.inner.lock().await;
        let removed = state.seats.remove(&conn_id).is_some();
        state.presence.remove(&conn_id);
        if removed {
            self.broadcast_presence(&state);
        }
        removed
    }

    /// Sweeper pass: evicts members whose heartbeat went stale, closing
    /// their streams and rebroadcasting presence once.
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<EvictedConn> {
        let mut state = self.inner.lock().await;

        let stale: Vec<Uuid> = state
            .presence
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for conn_id in stale {
            state.presence.remove(&conn_id);
            if let Some(seat) = state.seats.remove(&conn_id) {
                let _ = seat.outbound.send(Outgoing::Close);
                evicted.push(EvictedConn {
                    conn_id,
                    kill: seat.kill,
                });
            }
        }

        if !evicted.is_empty() {
            debug!(document_id = %self.document_id, count = evicted.len(), "evicted stale connections");
            self.broadcast_presence(&state);
        }
        evicted
    }

    pub async fn ping_all(&self) {
        let state = self.inner.lock().await;
        for seat in state.seats.values() {
            let _ = seat.outbound.send(Outgoing::Ping);
        }
    }

    pub async fn member_count(&self) -> usize {
        self.inner.lock().await.seats.len()
    }

    /// Marks the room retired when it is empty with no persist pending.
    /// Called from the registry's removal predicate; `try_lock` keeps the
    /// predicate non-blocking — a locked room is busy, hence not idle.
    pub fn retire_if_idle(&self) -> bool {
        match self.inner.try_lock() {
            Ok(mut state) => {
                if state.seats.is_empty() && !state.persist_pending {
                    state.retired = true;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Debounce timer body: clears the pending flag, then persists the
    /// state encoded at that point. Clearing first lets the next update
    /// schedule a fresh timer while this write is in flight.
    pub async fn flush(&self, snapshots: &SnapshotStore) {
        let bytes = {
            let mut state = self.inner.lock().await;
            state.persist_pending = false;
            encode_state(&state.doc)
        };

        if let Err(err) = snapshots.save_snapshot(&self.document_id, &bytes).await {
            warn!(document_id = %self.document_id, error = %err, "debounced persist failed");
        }
    }

    /// Shutdown path: flush only if a persist is still owed.
    pub async fn flush_if_pending(&self, snapshots: &SnapshotStore) {
        let pending = self.inner.lock().await.persist_pending;
        if pending {
            self.flush(snapshots).await;
        }
    }

    pub async fn encode_state_bytes(&self) -> Vec<u8> {
        let state = self.inner.lock().await;
        encode_state(&state.doc)
    }

    fn broadcast_presence(&self, state: &RoomState) {
        let users = presence::dedup_view(state.presence.values());
        let frame = ServerFrame::PresenceUpdate {
            document_id: self.document_id.clone(),
            users,
        }
        .to_json();

        for seat in state.seats.values() {
            let _ = seat.outbound.send(Outgoing::Frame(frame.clone()));
        }
    }
}

fn encode_state(doc: &Doc) -> Vec<u8> {
    doc.transact()
        .encode_state_as_update_v1(&StateVector::default())
}
