use tokio::{task::JoinHandle, time::sleep};
use tracing::debug;

use crate::state::AppState;

/// Process-wide heartbeat task: evicts stale members, reclaims empty
/// rooms, pings live connections, and probes a downed cache so it can
/// flip back to ready.
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = state.timings.heartbeat_interval;
        loop {
            sleep(interval).await;
            sweep_once(&state).await;
        }
    })
}

pub async fn sweep_once(state: &AppState) {
    let timeout = state.timings.heartbeat_timeout;

    for room in state.registry.rooms() {
        let evicted = room.evict_stale(timeout).await;
        for conn in evicted {
            state.connections.remove(&conn.conn_id);
            // Wakes the reader loop even if the connection is mid-await;
            // its close handler finishes the cleanup.
            conn.kill.notify_one();
            debug!(conn_id = %conn.conn_id, document_id = %room.document_id(), "stale connection evicted");
        }

        room.ping_all().await;
    }

    state.registry.sweep_idle();
    state.snapshots.probe_cache().await;
}
