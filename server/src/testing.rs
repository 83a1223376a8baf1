//! Support for the integration suite: boots the real router on an
//! ephemeral port against the in-memory store, with a cache double whose
//! connection can be dropped and restored.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use quillpad_core::{config::RelayTimings, db::MemoryRelayStore};
use tokio::{net::TcpListener, task::JoinHandle};

use crate::{
    cache::{CacheError, SnapshotCache},
    router::build_router,
    state::{AppState, build_state},
    sweeper::spawn_sweeper,
};

pub const TEST_JWT_SECRET: &str = "relay-test-secret";

/// In-memory cache with a kill switch; down means every operation fails
/// with the connection-lost signal.
#[derive(Default)]
pub struct ToggleCache {
    entries: DashMap<String, String>,
    down: AtomicBool,
}

impl ToggleCache {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::ConnectionLost)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SnapshotCache for ToggleCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }
}

pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryRelayStore>,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl TestRelay {
    pub async fn spawn(
        timings: RelayTimings,
        store: Arc<MemoryRelayStore>,
        cache: Option<Arc<dyn SnapshotCache>>,
    ) -> Self {
        let state = build_state(TEST_JWT_SECRET, timings, store.clone(), cache);
        let router = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("read local addr");

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        let sweeper = spawn_sweeper(state.clone());

        Self {
            addr,
            state,
            store,
            server,
            sweeper,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.server.abort();
        self.sweeper.abort();
    }
}
