use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

/// Rolling count of applied edit operations. Entries older than the
/// window are pruned lazily on both insertion and read.
pub struct OpsCounter {
    window: Duration,
    samples: Mutex<VecDeque<Instant>>,
}

impl OpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    pub fn count(&self) -> usize {
        self.count_at(Instant::now())
    }

    fn record_at(&self, now: Instant) {
        let mut samples = self.samples.lock().expect("ops counter poisoned");
        Self::prune(&mut samples, now, self.window);
        samples.push_back(now);
    }

    fn count_at(&self, now: Instant) -> usize {
        let mut samples = self.samples.lock().expect("ops counter poisoned");
        Self::prune(&mut samples, now, self.window);
        samples.len()
    }

    fn prune(samples: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = samples.front() {
            if now.duration_since(*oldest) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Process-wide gauges and counters surfaced by `/metrics`.
pub struct RelayMetrics {
    connections: AtomicUsize,
    ops: OpsCounter,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self {
            connections: AtomicUsize::new(0),
            ops: OpsCounter::new(Duration::from_secs(60)),
        }
    }
}

impl RelayMetrics {
    pub fn inc_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_connections(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Called once per successfully applied editor/owner update.
    pub fn record_op(&self) {
        self.ops.record();
    }

    pub fn ops_per_minute(&self) -> usize {
        self.ops.count()
    }
}
