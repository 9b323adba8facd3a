use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Notify;

/// Replay-protection cache mapping a proof's `jti` to its expiry.
///
/// Process-local (see the teacher's "replay cache without distribution"
/// design note: a multi-process deployment would swap this for a shared TTL
/// store at the same capability boundary without changing the verification
/// algorithm). The lock covers only map mutation — no I/O happens under it.
pub struct NonceCache {
    entries: RwLock<HashMap<String, i64>>,
    max_age_seconds: i64,
    shutdown: Arc<Notify>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CheckAndStoreResult {
    Fresh,
    Replay,
}

impl NonceCache {
    pub fn new(max_age_seconds: i64) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            max_age_seconds,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Atomically checks whether `jti` has a live (non-expired) entry; if
    /// not, inserts it with a fresh expiry. A live entry found on lookup means
    /// the proof has been replayed.
    pub fn check_and_store(&self, jti: &str) -> CheckAndStoreResult {
        let now = Utc::now().timestamp();
        let mut entries = self.entries.write();
        if let Some(&expiry) = entries.get(jti) {
            if expiry > now {
                return CheckAndStoreResult::Replay;
            }
        }
        entries.insert(jti.to_string(), now + self.max_age_seconds);
        CheckAndStoreResult::Fresh
    }

    fn sweep(&self) {
        let now = Utc::now().timestamp();
        self.entries.write().retain(|_, &mut expiry| expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Spawn the periodic sweep at `maxAge / 2`. The returned handle's
    /// `shutdown()` stops the loop gracefully.
    pub fn spawn_sweeper(self: &Arc<Self>) -> NonceSweeperHandle {
        let cache = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let period = Duration::from_secs((self.max_age_seconds.max(1) / 2).max(1) as u64);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.sweep(),
                    _ = shutdown.notified() => break,
                }
            }
        });
        NonceSweeperHandle {
            shutdown: Arc::clone(&self.shutdown),
            join,
        }
    }
}

pub struct NonceSweeperHandle {
    shutdown: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl NonceSweeperHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}
