//! Shared sync-session state: the pause flag, chain heights, the set of
//! heights currently importing, and the health string pushed to the status
//! table. One instance is created per process start and passed by `Arc` to
//! every component; nothing here is ambient.

use crate::chain::types::BlockHash;
use crate::runtime::telemetry::Telemetry;
use crate::store::rows::StatusUpdate;
use crate::store::GatewayStore;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Externally visible scheduler state, rendered into the status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Syncing,
    Polling,
    Paused,
    ForkResolving,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Syncing => "SYNCING",
            SessionState::Polling => "OK",
            SessionState::Paused => "PAUSED",
            SessionState::ForkResolving => "FORK_RECOVERY",
        }
    }
}

pub struct SyncSession {
    id: String,
    paused: AtomicBool,
    remote_height: AtomicU64,
    gateway_height: AtomicU64,
    top_hash: Mutex<Option<BlockHash>>,
    current_imports: Mutex<BTreeSet<u64>>,
    state: Mutex<SessionState>,
    store: Arc<dyn GatewayStore>,
    telemetry: Arc<Telemetry>,
}

impl SyncSession {
    pub fn new(store: Arc<dyn GatewayStore>, telemetry: Arc<Telemetry>) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        Self {
            id: format!("sync-{seed}"),
            paused: AtomicBool::new(false),
            remote_height: AtomicU64::new(0),
            gateway_height: AtomicU64::new(0),
            top_hash: Mutex::new(None),
            current_imports: Mutex::new(BTreeSet::new()),
            state: Mutex::new(SessionState::Idle),
            store,
            telemetry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn set_remote_height(&self, height: u64) {
        self.remote_height.store(height, Ordering::SeqCst);
        self.telemetry
            .record_heights(self.gateway_height(), height);
    }

    pub fn remote_height(&self) -> u64 {
        self.remote_height.load(Ordering::SeqCst)
    }

    pub fn set_gateway_height(&self, height: u64) {
        self.gateway_height.store(height, Ordering::SeqCst);
        self.telemetry
            .record_heights(height, self.remote_height());
    }

    pub fn gateway_height(&self) -> u64 {
        self.gateway_height.load(Ordering::SeqCst)
    }

    pub fn set_top(&self, hash: BlockHash, height: u64) {
        *self.top_hash.lock().unwrap() = Some(hash);
        self.set_gateway_height(height);
    }

    pub fn top_hash(&self) -> Option<BlockHash> {
        self.top_hash.lock().unwrap().clone()
    }

    pub fn import_started(&self, height: u64) {
        self.current_imports.lock().unwrap().insert(height);
    }

    pub fn import_finished(&self, height: u64) {
        self.current_imports.lock().unwrap().remove(&height);
    }

    pub fn current_imports(&self) -> Vec<u64> {
        self.current_imports.lock().unwrap().iter().copied().collect()
    }

    /// Pushes the current snapshot to the status table. The row is telemetry
    /// only, so failures are logged and swallowed.
    pub async fn push_status(&self) {
        let update = StatusUpdate {
            session: self.id.clone(),
            gateway_height: Some(self.gateway_height()),
            remote_height: Some(self.remote_height()),
            current_imports: Some(self.current_imports()),
            status: Some(self.state().as_str().to_owned()),
        };
        if let Err(err) = self.store.update_status(update).await {
            tracing::debug!(error = %err, "status row update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn session() -> SyncSession {
        SyncSession::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Telemetry::default()),
        )
    }

    #[test]
    fn pause_flag_toggles() {
        let session = session();
        assert!(!session.is_paused());
        session.pause();
        assert!(session.is_paused());
        session.resume();
        assert!(!session.is_paused());
    }

    #[test]
    fn current_imports_track_outstanding_heights() {
        let session = session();
        session.import_started(5);
        session.import_started(7);
        assert_eq!(session.current_imports(), vec![5, 7]);

        session.import_finished(5);
        assert_eq!(session.current_imports(), vec![7]);
    }

    #[tokio::test]
    async fn push_status_merges_into_store() {
        let store = Arc::new(MemoryStore::new());
        let session = SyncSession::new(store.clone(), Arc::new(Telemetry::default()));
        session.set_remote_height(10);
        session.set_top(BlockHash::from("top"), 8);
        session.set_state(SessionState::Polling);
        session.push_status().await;

        let row = store.status(session.id()).await.expect("status row");
        assert_eq!(row.gateway_height, Some(8));
        assert_eq!(row.remote_height, Some(10));
        assert_eq!(row.status.as_deref(), Some("OK"));
    }
}
