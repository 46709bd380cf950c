use crate::chain::ChainSource;
use crate::runtime::config::GatewayConfig;
use crate::store::GatewayStore;
use crate::sync::engine::SyncEngine;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the sync engine lifecycle and handles OS signals for graceful
/// shutdowns.
pub struct GatewayRunner {
    engine: SyncEngine,
    shutdown: CancellationToken,
}

impl GatewayRunner {
    /// Creates a new runner and wires a root [`CancellationToken`] that
    /// propagates through the entire engine (workers, poll loop, manifest
    /// loop).
    pub fn new(
        config: GatewayConfig,
        chain: Arc<dyn ChainSource>,
        store: Arc<dyn GatewayStore>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let engine = SyncEngine::with_cancellation_token(config, chain, store, shutdown.clone());
        Self { engine, shutdown }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns the engine handle for status or query wiring.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere. A fatal engine error is returned as a non-zero
    /// outcome to the caller.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let engine = self.engine.clone();
        let mut engine_task = tokio::spawn(async move { engine.run().await });

        tokio::select! {
            result = &mut engine_task => {
                return result?;
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down gateway");
                self.shutdown.cancel();
            }
        }

        engine_task.await?
    }
}
