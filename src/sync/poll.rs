//! Poll scheduler: the repeat-forever loop that keeps the gateway head
//! chasing the remote node head, plus the independent manifest import
//! sub-loop.
//!
//! Cancellation is cooperative and checked once per iteration; an iteration
//! in progress always runs to completion.

use crate::chain::ChainSource;
use crate::runtime::fatal::{SyncError, SyncStage};
use crate::store::GatewayStore;
use crate::sync::coordinator::ImportCoordinator;
use crate::sync::fork::ForkResolver;
use crate::sync::session::{SessionState, SyncSession};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub struct PollSchedulerParams {
    pub chain: Arc<dyn ChainSource>,
    pub store: Arc<dyn GatewayStore>,
    pub coordinator: Arc<ImportCoordinator>,
    pub fork_resolver: ForkResolver,
    pub session: Arc<SyncSession>,
    pub poll_min_delay: Duration,
    pub shutdown: CancellationToken,
}

pub struct PollScheduler {
    chain: Arc<dyn ChainSource>,
    store: Arc<dyn GatewayStore>,
    coordinator: Arc<ImportCoordinator>,
    fork_resolver: ForkResolver,
    session: Arc<SyncSession>,
    poll_min_delay: Duration,
    shutdown: CancellationToken,
}

impl PollScheduler {
    pub fn new(params: PollSchedulerParams) -> Self {
        Self {
            chain: params.chain,
            store: params.store,
            coordinator: params.coordinator,
            fork_resolver: params.fork_resolver,
            session: params.session,
            poll_min_delay: params.poll_min_delay,
            shutdown: params.shutdown,
        }
    }

    /// Loops until the shutdown token is observed. Transient iteration
    /// failures are logged and retried on the next cycle; fork-recovery
    /// failures are fatal and abort the loop.
    pub async fn run(&self) -> Result<()> {
        self.session.set_state(SessionState::Polling);
        tracing::info!(
            delay_secs = self.poll_min_delay.as_secs(),
            "polling for new blocks"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(err) = self.poll_once().await {
                if err.downcast_ref::<SyncError>().is_some() {
                    return Err(err);
                }
                tracing::warn!(error = %err, "poll iteration failed; retrying next cycle");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.poll_min_delay) => {}
            }
        }

        tracing::info!("poll scheduler stopped");
        Ok(())
    }

    async fn poll_once(&self) -> Result<()> {
        if self.session.is_paused() {
            return Ok(());
        }

        let info = self
            .chain
            .node_info()
            .await
            .context("failed to fetch node info")?;
        self.session.set_remote_height(info.height);

        let top = self
            .store
            .max_height_block()
            .await
            .context("failed to read gateway head")?;
        if let Some(top) = &top {
            self.session.set_top(top.indep_hash.clone(), top.height);
        }
        self.session.push_status().await;

        let top_hash = match top {
            Some(top) => top.indep_hash,
            None => {
                // Empty store while polling: treat the remote head as a plain
                // forward import.
                self.coordinator.import_block(info.height).await?;
                return Ok(());
            }
        };

        if info.current == top_hash {
            return Ok(());
        }

        let current = self
            .chain
            .block_by_hash(&info.current)
            .await
            .context("failed to fetch remote head block")?;
        let parent = self
            .chain
            .block_by_hash(&current.previous_block)
            .await
            .context("failed to fetch remote head parent")?;

        if parent.indep_hash == top_hash {
            self.coordinator.import_block(info.height).await?;
        } else {
            tracing::info!(
                remote_parent = %parent.indep_hash,
                local_top = %top_hash,
                "blocks out of sync with the remote node"
            );
            self.fork_resolver
                .resolve(current, &self.shutdown)
                .await
                .map_err(|err| SyncError::new(SyncStage::ForkRecovery, err))?;
            tracing::info!("blocks are back in sync");
        }

        Ok(())
    }
}

/// Spawns the manifest import sub-loop: waits out the start delay, then asks
/// the coordinator for a manifest pass every `repeat_delay`, forever. Fully
/// decoupled from block polling.
pub fn spawn_manifest_loop(
    coordinator: Arc<ImportCoordinator>,
    start_delay: Duration,
    repeat_delay: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(start_delay) => {}
        }

        loop {
            match coordinator.import_manifests().await {
                Ok(imported) if imported > 0 => {
                    tracing::info!(imported, "manifest import pass finished");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "manifest import pass failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(repeat_delay) => {}
            }
        }

        tracing::debug!("manifest import loop stopped");
    })
}
