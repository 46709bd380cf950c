//! Sync engine: startup orchestration (readiness barrier, first-run
//! detection, gap repair, bounded-concurrency backfill) followed by the
//! steady-state poll loop and the manifest sub-loop.

use crate::chain::ChainSource;
use crate::runtime::config::GatewayConfig;
use crate::runtime::fatal::{FatalErrorHandler, SyncError, SyncStage};
use crate::runtime::telemetry::{self, Telemetry};
use crate::store::GatewayStore;
use crate::sync::coordinator::{CoordinatorParams, ImportCoordinator};
use crate::sync::fork::ForkResolver;
use crate::sync::gaps::{find_missing_blocks, full_backfill, UnsyncedBlock};
use crate::sync::poll::{spawn_manifest_loop, PollScheduler, PollSchedulerParams};
use crate::sync::session::{SessionState, SyncSession};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SyncEngine {
    config: GatewayConfig,
    chain: Arc<dyn ChainSource>,
    store: Arc<dyn GatewayStore>,
    telemetry: Arc<Telemetry>,
    session: Arc<SyncSession>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        config: GatewayConfig,
        chain: Arc<dyn ChainSource>,
        store: Arc<dyn GatewayStore>,
    ) -> Self {
        Self::with_cancellation_token(config, chain, store, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        config: GatewayConfig,
        chain: Arc<dyn ChainSource>,
        store: Arc<dyn GatewayStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let session = Arc::new(SyncSession::new(store.clone(), telemetry.clone()));
        Self {
            config,
            chain,
            store,
            telemetry,
            session,
            shutdown,
        }
    }

    pub fn session(&self) -> Arc<SyncSession> {
        self.session.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the full sync lifecycle until the shutdown token is cancelled or
    /// a fatal error stops the engine.
    pub async fn run(&self) -> Result<()> {
        let run_token = self.shutdown.child_token();
        let fatal_handler = Arc::new(FatalErrorHandler::new(
            self.shutdown.clone(),
            run_token.clone(),
        ));

        let metrics_handle = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        );

        let coordinator = Arc::new(ImportCoordinator::spawn(CoordinatorParams {
            pool_size: self.config.parallel_workers(),
            chain: self.chain.clone(),
            store: self.store.clone(),
            session: self.session.clone(),
            telemetry: self.telemetry.clone(),
            fatal_handler: fatal_handler.clone(),
            shutdown: run_token.clone(),
        }));

        let result = self
            .run_inner(coordinator.clone(), fatal_handler.clone(), run_token.clone())
            .await;

        run_token.cancel();
        coordinator.shutdown().await;
        if let Err(err) = metrics_handle.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        match result {
            Err(err) => Err(fatal_handler.trigger_external("sync engine aborted", err)),
            Ok(()) => match fatal_handler.error() {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }

    async fn run_inner(
        &self,
        coordinator: Arc<ImportCoordinator>,
        fatal_handler: Arc<FatalErrorHandler>,
        run_token: CancellationToken,
    ) -> Result<()> {
        // Startup barrier: no import is dispatched until every worker has
        // signaled readiness exactly once.
        coordinator
            .wait_ready()
            .await
            .map_err(|err| SyncError::new(SyncStage::Startup, err))
            .map_err(|err| fatal_handler.trigger(err))?;

        let hash_list = self
            .chain
            .hash_list()
            .await
            .context("failed to fetch the authoritative hash list")?;
        self.session.set_remote_height(hash_list.len() as u64);

        let gateway_head = self.store.max_height_block().await?;
        let first_run = gateway_head.is_none();
        if let Some(head) = &gateway_head {
            self.session.set_top(head.indep_hash.clone(), head.height);
        }

        let mut unsynced: Vec<UnsyncedBlock> = if first_run {
            full_backfill(&hash_list)
        } else {
            find_missing_blocks(self.store.as_ref(), &hash_list).await?
        };

        if let Some(skip) = self.config.development_sync_length() {
            let skip = skip.min(unsynced.len());
            unsynced.drain(..skip);
            tracing::info!(skipped = skip, "development sync length applied");
        }

        self.session.set_state(SessionState::Syncing);
        self.session.push_status().await;

        let manifest_handle = spawn_manifest_loop(
            coordinator.clone(),
            self.config.manifest_start_delay(),
            self.config.manifest_import_delay(),
            run_token.clone(),
        );

        if first_run {
            tracing::info!("database seems to be empty, starting preparations for import...");
        } else if unsynced.is_empty() {
            tracing::info!("fully synced db");
        } else {
            tracing::info!(missing = unsynced.len(), "missing blocks, starting sync...");
        }

        if !unsynced.is_empty() {
            self.backfill(&coordinator, unsynced).await.map_err(|err| {
                fatal_handler.trigger(SyncError::new(SyncStage::Import, err))
            })?;
            tracing::info!("database fully in sync with hash list");
        }

        let fork_resolver = ForkResolver::new(
            self.chain.clone(),
            self.store.clone(),
            coordinator.clone(),
            self.session.clone(),
            self.config.fork_walk_limit(),
            self.config.drain_poll_interval(),
        );
        let scheduler = PollScheduler::new(PollSchedulerParams {
            chain: self.chain.clone(),
            store: self.store.clone(),
            coordinator: coordinator.clone(),
            fork_resolver,
            session: self.session.clone(),
            poll_min_delay: self.config.poll_min_delay(),
            shutdown: run_token.clone(),
        });

        let result = scheduler.run().await;

        // The scheduler only returns while stopping (cancellation or fatal
        // error); make sure the manifest loop observes it before the join.
        run_token.cancel();
        if let Err(err) = manifest_handle.await {
            tracing::warn!(error = %err, "manifest import task panicked");
        }

        result
    }

    /// Imports the unsynced set with concurrency bounded by the worker pool:
    /// deliberate parallelism during catch-up, with no ordering guarantee
    /// among in-flight heights. Any failure is fatal.
    async fn backfill(
        &self,
        coordinator: &Arc<ImportCoordinator>,
        unsynced: Vec<UnsyncedBlock>,
    ) -> Result<()> {
        let pool_size = coordinator.pool_size();
        let mut imports = stream::iter(unsynced.into_iter().map(|block| {
            let coordinator = coordinator.clone();
            async move { coordinator.import_block(block.height).await }
        }))
        .buffer_unordered(pool_size);

        while let Some(result) = imports.next().await {
            result?;
        }
        Ok(())
    }
}
