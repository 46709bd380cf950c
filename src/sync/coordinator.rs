//! Import coordinator: owns the fixed-size worker pool, the startup
//! readiness barrier, and the routing table that matches asynchronous worker
//! events back to pending requests.

use crate::chain::ChainSource;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use crate::store::GatewayStore;
use crate::sync::session::SyncSession;
use crate::sync::worker::{
    worker_event_channel, worker_request_channel, ImportSummary, ImportWorker, WorkerEvent,
    WorkerLogLevel, WorkerRequest, WorkerRequestSender,
};
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const WORKER_REQUEST_CAPACITY: usize = 8;

/// Per-worker in-flight transaction counts plus the summed global gauge.
#[derive(Debug)]
pub struct InFlightCounters {
    counts: Vec<AtomicU64>,
}

impl InFlightCounters {
    fn new(workers: usize) -> Self {
        Self {
            counts: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn set(&self, worker_id: usize, count: u64) {
        if let Some(slot) = self.counts.get(worker_id) {
            slot.store(count, Ordering::SeqCst);
        }
    }

    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .sum()
    }
}

enum PendingReply {
    Block(oneshot::Sender<Result<ImportSummary>>),
    Manifests(oneshot::Sender<Result<usize>>),
}

pub struct CoordinatorParams {
    pub pool_size: usize,
    pub chain: Arc<dyn ChainSource>,
    pub store: Arc<dyn GatewayStore>,
    pub session: Arc<SyncSession>,
    pub telemetry: Arc<Telemetry>,
    pub fatal_handler: Arc<FatalErrorHandler>,
    pub shutdown: CancellationToken,
}

pub struct ImportCoordinator {
    pool_size: usize,
    request_txs: Vec<WorkerRequestSender>,
    idle_tx: mpsc::Sender<usize>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<usize>>,
    pending: Arc<Mutex<HashMap<usize, PendingReply>>>,
    in_flight: Arc<InFlightCounters>,
    ready_rx: watch::Receiver<usize>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    session: Arc<SyncSession>,
    telemetry: Arc<Telemetry>,
}

impl ImportCoordinator {
    /// Launches the worker pool and the event router.
    pub fn spawn(params: CoordinatorParams) -> Self {
        let pool_size = params.pool_size.max(1);
        let (event_tx, mut event_rx) = worker_event_channel(pool_size.saturating_mul(8).max(64));
        let (ready_tx, ready_rx) = watch::channel(0usize);
        let (idle_tx, idle_rx) = mpsc::channel(pool_size);

        let pending: Arc<Mutex<HashMap<usize, PendingReply>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let in_flight = Arc::new(InFlightCounters::new(pool_size));

        let mut request_txs = Vec::with_capacity(pool_size);
        let mut tasks = Vec::with_capacity(pool_size + 1);

        for worker_id in 0..pool_size {
            let (request_tx, request_rx) = worker_request_channel(WORKER_REQUEST_CAPACITY);
            let worker = ImportWorker::new(
                worker_id,
                params.chain.clone(),
                params.store.clone(),
                request_rx,
                event_tx.clone(),
                params.shutdown.clone(),
            );

            let fatal_handler = params.fatal_handler.clone();
            let shutdown = params.shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(panic) = std::panic::AssertUnwindSafe(worker.run())
                    .catch_unwind()
                    .await
                {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(worker = worker_id, panic = %message, "worker task panicked");
                    fatal_handler.trigger_external(
                        &format!("worker {worker_id} panicked"),
                        anyhow!("worker {worker_id} panicked: {message}"),
                    );
                    shutdown.cancel();
                }
            }));

            request_txs.push(request_tx);
            let _ = idle_tx.try_send(worker_id);
        }
        drop(event_tx);

        params.telemetry.record_worker_pool_size(pool_size);

        let router_pending = pending.clone();
        let router_in_flight = in_flight.clone();
        let router_telemetry = params.telemetry.clone();
        tasks.push(tokio::spawn(async move {
            let mut ready_seen = vec![false; pool_size];
            let mut ready_count = 0usize;

            while let Some(event) = event_rx.recv().await {
                match event {
                    WorkerEvent::Ready { worker_id } => {
                        if let Some(seen) = ready_seen.get_mut(worker_id) {
                            if !*seen {
                                *seen = true;
                                ready_count += 1;
                                let _ = ready_tx.send(ready_count);
                                tracing::debug!(worker = worker_id, "worker ready");
                            }
                        }
                    }
                    WorkerEvent::Log {
                        worker_id,
                        level,
                        message,
                    } => match level {
                        WorkerLogLevel::Info => tracing::info!(worker = worker_id, "{message}"),
                        WorkerLogLevel::Warn => tracing::warn!(worker = worker_id, "{message}"),
                        WorkerLogLevel::Error => tracing::error!(worker = worker_id, "{message}"),
                    },
                    WorkerEvent::TxsInFlight { worker_id, count } => {
                        router_in_flight.set(worker_id, count);
                        router_telemetry.record_txs_in_flight(router_in_flight.total());
                    }
                    WorkerEvent::BlockImported { worker_id, outcome } => {
                        router_in_flight.set(worker_id, 0);
                        router_telemetry.record_txs_in_flight(router_in_flight.total());
                        match router_pending.lock().unwrap().remove(&worker_id) {
                            Some(PendingReply::Block(reply)) => {
                                let _ = reply.send(outcome);
                            }
                            _ => {
                                tracing::warn!(
                                    worker = worker_id,
                                    "block completion with no pending import"
                                );
                            }
                        }
                    }
                    WorkerEvent::ManifestsImported { worker_id, outcome } => {
                        match router_pending.lock().unwrap().remove(&worker_id) {
                            Some(PendingReply::Manifests(reply)) => {
                                let _ = reply.send(outcome);
                            }
                            _ => {
                                tracing::warn!(
                                    worker = worker_id,
                                    "manifest completion with no pending request"
                                );
                            }
                        }
                    }
                }
            }

            tracing::debug!("coordinator event router stopped");
        }));

        Self {
            pool_size,
            request_txs,
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            pending,
            in_flight,
            ready_rx,
            tasks: tokio::sync::Mutex::new(tasks),
            session: params.session,
            telemetry: params.telemetry,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Blocks until every pool member has signaled readiness exactly once.
    /// No import request is accepted before this barrier clears.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready_rx = self.ready_rx.clone();
        loop {
            if *ready_rx.borrow() >= self.pool_size {
                return Ok(());
            }
            ready_rx
                .changed()
                .await
                .context("worker readiness channel closed before all workers were ready")?;
        }
    }

    /// Imports one block through an idle worker; waits for one to free up
    /// when the whole pool is busy, so at most `pool_size` heights are ever
    /// importing concurrently.
    pub async fn import_block(&self, height: u64) -> Result<ImportSummary> {
        self.wait_ready().await?;
        let worker_id = self.acquire_worker().await?;
        self.session.import_started(height);
        self.session.push_status().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(worker_id, PendingReply::Block(reply_tx));

        let outcome = if self.request_txs[worker_id]
            .send(WorkerRequest::ImportBlock { height })
            .await
            .is_err()
        {
            self.pending.lock().unwrap().remove(&worker_id);
            Err(anyhow!("worker {worker_id} request channel closed"))
        } else {
            match reply_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow!(
                    "worker {worker_id} stopped before completing height {height}"
                )),
            }
        };

        self.release_worker(worker_id).await;
        self.session.import_finished(height);

        match outcome {
            Ok(summary) => {
                self.telemetry.record_imported_block();
                self.telemetry.record_imported_txs(summary.tx_count as u64);
                self.session.set_gateway_height(summary.height);
                self.session.push_status().await;
                Ok(summary)
            }
            Err(err) => {
                self.session.push_status().await;
                Err(err.context(format!("block import at height {height} failed")))
            }
        }
    }

    /// Imports pending manifests through an idle worker.
    pub async fn import_manifests(&self) -> Result<usize> {
        self.wait_ready().await?;
        let worker_id = self.acquire_worker().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(worker_id, PendingReply::Manifests(reply_tx));

        let outcome = if self.request_txs[worker_id]
            .send(WorkerRequest::ImportManifests)
            .await
            .is_err()
        {
            self.pending.lock().unwrap().remove(&worker_id);
            Err(anyhow!("worker {worker_id} request channel closed"))
        } else {
            match reply_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow!("worker {worker_id} stopped during manifest import")),
            }
        };

        self.release_worker(worker_id).await;
        outcome
    }

    /// Summed in-flight transaction count across the pool.
    pub fn txs_in_flight(&self) -> u64 {
        self.in_flight.total()
    }

    /// Polls the in-flight gauge at a fixed interval until it reaches zero.
    /// This is the invariant gate the fork resolver relies on before deleting
    /// rows a concurrent import might still be writing.
    pub async fn wait_for_drain(
        &self,
        interval: Duration,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        loop {
            if self.txs_in_flight() == 0 {
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(anyhow!("in-flight drain wait cancelled"));
                }
                _ = sleep(interval) => {}
            }
        }
    }

    /// Stops every worker and joins all pool tasks.
    pub async fn shutdown(&self) {
        for (worker_id, request_tx) in self.request_txs.iter().enumerate() {
            if request_tx.send(WorkerRequest::Shutdown).await.is_err() {
                tracing::debug!(worker = worker_id, "worker already stopped");
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "coordinator task terminated unexpectedly");
            }
        }
    }

    async fn acquire_worker(&self) -> Result<usize> {
        let mut idle_rx = self.idle_rx.lock().await;
        idle_rx
            .recv()
            .await
            .context("idle worker queue closed; pool is shut down")
    }

    async fn release_worker(&self, worker_id: usize) {
        if self.idle_tx.send(worker_id).await.is_err() {
            tracing::debug!(worker = worker_id, "idle queue closed during release");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
