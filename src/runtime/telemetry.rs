use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters and gauges used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    imported_blocks: AtomicU64,
    imported_txs: AtomicU64,
    chain_errors: AtomicU64,
    query_pages: AtomicU64,
    query_round_trips: AtomicU64,
    worker_pool_size: AtomicUsize,
    txs_in_flight: AtomicU64,
    gateway_height: AtomicU64,
    remote_height: AtomicU64,
}

impl Telemetry {
    pub fn record_imported_block(&self) {
        self.imported_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_imported_txs(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.imported_txs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_chain_error(&self) {
        self.chain_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_page(&self, round_trips: u64) {
        self.query_pages.fetch_add(1, Ordering::Relaxed);
        self.query_round_trips
            .fetch_add(round_trips, Ordering::Relaxed);
    }

    pub fn record_worker_pool_size(&self, workers: usize) {
        self.worker_pool_size.store(workers, Ordering::Relaxed);
    }

    pub fn record_txs_in_flight(&self, count: u64) {
        self.txs_in_flight.store(count, Ordering::Relaxed);
    }

    pub fn record_heights(&self, gateway: u64, remote: u64) {
        self.gateway_height.store(gateway, Ordering::Relaxed);
        self.remote_height.store(remote, Ordering::Relaxed);
    }

    pub fn imported_blocks(&self) -> u64 {
        self.imported_blocks.load(Ordering::Relaxed)
    }

    pub fn imported_txs(&self) -> u64 {
        self.imported_txs.load(Ordering::Relaxed)
    }

    pub fn chain_errors(&self) -> u64 {
        self.chain_errors.load(Ordering::Relaxed)
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.load(Ordering::Relaxed)
    }

    pub fn txs_in_flight(&self) -> u64 {
        self.txs_in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            imported_blocks: self.imported_blocks.load(Ordering::Relaxed),
            imported_txs: self.imported_txs.load(Ordering::Relaxed),
            chain_errors: self.chain_errors.load(Ordering::Relaxed),
            query_pages: self.query_pages.load(Ordering::Relaxed),
            query_round_trips: self.query_round_trips.load(Ordering::Relaxed),
            txs_in_flight: self.txs_in_flight.load(Ordering::Relaxed),
            gateway_height: self.gateway_height.load(Ordering::Relaxed),
            remote_height: self.remote_height.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub imported_blocks: u64,
    pub imported_txs: u64,
    pub chain_errors: u64,
    pub query_pages: u64,
    pub query_round_trips: u64,
    pub txs_in_flight: u64,
    pub gateway_height: u64,
    pub remote_height: u64,
}

/// Spawns a background task that periodically logs sync progress, in-flight
/// transactions, and error counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "permagate::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let imported_delta = current
                        .imported_blocks
                        .saturating_sub(last_snapshot.imported_blocks);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        imported_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "permagate::metrics",
                        throughput = format!("{throughput:.2}"),
                        blocks = format!("{}/{}", current.gateway_height, current.remote_height),
                        imported_blocks = current.imported_blocks,
                        imported_txs = current.imported_txs,
                        txs_in_flight = current.txs_in_flight,
                        chain_errors = current.chain_errors,
                        query_pages = current.query_pages,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
