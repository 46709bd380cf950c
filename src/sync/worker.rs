//! Import worker execution context.
//!
//! A worker owns one request channel and performs the actual
//! denormalization: fetching a block and its transactions from the chain
//! source and writing every derived row. Results, readiness, log lines, and
//! in-flight transaction counts travel back to the coordinator over a shared
//! event channel rather than call returns.

use crate::chain::types::{Block, BlockHash, Transaction};
use crate::chain::ChainSource;
use crate::store::keys::{tx_index, GqlBucket};
use crate::store::rows::{
    BlockGqlRow, BlockRow, ManifestRow, PermawebPathRow, SortDir, TxGqlRow, TxOffsetRow, TxRow,
};
use crate::store::tags::{tag_row, tag_variants, tag_view_name};
use crate::store::GatewayStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    ImportBlock { height: u64 },
    ImportManifests,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLogLevel {
    Info,
    Warn,
    Error,
}

/// Completion payload of a block import.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub height: u64,
    pub indep_hash: BlockHash,
    pub tx_count: usize,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Ready {
        worker_id: usize,
    },
    Log {
        worker_id: usize,
        level: WorkerLogLevel,
        message: String,
    },
    BlockImported {
        worker_id: usize,
        outcome: Result<ImportSummary>,
    },
    ManifestsImported {
        worker_id: usize,
        outcome: Result<usize>,
    },
    TxsInFlight {
        worker_id: usize,
        count: u64,
    },
}

pub type WorkerEventSender = mpsc::Sender<WorkerEvent>;
pub type WorkerEventReceiver = mpsc::Receiver<WorkerEvent>;
pub type WorkerRequestSender = mpsc::Sender<WorkerRequest>;
pub type WorkerRequestReceiver = mpsc::Receiver<WorkerRequest>;

pub fn worker_request_channel(capacity: usize) -> (WorkerRequestSender, WorkerRequestReceiver) {
    mpsc::channel(capacity)
}

pub fn worker_event_channel(capacity: usize) -> (WorkerEventSender, WorkerEventReceiver) {
    mpsc::channel(capacity)
}

pub struct ImportWorker {
    id: usize,
    chain: Arc<dyn ChainSource>,
    store: Arc<dyn GatewayStore>,
    request_rx: WorkerRequestReceiver,
    event_tx: WorkerEventSender,
    shutdown: CancellationToken,
}

impl ImportWorker {
    pub fn new(
        id: usize,
        chain: Arc<dyn ChainSource>,
        store: Arc<dyn GatewayStore>,
        request_rx: WorkerRequestReceiver,
        event_tx: WorkerEventSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            chain,
            store,
            request_rx,
            event_tx,
            shutdown,
        }
    }

    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub async fn run(mut self) {
        self.emit(WorkerEvent::Ready { worker_id: self.id }).await;
        let shutdown = self.shutdown.clone();

        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.request_rx.recv() => request,
            };

            match request {
                None | Some(WorkerRequest::Shutdown) => break,
                Some(WorkerRequest::ImportBlock { height }) => {
                    let outcome = self.import_block(height).await;
                    // An aborted import leaves nothing in flight.
                    self.report_in_flight(0).await;
                    self.emit(WorkerEvent::BlockImported {
                        worker_id: self.id,
                        outcome,
                    })
                    .await;
                }
                Some(WorkerRequest::ImportManifests) => {
                    let outcome = self.import_manifests().await;
                    self.emit(WorkerEvent::ManifestsImported {
                        worker_id: self.id,
                        outcome,
                    })
                    .await;
                }
            }
        }

        tracing::debug!(worker = self.id, "worker loop stopped");
    }

    async fn emit(&self, event: WorkerEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!(worker = self.id, "event channel closed");
        }
    }

    async fn log(&self, level: WorkerLogLevel, message: String) {
        self.emit(WorkerEvent::Log {
            worker_id: self.id,
            level,
            message,
        })
        .await;
    }

    async fn report_in_flight(&self, count: u64) {
        self.emit(WorkerEvent::TxsInFlight {
            worker_id: self.id,
            count,
        })
        .await;
    }

    async fn import_block(&self, height: u64) -> Result<ImportSummary> {
        let block = self
            .chain
            .block_by_height(height)
            .await
            .with_context(|| format!("failed to fetch block at height {height}"))?;

        let tx_count = block.txs.len();
        self.report_in_flight(tx_count as u64).await;
        self.log(
            WorkerLogLevel::Info,
            format!("importing block {} at height {height}", block.indep_hash),
        )
        .await;

        self.write_block_rows(&block).await?;

        for (sub_index, tx_id) in block.txs.iter().enumerate() {
            let tx = self
                .chain
                .transaction(tx_id)
                .await
                .with_context(|| format!("failed to fetch transaction {tx_id}"))?;
            self.write_tx_rows(&block, &tx, sub_index as u64).await?;
            self.report_in_flight((tx_count - sub_index - 1) as u64).await;
        }

        Ok(ImportSummary {
            height,
            indep_hash: block.indep_hash,
            tx_count,
        })
    }

    async fn write_block_rows(&self, block: &Block) -> Result<()> {
        self.store
            .put_block(BlockRow {
                indep_hash: block.indep_hash.clone(),
                height: block.height,
                previous_block: block.previous_block.clone(),
                timestamp: block.timestamp,
                txs: block.txs.clone(),
            })
            .await?;
        self.store
            .put_block_height(block.height, block.indep_hash.clone())
            .await?;

        let bucket = GqlBucket::for_height(block.height);
        for dir in [SortDir::Asc, SortDir::Desc] {
            self.store
                .put_block_gql(
                    dir,
                    BlockGqlRow {
                        bucket: bucket.clone(),
                        height: block.height,
                        indep_hash: block.indep_hash.clone(),
                        timestamp: block.timestamp,
                        previous: block.previous_block.clone(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn write_tx_rows(&self, block: &Block, tx: &Transaction, sub_index: u64) -> Result<()> {
        let index = tx_index(block.height, sub_index);
        let data_item_index = 0;
        let bucket = GqlBucket::for_height(block.height);

        self.store
            .put_transaction(TxRow {
                tx_id: tx.id.clone(),
                tx_index: index,
                data_item_index,
                block_hash: block.indep_hash.clone(),
                owner: tx.owner.clone(),
                target: tx.target.clone(),
                bundled_in: tx.bundled_in.clone(),
                data_root: tx.data_root.clone(),
                tags: tx.tags.clone(),
            })
            .await?;

        let tag_pairs: Vec<String> = tx.tags.iter().map(|tag| tag.pair()).collect();
        for dir in [SortDir::Asc, SortDir::Desc] {
            self.store
                .put_tx_gql(
                    dir,
                    TxGqlRow {
                        bucket: bucket.clone(),
                        tx_id: tx.id.clone(),
                        tx_index: index,
                        data_item_index,
                        owner: tx.owner.clone(),
                        target: tx.target.clone(),
                        bundled_in: tx.bundled_in.clone(),
                        data_root: tx.data_root.clone(),
                        tag_pairs: tag_pairs.clone(),
                    },
                )
                .await?;
        }

        self.store
            .put_tx_offset(TxOffsetRow {
                tx_id: tx.id.clone(),
                data_size: tx.data_size,
            })
            .await?;

        for (tag_index, tag) in tx.tags.iter().enumerate() {
            let row = tag_row(tx, tag, tag_index as u64, index, data_item_index);
            for dims in tag_variants() {
                for dir in [SortDir::Asc, SortDir::Desc] {
                    self.store
                        .put_tag_row(&tag_view_name(dims, dir), row.clone())
                        .await?;
                }
            }
        }

        if tx.is_manifest() {
            self.store.mark_manifest_unimported(&tx.id).await?;
        }

        Ok(())
    }

    /// Imports pending manifests. Per-manifest failures are logged and
    /// skipped so one broken body cannot stall the repeat-forever loop.
    async fn import_manifests(&self) -> Result<usize> {
        let pending = self.store.unimported_manifests().await?;
        let mut imported = 0;

        for tx_id in pending {
            match self.import_manifest(&tx_id).await {
                Ok(()) => imported += 1,
                Err(err) => {
                    self.log(
                        WorkerLogLevel::Warn,
                        format!("manifest import for {tx_id} failed: {err:#}"),
                    )
                    .await;
                }
            }
        }

        Ok(imported)
    }

    async fn import_manifest(&self, tx_id: &str) -> Result<()> {
        let body = self
            .chain
            .tx_data(tx_id)
            .await
            .with_context(|| format!("failed to fetch manifest body for {tx_id}"))?;
        let payload: crate::chain::types::ManifestPayload = serde_json::from_slice(&body)
            .with_context(|| format!("manifest body for {tx_id} is not valid JSON"))?;

        let manifest_index = payload
            .index
            .as_ref()
            .map(|index| index.path.clone())
            .unwrap_or_default();
        let paths_json = serde_json::to_string(&payload.paths)
            .context("failed to serialize manifest paths")?;

        self.store
            .put_manifest(ManifestRow {
                tx_id: tx_id.to_owned(),
                manifest_type: payload.manifest.clone(),
                manifest_version: payload.version.clone(),
                manifest_index: manifest_index.clone(),
                manifest_paths: paths_json,
            })
            .await?;

        for (path, entry) in &payload.paths {
            self.store
                .put_permaweb_path(PermawebPathRow {
                    domain_id: tx_id.to_owned(),
                    uri_path: path.clone(),
                    target_id: entry.id.clone(),
                })
                .await?;
        }

        // The declared index path resolves the bare domain.
        if let Some(entry) = payload.paths.get(&manifest_index) {
            self.store
                .put_permaweb_path(PermawebPathRow {
                    domain_id: tx_id.to_owned(),
                    uri_path: String::new(),
                    target_id: entry.id.clone(),
                })
                .await?;
        }

        self.store.clear_manifest_unimported(tx_id).await?;
        Ok(())
    }
}
