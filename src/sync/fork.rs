//! Fork resolution: locate the last common ancestor, roll back every
//! denormalized row above it, and re-import the canonical history.
//!
//! Primary rows (block, height index, transaction) must come off cleanly or
//! recovery aborts; secondary rows are derived artifacts, so their removal is
//! best-effort and a stale leftover is preferred over a failed recovery.

use crate::chain::types::{Block, ManifestPathEntry};
use crate::chain::ChainSource;
use crate::store::keys::GqlBucket;
use crate::store::rows::{BlockGqlKey, SortDir, TagRowKey, TxGqlKey, TxRow};
use crate::store::tags::{tag_variants, tag_view_name};
use crate::store::GatewayStore;
use crate::sync::coordinator::ImportCoordinator;
use crate::sync::session::{SessionState, SyncSession};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ForkResolver {
    chain: Arc<dyn ChainSource>,
    store: Arc<dyn GatewayStore>,
    coordinator: Arc<ImportCoordinator>,
    session: Arc<SyncSession>,
    walk_limit: usize,
    drain_poll_interval: Duration,
}

impl ForkResolver {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        store: Arc<dyn GatewayStore>,
        coordinator: Arc<ImportCoordinator>,
        session: Arc<SyncSession>,
        walk_limit: usize,
        drain_poll_interval: Duration,
    ) -> Self {
        Self {
            chain,
            store,
            coordinator,
            session,
            walk_limit,
            drain_poll_interval,
        }
    }

    /// Resolves a fork given the remote node's current block, which has been
    /// observed not to chain from the locally recorded head.
    pub async fn resolve(&self, remote_block: Block, shutdown: &CancellationToken) -> Result<()> {
        self.session.pause();
        self.session.set_state(SessionState::ForkResolving);
        self.session.push_status().await;

        let divergence_height = self.find_divergence(remote_block).await?;
        tracing::info!(divergence_height, "fork diverges; preparing rollback");

        let in_flight = self.coordinator.txs_in_flight();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for in-flight transactions to settle...");
            self.coordinator
                .wait_for_drain(self.drain_poll_interval, shutdown)
                .await?;
        }

        self.rollback_above(divergence_height).await?;
        tracing::info!("abandoned block removal done; re-importing canonical blocks...");

        let info = self
            .chain
            .node_info()
            .await
            .context("failed to fetch node info for fork re-import")?;
        for height in divergence_height + 1..=info.height {
            self.coordinator
                .import_block(height)
                .await
                .with_context(|| format!("fork re-import failed at height {height}"))?;
        }

        self.session.resume();
        self.session.set_state(SessionState::Polling);
        self.session.push_status().await;
        tracing::info!("fork recovery complete");
        Ok(())
    }

    /// Walks backward through remote history until a fetched parent matches a
    /// stored block. The walk is bounded: storage exhaustion or a divergence
    /// deeper than the limit is fatal, not an infinite regress.
    async fn find_divergence(&self, remote_block: Block) -> Result<u64> {
        let mut cursor = remote_block;

        for _ in 0..self.walk_limit {
            let parent = self
                .chain
                .block_by_hash(&cursor.previous_block)
                .await
                .with_context(|| {
                    format!("failed to fetch ancestor block {}", cursor.previous_block)
                })?;

            if let Some(stored) = self.store.block(&parent.indep_hash).await? {
                return Ok(stored.height);
            }

            cursor = parent;
        }

        bail!(
            "no common ancestor found within {} generations; refusing unbounded rollback",
            self.walk_limit
        )
    }

    /// Removes every stored block above the divergence height together with
    /// all rows derived from its transactions, ascending.
    async fn rollback_above(&self, divergence_height: u64) -> Result<()> {
        let abandoned = self.store.blocks_above(divergence_height).await?;

        for stub in abandoned {
            tracing::info!(
                height = stub.height,
                hash = %stub.indep_hash,
                "removing data from abandoned block"
            );

            let block = self.store.block(&stub.indep_hash).await?;

            self.store.remove_block(&stub.indep_hash).await?;
            self.store.remove_block_height(stub.height).await?;

            let bucket = GqlBucket::for_height(stub.height);
            for dir in [SortDir::Asc, SortDir::Desc] {
                let key = BlockGqlKey {
                    bucket: bucket.clone(),
                    height: stub.height,
                };
                if let Err(err) = self.store.remove_block_gql(dir, key).await {
                    log_best_effort("block_gql", stub.height, err);
                }
            }

            let Some(block) = block else {
                continue;
            };

            for tx_id in &block.txs {
                let tx = match self.store.transaction(tx_id).await {
                    Ok(Some(tx)) => tx,
                    Ok(None) => continue,
                    Err(err) => {
                        log_best_effort("transaction lookup", stub.height, err);
                        continue;
                    }
                };

                self.rollback_tx_rows(&tx, &bucket).await;
                self.store.remove_transaction(tx_id).await?;
            }
        }

        Ok(())
    }

    async fn rollback_tx_rows(&self, tx: &TxRow, bucket: &GqlBucket) {
        for dir in [SortDir::Asc, SortDir::Desc] {
            let key = TxGqlKey {
                bucket: bucket.clone(),
                tx_index: tx.tx_index,
                data_item_index: tx.data_item_index,
            };
            if let Err(err) = self.store.remove_tx_gql(dir, key).await {
                log_best_effort("tx_gql", tx.tx_index, err);
            }
        }

        if let Err(err) = self.store.remove_tx_offset(&tx.tx_id).await {
            log_best_effort("tx_offset", tx.tx_index, err);
        }

        for (tag_index, tag) in tx.tags.iter().enumerate() {
            let key = TagRowKey {
                tag_name: tag.name.clone(),
                tag_value: tag.value.clone(),
                tx_index: tx.tx_index,
                data_item_index: tx.data_item_index,
                tag_index: tag_index as u64,
            };
            for dims in tag_variants() {
                for dir in [SortDir::Asc, SortDir::Desc] {
                    let view = tag_view_name(dims, dir);
                    if let Err(err) = self.store.remove_tag_row(&view, key.clone()).await {
                        log_best_effort("tag row", tx.tx_index, err);
                    }
                }
            }
        }

        self.rollback_manifest_rows(tx).await;
    }

    async fn rollback_manifest_rows(&self, tx: &TxRow) {
        let manifest = match self.store.manifest(&tx.tx_id).await {
            Ok(Some(manifest)) => Some(manifest),
            Ok(None) => None,
            Err(err) => {
                log_best_effort("manifest lookup", tx.tx_index, err);
                None
            }
        };

        if let Some(manifest) = manifest {
            let paths: BTreeMap<String, ManifestPathEntry> =
                match serde_json::from_str(&manifest.manifest_paths) {
                    Ok(paths) => paths,
                    Err(err) => {
                        tracing::warn!(
                            tx = %tx.tx_id,
                            error = %err,
                            "stored manifest paths are not valid JSON; skipping path cleanup"
                        );
                        BTreeMap::new()
                    }
                };

            if paths.contains_key(&manifest.manifest_index) {
                if let Err(err) = self.store.remove_permaweb_path(&tx.tx_id, "").await {
                    log_best_effort("permaweb index path", tx.tx_index, err);
                }
            }
            for path in paths.keys() {
                if let Err(err) = self.store.remove_permaweb_path(&tx.tx_id, path).await {
                    log_best_effort("permaweb path", tx.tx_index, err);
                }
            }

            if let Err(err) = self.store.remove_manifest(&tx.tx_id).await {
                log_best_effort("manifest", tx.tx_index, err);
            }
        }

        if let Err(err) = self.store.clear_manifest_unimported(&tx.tx_id).await {
            log_best_effort("manifest marker", tx.tx_index, err);
        }
    }
}

/// A failed secondary-row removal is logged and swallowed; the row is a
/// derived artifact and recovery must not abort because of it.
fn log_best_effort(table: &str, key: u64, err: anyhow::Error) {
    tracing::warn!(table, key, error = %err, "best-effort removal failed");
}
