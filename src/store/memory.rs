//! BTreeMap-backed `GatewayStore` used by the test suites and embedded
//! deployments. Every table family keeps the same compound keys a wide-row
//! backend would, so scan order and removal semantics match.

use crate::chain::types::BlockHash;
use crate::store::keys::TX_INDEX_STRIDE;
use crate::store::rows::{
    BlockGqlKey, BlockGqlRow, BlockRow, BlockStub, ManifestRow, PermawebPathRow, SortDir,
    StatusUpdate, TagRow, TagRowKey, TxGqlKey, TxGqlRow, TxOffsetRow, TxRow,
};
use crate::store::{BucketHit, BucketScan, FilterScan, GatewayStore, ViewHit, ViewId};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

type TxGqlMap = BTreeMap<(u64, u64), TxGqlRow>;
type TagKeyTuple = (u64, u64, u64, String, String);

#[derive(Default)]
struct Inner {
    blocks: HashMap<String, BlockRow>,
    height_to_hash: BTreeMap<u64, BlockHash>,
    block_gql_asc: BTreeMap<u64, BlockGqlRow>,
    block_gql_desc: BTreeMap<u64, BlockGqlRow>,
    transactions: HashMap<String, TxRow>,
    tx_gql_asc: TxGqlMap,
    tx_gql_desc: TxGqlMap,
    tx_offsets: HashMap<String, TxOffsetRow>,
    tag_rows: HashMap<String, BTreeMap<TagKeyTuple, TagRow>>,
    manifests: HashMap<String, ManifestRow>,
    manifest_unimported: BTreeSet<String>,
    permaweb_paths: BTreeMap<(String, String), PermawebPathRow>,
    status: HashMap<String, StatusUpdate>,
}

/// In-memory wide-row store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored primary block rows.
    pub async fn block_count(&self) -> usize {
        self.inner.read().await.blocks.len()
    }

    /// Number of stored primary transaction rows.
    pub async fn tx_count(&self) -> usize {
        self.inner.read().await.transactions.len()
    }

    /// Number of tag rows in one variant view.
    pub async fn tag_rows_in(&self, view: &str) -> usize {
        self.inner
            .read()
            .await
            .tag_rows
            .get(view)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Stored permaweb path row, if present.
    pub async fn permaweb_path(&self, domain_id: &str, uri_path: &str) -> Option<PermawebPathRow> {
        self.inner
            .read()
            .await
            .permaweb_paths
            .get(&(domain_id.to_owned(), uri_path.to_owned()))
            .cloned()
    }

    /// Last merged status row for a session.
    pub async fn status(&self, session: &str) -> Option<StatusUpdate> {
        self.inner.read().await.status.get(session).cloned()
    }
}

fn tag_key(key: &TagRowKey) -> TagKeyTuple {
    (
        key.tx_index,
        key.data_item_index,
        key.tag_index,
        key.tag_name.clone(),
        key.tag_value.clone(),
    )
}

fn matches_filter(row: &TxGqlRow, scan: &FilterScan) -> bool {
    if row.tx_index < scan.min_tx_index || row.tx_index > scan.max_tx_index {
        return false;
    }
    if !scan.ids.is_empty() && !scan.ids.iter().any(|id| id == &row.tx_id) {
        return false;
    }
    if !scan.owners.is_empty() && !scan.owners.iter().any(|owner| owner == &row.owner) {
        return false;
    }
    if !scan.targets.is_empty() && !scan.targets.iter().any(|target| target == &row.target) {
        return false;
    }
    if !scan.data_roots.is_empty() && !scan.data_roots.iter().any(|root| root == &row.data_root) {
        return false;
    }
    if !scan.bundled_in.is_empty() {
        match &row.bundled_in {
            Some(bundle) if scan.bundled_in.iter().any(|wanted| wanted == bundle) => {}
            _ => return false,
        }
    }
    scan.tag_pairs
        .iter()
        .all(|pair| row.tag_pairs.iter().any(|have| have == pair))
}

fn hit(row: &TxGqlRow) -> ViewHit {
    ViewHit {
        tx_id: row.tx_id.clone(),
        tx_index: row.tx_index,
        data_item_index: row.data_item_index,
    }
}

impl Inner {
    fn tx_gql(&self, dir: SortDir) -> &TxGqlMap {
        match dir {
            SortDir::Asc => &self.tx_gql_asc,
            SortDir::Desc => &self.tx_gql_desc,
        }
    }

    fn tx_gql_mut(&mut self, dir: SortDir) -> &mut TxGqlMap {
        match dir {
            SortDir::Asc => &mut self.tx_gql_asc,
            SortDir::Desc => &mut self.tx_gql_desc,
        }
    }

    fn block_gql_mut(&mut self, dir: SortDir) -> &mut BTreeMap<u64, BlockGqlRow> {
        match dir {
            SortDir::Asc => &mut self.block_gql_asc,
            SortDir::Desc => &mut self.block_gql_desc,
        }
    }

    fn scan_filter(&self, view: &ViewId, scan: &FilterScan) -> Vec<ViewHit> {
        let map = self.tx_gql(view.dir);
        let mut hits = Vec::new();
        let rows: Box<dyn Iterator<Item = &TxGqlRow>> = match view.dir {
            SortDir::Asc => Box::new(map.values()),
            SortDir::Desc => Box::new(map.values().rev()),
        };
        for row in rows {
            if hits.len() >= scan.limit {
                break;
            }
            if matches_filter(row, scan) {
                hits.push(hit(row));
            }
        }
        hits
    }

    fn scan_buckets(&self, view: &ViewId, scan: &BucketScan) -> Vec<BucketHit> {
        let map = self.tx_gql(view.dir);
        let bucket_stride = scan.span * TX_INDEX_STRIDE;
        let mut hits = Vec::new();

        'buckets: for &bucket in &scan.buckets {
            let low = bucket.saturating_mul(bucket_stride);
            let high = low.saturating_add(bucket_stride);
            let range = map.range((low, 0)..(high, 0));
            let rows: Box<dyn Iterator<Item = &TxGqlRow>> = match view.dir {
                SortDir::Asc => Box::new(range.map(|(_, row)| row)),
                SortDir::Desc => Box::new(range.rev().map(|(_, row)| row)),
            };
            for row in rows {
                if hits.len() >= scan.limit {
                    break 'buckets;
                }
                if row.tx_index < scan.min_tx_index || row.tx_index > scan.max_tx_index {
                    continue;
                }
                if !scan
                    .tag_pairs
                    .iter()
                    .all(|pair| row.tag_pairs.iter().any(|have| have == pair))
                {
                    continue;
                }
                hits.push(BucketHit {
                    hit: hit(row),
                    bucket,
                });
            }
        }
        hits
    }
}

impl GatewayStore for MemoryStore {
    fn block<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<Option<BlockRow>>> {
        Box::pin(async move { Ok(self.inner.read().await.blocks.get(hash.as_str()).cloned()) })
    }

    fn put_block(&self, row: BlockRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .blocks
                .insert(row.indep_hash.as_str().to_owned(), row);
            Ok(())
        })
    }

    fn remove_block<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.blocks.remove(hash.as_str());
            Ok(())
        })
    }

    fn put_block_height(&self, height: u64, hash: BlockHash) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .height_to_hash
                .insert(height, hash);
            Ok(())
        })
    }

    fn remove_block_height(&self, height: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.height_to_hash.remove(&height);
            Ok(())
        })
    }

    fn max_height_block(&self) -> BoxFuture<'_, Result<Option<BlockStub>>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .height_to_hash
                .iter()
                .next_back()
                .map(|(height, hash)| BlockStub {
                    height: *height,
                    indep_hash: hash.clone(),
                }))
        })
    }

    fn scan_block_stubs(&self) -> BoxFuture<'_, Result<Vec<BlockStub>>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .blocks
                .values()
                .map(|row| BlockStub {
                    height: row.height,
                    indep_hash: row.indep_hash.clone(),
                })
                .collect())
        })
    }

    fn blocks_above(&self, height: u64) -> BoxFuture<'_, Result<Vec<BlockStub>>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .height_to_hash
                .range(height + 1..)
                .map(|(h, hash)| BlockStub {
                    height: *h,
                    indep_hash: hash.clone(),
                })
                .collect())
        })
    }

    fn put_block_gql(&self, dir: SortDir, row: BlockGqlRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .block_gql_mut(dir)
                .insert(row.height, row);
            Ok(())
        })
    }

    fn remove_block_gql(&self, dir: SortDir, key: BlockGqlKey) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.block_gql_mut(dir).remove(&key.height);
            Ok(())
        })
    }

    fn transaction<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Option<TxRow>>> {
        Box::pin(async move { Ok(self.inner.read().await.transactions.get(tx_id).cloned()) })
    }

    fn put_transaction(&self, row: TxRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .transactions
                .insert(row.tx_id.clone(), row);
            Ok(())
        })
    }

    fn remove_transaction<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.transactions.remove(tx_id);
            Ok(())
        })
    }

    fn put_tx_gql(&self, dir: SortDir, row: TxGqlRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .tx_gql_mut(dir)
                .insert((row.tx_index, row.data_item_index), row);
            Ok(())
        })
    }

    fn remove_tx_gql(&self, dir: SortDir, key: TxGqlKey) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .tx_gql_mut(dir)
                .remove(&(key.tx_index, key.data_item_index));
            Ok(())
        })
    }

    fn put_tx_offset(&self, row: TxOffsetRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .tx_offsets
                .insert(row.tx_id.clone(), row);
            Ok(())
        })
    }

    fn remove_tx_offset<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.tx_offsets.remove(tx_id);
            Ok(())
        })
    }

    fn put_tag_row<'a>(&'a self, view: &'a str, row: TagRow) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .tag_rows
                .entry(view.to_owned())
                .or_default()
                .insert(tag_key(&row.key()), row);
            Ok(())
        })
    }

    fn remove_tag_row<'a>(&'a self, view: &'a str, key: TagRowKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(rows) = self.inner.write().await.tag_rows.get_mut(view) {
                rows.remove(&tag_key(&key));
            }
            Ok(())
        })
    }

    fn manifest<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Option<ManifestRow>>> {
        Box::pin(async move { Ok(self.inner.read().await.manifests.get(tx_id).cloned()) })
    }

    fn put_manifest(&self, row: ManifestRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .manifests
                .insert(row.tx_id.clone(), row);
            Ok(())
        })
    }

    fn remove_manifest<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.manifests.remove(tx_id);
            Ok(())
        })
    }

    fn mark_manifest_unimported<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .manifest_unimported
                .insert(tx_id.to_owned());
            Ok(())
        })
    }

    fn clear_manifest_unimported<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.write().await.manifest_unimported.remove(tx_id);
            Ok(())
        })
    }

    fn unimported_manifests(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            Ok(self
                .inner
                .read()
                .await
                .manifest_unimported
                .iter()
                .cloned()
                .collect())
        })
    }

    fn put_permaweb_path(&self, row: PermawebPathRow) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .permaweb_paths
                .insert((row.domain_id.clone(), row.uri_path.clone()), row);
            Ok(())
        })
    }

    fn remove_permaweb_path<'a>(
        &'a self,
        domain_id: &'a str,
        uri_path: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner
                .write()
                .await
                .permaweb_paths
                .remove(&(domain_id.to_owned(), uri_path.to_owned()));
            Ok(())
        })
    }

    fn update_status(&self, update: StatusUpdate) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let entry = inner
                .status
                .entry(update.session.clone())
                .or_insert_with(|| StatusUpdate {
                    session: update.session.clone(),
                    ..StatusUpdate::default()
                });
            if update.gateway_height.is_some() {
                entry.gateway_height = update.gateway_height;
            }
            if update.remote_height.is_some() {
                entry.remote_height = update.remote_height;
            }
            if update.current_imports.is_some() {
                entry.current_imports = update.current_imports;
            }
            if update.status.is_some() {
                entry.status = update.status;
            }
            Ok(())
        })
    }

    fn scan_filter_view<'a>(
        &'a self,
        view: &'a ViewId,
        scan: FilterScan,
    ) -> BoxFuture<'a, Result<Vec<ViewHit>>> {
        Box::pin(async move { Ok(self.inner.read().await.scan_filter(view, &scan)) })
    }

    fn scan_bucket_view<'a>(
        &'a self,
        view: &'a ViewId,
        scan: BucketScan,
    ) -> BoxFuture<'a, Result<Vec<BucketHit>>> {
        Box::pin(async move { Ok(self.inner.read().await.scan_buckets(view, &scan)) })
    }
}
