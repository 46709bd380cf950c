//! Wide-row store interface: typed get/put/remove per denormalized table
//! family plus the two scan surfaces the query planner issues. Removal is
//! idempotent everywhere: removing an absent row succeeds, which is what the
//! best-effort cleanup paths rely on.

pub mod keys;
pub mod memory;
pub mod rows;
pub mod tags;

use crate::chain::types::BlockHash;
use anyhow::Result;
use futures::future::BoxFuture;
use rows::{
    BlockGqlKey, BlockGqlRow, BlockRow, BlockStub, ManifestRow, PermawebPathRow, SortDir,
    StatusUpdate, TagRow, TagRowKey, TxGqlKey, TxGqlRow, TxOffsetRow, TxRow,
};

/// A resolved physical view: name plus scan direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewId {
    pub name: String,
    pub dir: SortDir,
}

/// Predicate for the single-range-scan path (structural filters present).
/// Empty vectors mean "no predicate on that column"; `tag_pairs` are matched
/// with CONTAINS semantics (every pair must be present on the row).
#[derive(Debug, Clone, Default)]
pub struct FilterScan {
    pub min_tx_index: u64,
    /// Inclusive upper bound.
    pub max_tx_index: u64,
    pub ids: Vec<String>,
    pub owners: Vec<String>,
    pub targets: Vec<String>,
    pub data_roots: Vec<String>,
    pub bundled_in: Vec<String>,
    pub tag_pairs: Vec<String>,
    pub limit: usize,
}

/// Predicate for one bucket-scan round trip: the bucket list is already in
/// scan order and every returned hit names the bucket it came from.
#[derive(Debug, Clone)]
pub struct BucketScan {
    pub min_tx_index: u64,
    /// Inclusive upper bound.
    pub max_tx_index: u64,
    pub buckets: Vec<u64>,
    /// Heights spanned by one bucket of this view.
    pub span: u64,
    pub tag_pairs: Vec<String>,
    pub limit: usize,
}

/// Row reference returned by planner scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewHit {
    pub tx_id: String,
    pub tx_index: u64,
    pub data_item_index: u64,
}

/// A `ViewHit` plus the scan bucket that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHit {
    pub hit: ViewHit,
    pub bucket: u64,
}

/// Typed surface of the wide-row store. Object-safe so the engine, workers,
/// and planner share one `Arc<dyn GatewayStore>`; a production backend lives
/// outside this crate, [`memory::MemoryStore`] is the embedded one.
pub trait GatewayStore: Send + Sync {
    // Block family.
    fn block<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<Option<BlockRow>>>;
    fn put_block(&self, row: BlockRow) -> BoxFuture<'_, Result<()>>;
    fn remove_block<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<()>>;

    fn put_block_height(&self, height: u64, hash: BlockHash) -> BoxFuture<'_, Result<()>>;
    fn remove_block_height(&self, height: u64) -> BoxFuture<'_, Result<()>>;

    /// Highest stored block, if any.
    fn max_height_block(&self) -> BoxFuture<'_, Result<Option<BlockStub>>>;
    /// Every stored block stub, one full scan; gap-detector only.
    fn scan_block_stubs(&self) -> BoxFuture<'_, Result<Vec<BlockStub>>>;
    /// Stored blocks with height strictly greater, ascending.
    fn blocks_above(&self, height: u64) -> BoxFuture<'_, Result<Vec<BlockStub>>>;

    fn put_block_gql(&self, dir: SortDir, row: BlockGqlRow) -> BoxFuture<'_, Result<()>>;
    fn remove_block_gql(&self, dir: SortDir, key: BlockGqlKey) -> BoxFuture<'_, Result<()>>;

    // Transaction family.
    fn transaction<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Option<TxRow>>>;
    fn put_transaction(&self, row: TxRow) -> BoxFuture<'_, Result<()>>;
    fn remove_transaction<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn put_tx_gql(&self, dir: SortDir, row: TxGqlRow) -> BoxFuture<'_, Result<()>>;
    fn remove_tx_gql(&self, dir: SortDir, key: TxGqlKey) -> BoxFuture<'_, Result<()>>;

    fn put_tx_offset(&self, row: TxOffsetRow) -> BoxFuture<'_, Result<()>>;
    fn remove_tx_offset<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn put_tag_row<'a>(&'a self, view: &'a str, row: TagRow) -> BoxFuture<'a, Result<()>>;
    fn remove_tag_row<'a>(&'a self, view: &'a str, key: TagRowKey) -> BoxFuture<'a, Result<()>>;

    // Manifest family.
    fn manifest<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Option<ManifestRow>>>;
    fn put_manifest(&self, row: ManifestRow) -> BoxFuture<'_, Result<()>>;
    fn remove_manifest<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn mark_manifest_unimported<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>>;
    fn clear_manifest_unimported<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<()>>;
    fn unimported_manifests(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    fn put_permaweb_path(&self, row: PermawebPathRow) -> BoxFuture<'_, Result<()>>;
    fn remove_permaweb_path<'a>(
        &'a self,
        domain_id: &'a str,
        uri_path: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    // Status family; callers treat failures as fire-and-forget.
    fn update_status(&self, update: StatusUpdate) -> BoxFuture<'_, Result<()>>;

    // Planner scans.
    fn scan_filter_view<'a>(
        &'a self,
        view: &'a ViewId,
        scan: FilterScan,
    ) -> BoxFuture<'a, Result<Vec<ViewHit>>>;
    fn scan_bucket_view<'a>(
        &'a self,
        view: &'a ViewId,
        scan: BucketScan,
    ) -> BoxFuture<'a, Result<Vec<BucketHit>>>;
}
