//! Typed rows for the denormalized table families. Every row here is a
//! materialized view of a `Block` or `Transaction` and is only ever created
//! or removed as a side effect of importing or rolling back its source.

use crate::chain::types::{BlockHash, Tag};
use crate::store::keys::GqlBucket;
use serde::{Deserialize, Serialize};

/// Scan direction of a height-ordered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn suffix(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }
}

/// Primary block row, keyed by `indep_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRow {
    pub indep_hash: BlockHash,
    pub height: u64,
    pub previous_block: BlockHash,
    pub timestamp: u64,
    pub txs: Vec<String>,
}

/// Height + hash pair used by the gap detector's single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStub {
    pub height: u64,
    pub indep_hash: BlockHash,
}

/// Height-partitioned block GQL row, one per direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGqlRow {
    pub bucket: GqlBucket,
    pub height: u64,
    pub indep_hash: BlockHash,
    pub timestamp: u64,
    pub previous: BlockHash,
}

/// Key of a block GQL row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockGqlKey {
    pub bucket: GqlBucket,
    pub height: u64,
}

/// Primary transaction row, keyed by `tx_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRow {
    pub tx_id: String,
    pub tx_index: u64,
    pub data_item_index: u64,
    pub block_hash: BlockHash,
    pub owner: String,
    pub target: String,
    pub bundled_in: Option<String>,
    pub data_root: String,
    pub tags: Vec<Tag>,
}

/// Height-partitioned transaction GQL row, one per direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxGqlRow {
    pub bucket: GqlBucket,
    pub tx_id: String,
    pub tx_index: u64,
    pub data_item_index: u64,
    pub owner: String,
    pub target: String,
    pub bundled_in: Option<String>,
    pub data_root: String,
    /// `name|value` wire-encoded pairs for CONTAINS matching.
    pub tag_pairs: Vec<String>,
}

/// Key of a transaction GQL row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxGqlKey {
    pub bucket: GqlBucket,
    pub tx_index: u64,
    pub data_item_index: u64,
}

/// Data offset index row, keyed by `tx_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOffsetRow {
    pub tx_id: String,
    pub data_size: u64,
}

/// One row per (tag, transaction) in each tag index variant view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRow {
    pub tag_name: String,
    pub tag_value: String,
    pub tag_index: u64,
    pub tx_id: String,
    pub tx_index: u64,
    pub data_item_index: u64,
    pub owner: String,
    pub target: String,
    pub bundled_in: Option<String>,
    pub data_root: String,
}

/// Key of a tag index row within one variant view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagRowKey {
    pub tag_name: String,
    pub tag_value: String,
    pub tx_index: u64,
    pub data_item_index: u64,
    pub tag_index: u64,
}

impl TagRow {
    pub fn key(&self) -> TagRowKey {
        TagRowKey {
            tag_name: self.tag_name.clone(),
            tag_value: self.tag_value.clone(),
            tx_index: self.tx_index,
            data_item_index: self.data_item_index,
            tag_index: self.tag_index,
        }
    }
}

/// Imported manifest row, keyed by the owning `tx_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRow {
    pub tx_id: String,
    pub manifest_type: String,
    pub manifest_version: String,
    /// Index path, empty when the manifest declares none.
    pub manifest_index: String,
    /// Raw paths object as JSON, preserved for rollback.
    pub manifest_paths: String,
}

/// Derived permaweb path row, keyed by `(domain_id, uri_path)`. The index
/// path of a manifest is stored under the empty uri.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermawebPathRow {
    pub domain_id: String,
    pub uri_path: String,
    pub target_id: String,
}

/// Fields of the sync status row. `None` fields are left untouched by an
/// update; the row is telemetry only and never read back by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub session: String,
    pub gateway_height: Option<u64>,
    pub remote_height: Option<u64>,
    pub current_imports: Option<Vec<u64>>,
    pub status: Option<String>,
}
