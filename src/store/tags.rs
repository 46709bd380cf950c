//! Tag index variant registry.
//!
//! Every transaction tag is materialized once per variant view so tag
//! predicates can be combined with any subset of the structural filter
//! columns. The variant set is generated from the column list instead of
//! being hand-enumerated; the physical column order is fixed.

use crate::chain::types::{Tag, Transaction};
use crate::store::rows::{SortDir, TagRow};
use std::sync::OnceLock;

/// Structural columns a tag view can be specialized by, in physical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagDim {
    TxId,
    Owner,
    Target,
    BundledIn,
    DataRoot,
}

impl TagDim {
    pub const ALL: [TagDim; 5] = [
        TagDim::TxId,
        TagDim::Owner,
        TagDim::Target,
        TagDim::BundledIn,
        TagDim::DataRoot,
    ];

    pub fn column(self) -> &'static str {
        match self {
            TagDim::TxId => "tx_id",
            TagDim::Owner => "owner",
            TagDim::Target => "target",
            TagDim::BundledIn => "bundled_in",
            TagDim::DataRoot => "data_root",
        }
    }
}

/// Physical view name for a variant and direction, e.g.
/// `tx_tag_gql_by_owner_and_target_asc`. The empty variant is the plain
/// `tx_tag_gql_{asc,desc}` view.
pub fn tag_view_name(dims: &[TagDim], dir: SortDir) -> String {
    if dims.is_empty() {
        return format!("tx_tag_gql_{}", dir.suffix());
    }
    let columns: Vec<&str> = dims.iter().map(|dim| dim.column()).collect();
    format!("tx_tag_gql_by_{}_{}", columns.join("_and_"), dir.suffix())
}

/// All 32 variants (every subset of the five columns, the empty set
/// included), in a deterministic order.
pub fn tag_variants() -> &'static [Vec<TagDim>] {
    static VARIANTS: OnceLock<Vec<Vec<TagDim>>> = OnceLock::new();
    VARIANTS.get_or_init(|| {
        let mut variants = Vec::with_capacity(1 << TagDim::ALL.len());
        for mask in 0u32..(1 << TagDim::ALL.len()) {
            let dims: Vec<TagDim> = TagDim::ALL
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, dim)| *dim)
                .collect();
            variants.push(dims);
        }
        variants
    })
}

/// All variant view names for one direction.
pub fn tag_view_names(dir: SortDir) -> Vec<String> {
    tag_variants()
        .iter()
        .map(|dims| tag_view_name(dims, dir))
        .collect()
}

/// Builds the row written to (and dropped from) every variant view for one
/// tag of a transaction.
pub fn tag_row(tx: &Transaction, tag: &Tag, tag_index: u64, tx_index: u64, data_item_index: u64) -> TagRow {
    TagRow {
        tag_name: tag.name.clone(),
        tag_value: tag.value.clone(),
        tag_index,
        tx_id: tx.id.clone(),
        tx_index,
        data_item_index,
        owner: tx.owner.clone(),
        target: tx.target.clone(),
        bundled_in: tx.bundled_in.clone(),
        data_root: tx.data_root.clone(),
    }
}
