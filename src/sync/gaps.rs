//! Gap detection: one full pass over stored block stubs against the
//! authoritative hash list. Runs at startup (and on explicit re-trigger),
//! never per poll cycle.

use crate::chain::types::BlockHash;
use crate::store::GatewayStore;
use anyhow::Result;
use std::collections::BTreeMap;

/// Ephemeral (height, expected hash) record produced by the diff. Never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsyncedBlock {
    pub height: u64,
    pub hash: BlockHash,
}

/// Builds the full expected set from a hash list (first-run backfill).
pub fn full_backfill(hash_list: &[BlockHash]) -> Vec<UnsyncedBlock> {
    hash_list
        .iter()
        .enumerate()
        .map(|(height, hash)| UnsyncedBlock {
            height: height as u64,
            hash: hash.clone(),
        })
        .collect()
}

/// Compares the expected ordered hash list (index = height) against stored
/// rows and returns the missing or mismatched heights, ascending.
///
/// A height survives into the result when no stored row exists for it or the
/// stored hash differs from the expected one; heights whose stored hash
/// matches are dropped.
pub async fn find_missing_blocks(
    store: &dyn GatewayStore,
    hash_list: &[BlockHash],
) -> Result<Vec<UnsyncedBlock>> {
    let mut expected: BTreeMap<u64, BlockHash> = hash_list
        .iter()
        .enumerate()
        .map(|(height, hash)| (height as u64, hash.clone()))
        .collect();

    tracing::info!("looking for missing blocks...");
    let stored = store.scan_block_stubs().await?;

    for stub in stored {
        match expected.get(&stub.height) {
            Some(hash) if *hash == stub.indep_hash => {
                expected.remove(&stub.height);
            }
            Some(hash) => {
                tracing::info!(
                    height = stub.height,
                    expected = %hash,
                    stored = %stub.indep_hash,
                    "found mismatching block"
                );
            }
            None => {
                tracing::info!(
                    height = stub.height,
                    "stored block has no expected entry"
                );
            }
        }
    }

    Ok(expected
        .into_iter()
        .map(|(height, hash)| UnsyncedBlock { height, hash })
        .collect())
}
