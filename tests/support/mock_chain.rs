//! In-process scriptable chain source used by the integration suites.
//!
//! Supports linear chain construction, fork injection, per-transaction fetch
//! gating (to hold an import in flight), and concurrency accounting.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use permagate::chain::types::{Block, BlockHash, NodeInfo, Tag, Transaction};
use permagate::chain::ChainSource;
use permagate::chain::types::MANIFEST_CONTENT_TYPE;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

pub fn block_hash(height: u64) -> BlockHash {
    BlockHash::from(format!("block-{height}"))
}

pub fn fork_hash(height: u64) -> BlockHash {
    BlockHash::from(format!("fork-{height}"))
}

pub fn tx_id(height: u64, index: usize) -> String {
    format!("tx-{height}-{index}")
}

#[derive(Default)]
struct ChainState {
    by_height: BTreeMap<u64, Block>,
    by_hash: HashMap<String, Block>,
    txs: HashMap<String, Transaction>,
    tx_bodies: HashMap<String, Vec<u8>>,
}

#[derive(Clone)]
pub struct MockChain {
    state: Arc<RwLock<ChainState>>,
    gated_txs: Arc<Mutex<HashSet<String>>>,
    gate: Arc<Notify>,
    tx_fetch_delay: Arc<Mutex<Duration>>,
    import_order: Arc<Mutex<Vec<u64>>>,
    active_tx_fetches: Arc<AtomicUsize>,
    peak_tx_fetches: Arc<AtomicUsize>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ChainState::default())),
            gated_txs: Arc::new(Mutex::new(HashSet::new())),
            gate: Arc::new(Notify::new()),
            tx_fetch_delay: Arc::new(Mutex::new(Duration::ZERO)),
            import_order: Arc::new(Mutex::new(Vec::new())),
            active_tx_fetches: Arc::new(AtomicUsize::new(0)),
            peak_tx_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Builds a linear chain of `length` blocks with `txs_per_block`
    /// transactions each.
    pub fn linear(length: u64, txs_per_block: usize) -> Self {
        let chain = Self::new();
        let mut previous = BlockHash::from("genesis-parent");
        for height in 0..length {
            let hash = block_hash(height);
            chain.push_block(height, hash.clone(), previous.clone(), txs_per_block);
            previous = hash;
        }
        chain
    }

    fn push_block(
        &self,
        height: u64,
        hash: BlockHash,
        previous: BlockHash,
        txs_per_block: usize,
    ) {
        let tx_ids: Vec<String> = (0..txs_per_block).map(|i| tx_id(height, i)).collect();
        let block = Block {
            indep_hash: hash.clone(),
            previous_block: previous,
            height,
            timestamp: 1_600_000_000 + height,
            txs: tx_ids.clone(),
        };

        let mut state = self.state.write().unwrap();
        for (index, id) in tx_ids.iter().enumerate() {
            state.txs.insert(
                id.clone(),
                Transaction {
                    id: id.clone(),
                    owner: format!("owner-{height}"),
                    target: format!("target-{index}"),
                    data_root: format!("root-{height}-{index}"),
                    data_size: 128,
                    bundled_in: None,
                    tags: vec![Tag::from_utf8("App-Name", "mock-app")],
                },
            );
        }
        state.by_hash.insert(hash.as_str().to_owned(), block.clone());
        state.by_height.insert(height, block);
    }

    /// Replaces every block above `from_height` with forked blocks and
    /// extends the chain to `new_tip`.
    pub fn apply_fork(&self, from_height: u64, new_tip: u64) {
        let old_tips: Vec<u64> = {
            let state = self.state.read().unwrap();
            state
                .by_height
                .range(from_height + 1..)
                .map(|(height, _)| *height)
                .collect()
        };
        {
            let mut state = self.state.write().unwrap();
            for height in old_tips {
                if let Some(block) = state.by_height.remove(&height) {
                    state.by_hash.remove(block.indep_hash.as_str());
                }
            }
        }

        let mut previous = {
            let state = self.state.read().unwrap();
            state
                .by_height
                .get(&from_height)
                .map(|block| block.indep_hash.clone())
                .unwrap_or_else(|| BlockHash::from("genesis-parent"))
        };
        for height in from_height + 1..=new_tip {
            let hash = fork_hash(height);
            self.push_fork_block(height, hash.clone(), previous.clone());
            previous = hash;
        }
    }

    fn push_fork_block(&self, height: u64, hash: BlockHash, previous: BlockHash) {
        let id = format!("fork-tx-{height}");
        let block = Block {
            indep_hash: hash.clone(),
            previous_block: previous,
            height,
            timestamp: 1_700_000_000 + height,
            txs: vec![id.clone()],
        };
        let mut state = self.state.write().unwrap();
        state.txs.insert(
            id.clone(),
            Transaction {
                id,
                owner: format!("fork-owner-{height}"),
                target: String::new(),
                data_root: String::new(),
                data_size: 64,
                bundled_in: None,
                tags: vec![Tag::from_utf8("App-Name", "fork-app")],
            },
        );
        state.by_hash.insert(hash.as_str().to_owned(), block.clone());
        state.by_height.insert(height, block);
    }

    /// Registers a manifest transaction at the given height slot.
    pub fn add_manifest_tx(&self, height: u64, index: usize, body: &str) -> String {
        let id = tx_id(height, index);
        let mut state = self.state.write().unwrap();
        if let Some(tx) = state.txs.get_mut(&id) {
            tx.tags = vec![Tag::from_utf8("Content-Type", MANIFEST_CONTENT_TYPE)];
        }
        state.tx_bodies.insert(id.clone(), body.as_bytes().to_vec());
        id
    }

    /// Holds every fetch of `tx` until [`MockChain::open_gate`] is called.
    pub fn gate_tx(&self, tx: &str) {
        self.gated_txs.lock().unwrap().insert(tx.to_owned());
    }

    pub fn open_gate(&self) {
        self.gated_txs.lock().unwrap().clear();
        self.gate.notify_waiters();
    }

    pub fn set_tx_fetch_delay(&self, delay: Duration) {
        *self.tx_fetch_delay.lock().unwrap() = delay;
    }

    /// Heights in the order `block_by_height` served them.
    pub fn import_order(&self) -> Vec<u64> {
        self.import_order.lock().unwrap().clone()
    }

    /// Peak number of concurrently outstanding transaction fetches.
    pub fn peak_tx_fetches(&self) -> usize {
        self.peak_tx_fetches.load(Ordering::SeqCst)
    }

    fn tip(&self) -> Option<Block> {
        let state = self.state.read().unwrap();
        state.by_height.values().next_back().cloned()
    }
}

impl ChainSource for MockChain {
    fn node_info(&self) -> BoxFuture<'_, Result<NodeInfo>> {
        Box::pin(async move {
            let tip = self.tip().ok_or_else(|| anyhow!("mock chain is empty"))?;
            Ok(NodeInfo {
                height: tip.height,
                current: tip.indep_hash,
            })
        })
    }

    fn hash_list(&self) -> BoxFuture<'_, Result<Vec<BlockHash>>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .by_height
                .values()
                .map(|block| block.indep_hash.clone())
                .collect())
        })
    }

    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<Block>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            state
                .by_hash
                .get(hash.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("unknown block hash {hash}"))
        })
    }

    fn block_by_height(&self, height: u64) -> BoxFuture<'_, Result<Block>> {
        Box::pin(async move {
            self.import_order.lock().unwrap().push(height);
            let state = self.state.read().unwrap();
            state
                .by_height
                .get(&height)
                .cloned()
                .ok_or_else(|| anyhow!("no block at height {height}"))
        })
    }

    fn transaction<'a>(&'a self, tx: &'a str) -> BoxFuture<'a, Result<Transaction>> {
        Box::pin(async move {
            loop {
                let gated = self.gated_txs.lock().unwrap().contains(tx);
                if !gated {
                    break;
                }
                let notified = self.gate.notified();
                if !self.gated_txs.lock().unwrap().contains(tx) {
                    break;
                }
                notified.await;
            }

            let active = self.active_tx_fetches.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_tx_fetches.fetch_max(active, Ordering::SeqCst);

            let delay = *self.tx_fetch_delay.lock().unwrap();
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let result = {
                let state = self.state.read().unwrap();
                state
                    .txs
                    .get(tx)
                    .cloned()
                    .ok_or_else(|| anyhow!("unknown transaction {tx}"))
            };

            self.active_tx_fetches.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn tx_data<'a>(&'a self, tx: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            state
                .tx_bodies
                .get(tx)
                .cloned()
                .ok_or_else(|| anyhow!("no body for transaction {tx}"))
        })
    }
}
