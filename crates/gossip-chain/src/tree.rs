//! Block tree and pending transaction set.
//!
//! Blocks form a tree rooted at a synthetic genesis whose hash is all
//! zeroes. The official history is the path from the deepest node (the
//! tail) back to genesis; ties are broken by first arrival. The pending set
//! holds transactions known but not yet confirmed on the official chain,
//! and is rolled back and replayed when a fork overtakes the main chain.

use gossip_proto::{Block, Hash32, TxPublish};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A set of transactions, deduplicated by transaction hash.
#[derive(Debug, Clone, Default)]
pub struct TxSet {
    txs: Vec<TxPublish>,
}

impl TxSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a block's transactions.
    pub fn from_txs(txs: Vec<TxPublish>) -> Self {
        let mut set = Self::new();
        for tx in txs {
            set.add(tx);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Membership by transaction hash (hop limits excluded).
    pub fn contains(&self, tx: &TxPublish) -> bool {
        let hash = tx.tx_hash();
        self.txs.iter().any(|t| t.tx_hash() == hash)
    }

    /// Does any transaction claim this filename?
    pub fn contains_name(&self, name: &str) -> bool {
        self.txs.iter().any(|t| t.file.name == name)
    }

    /// The transaction claiming a filename, if any.
    pub fn get_by_name(&self, name: &str) -> Option<&TxPublish> {
        self.txs.iter().find(|t| t.file.name == name)
    }

    /// Insert if not already present.
    pub fn add(&mut self, tx: TxPublish) {
        if !self.contains(&tx) {
            self.txs.push(tx);
        }
    }

    /// Add every transaction of `other` not already present.
    pub fn union(&mut self, other: &TxSet) {
        for tx in &other.txs {
            self.add(tx.clone());
        }
    }

    /// Remove every transaction present in `other`.
    pub fn subtract(&mut self, other: &TxSet) {
        self.txs
            .retain(|t| !other.contains(t));
    }

    pub fn clear(&mut self) {
        self.txs.clear();
    }

    /// Copy of the transactions, in insertion order.
    pub fn snapshot(&self) -> Vec<TxPublish> {
        self.txs.clone()
    }
}

struct BlockNode {
    /// None only for the synthetic genesis.
    block: Option<Block>,
    hash: Hash32,
    parent: Option<usize>,
    depth: u64,
    txs: TxSet,
}

struct ChainState {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash32, usize>,
    /// Index of the deepest node, ties broken by first arrival.
    tail: usize,
    pending: TxSet,
}

impl ChainState {
    /// Lowest common ancestor of two nodes.
    fn lca(&self, mut a: usize, mut b: usize) -> usize {
        while self.nodes[a].depth > self.nodes[b].depth {
            a = self.nodes[a].parent.expect("non-genesis node has a parent");
        }
        while self.nodes[b].depth > self.nodes[a].depth {
            b = self.nodes[b].parent.expect("non-genesis node has a parent");
        }
        while a != b {
            a = self.nodes[a].parent.expect("non-genesis node has a parent");
            b = self.nodes[b].parent.expect("non-genesis node has a parent");
        }
        a
    }

    fn attach(&mut self, block: Block, hash: Hash32, parent: usize) -> usize {
        let idx = self.nodes.len();
        let txs = TxSet::from_txs(block.transactions.clone());
        self.nodes.push(BlockNode {
            block: Some(block),
            hash,
            parent: Some(parent),
            depth: self.nodes[parent].depth + 1,
            txs,
        });
        self.by_hash.insert(hash, idx);
        idx
    }
}

/// The blockchain engine. One coarse lock; the miner holds it only to
/// commit, never while hashing.
pub struct Blockchain {
    inner: Mutex<ChainState>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a chain holding only the synthetic genesis.
    pub fn new() -> Self {
        let genesis = BlockNode {
            block: None,
            hash: [0u8; 32],
            parent: None,
            depth: 0,
            txs: TxSet::new(),
        };
        let mut by_hash = HashMap::new();
        by_hash.insert([0u8; 32], 0);
        Self {
            inner: Mutex::new(ChainState {
                nodes: vec![genesis],
                by_hash,
                tail: 0,
                pending: TxSet::new(),
            }),
        }
    }

    /// Submit a block received from the mesh (or mined elsewhere).
    ///
    /// Returns true if the block was new and attached; known blocks,
    /// orphan parents and invalid proof-of-work are all rejected.
    pub fn add_block(&self, block: &Block) -> bool {
        let st = &mut *self.inner.lock();

        let hash = block.block_hash();
        if st.by_hash.contains_key(&hash) {
            debug!(block = %hex::encode(hash), "Block already known");
            return false;
        }
        let Some(&parent) = st.by_hash.get(&block.prev_hash) else {
            warn!(block = %hex::encode(hash), "Block parent unknown, rejected");
            return false;
        };
        if !block.pow_ok() {
            warn!(block = %hex::encode(hash), "Block fails proof-of-work, rejected");
            return false;
        }

        if parent == st.tail {
            let idx = st.attach(block.clone(), hash, parent);
            st.tail = idx;
            let ChainState { nodes, pending, .. } = st;
            pending.subtract(&nodes[idx].txs);
            info!(
                block = %hex::encode(hash),
                depth = nodes[idx].depth,
                "Block extends the main chain"
            );
            return true;
        }

        let new_depth = st.nodes[parent].depth + 1;
        if new_depth <= st.nodes[st.tail].depth {
            st.attach(block.clone(), hash, parent);
            info!(
                block = %hex::encode(hash),
                depth = new_depth,
                tail_depth = st.nodes[st.tail].depth,
                "Block attached to a side chain"
            );
            return true;
        }

        // A fork just overtook the main chain: roll the old branch's
        // transactions back into pending, then apply the new branch.
        let idx = st.attach(block.clone(), hash, parent);
        let lca = st.lca(st.tail, idx);
        let ChainState {
            nodes,
            tail,
            pending,
            ..
        } = st;

        let mut cursor = *tail;
        let mut rolled_back = 0u32;
        while cursor != lca {
            pending.union(&nodes[cursor].txs);
            cursor = nodes[cursor].parent.expect("non-genesis node has a parent");
            rolled_back += 1;
        }
        let mut cursor = idx;
        while cursor != lca {
            pending.subtract(&nodes[cursor].txs);
            cursor = nodes[cursor].parent.expect("non-genesis node has a parent");
        }
        *tail = idx;

        warn!(
            block = %hex::encode(hash),
            depth = new_depth,
            rolled_back,
            "Fork overtook the main chain, switched tail"
        );
        true
    }

    /// Submit a transaction to the pending set.
    ///
    /// Rejected when already pending, when the filename is reserved in
    /// pending, or when the official chain already records the transaction
    /// or claims the name.
    pub fn add_transaction(&self, tx: &TxPublish) -> bool {
        let st = &mut *self.inner.lock();

        if st.pending.contains(tx) {
            debug!(name = %tx.file.name, "Transaction already pending");
            return false;
        }
        if let Some(existing) = st.pending.get_by_name(&tx.file.name) {
            warn!(
                name = %tx.file.name,
                claimed_by = %hex::encode(existing.file.metafile_hash),
                "Filename already reserved in pending transactions"
            );
            return false;
        }

        let mut cursor = st.tail;
        loop {
            let node = &st.nodes[cursor];
            if node.txs.contains(tx) {
                debug!(name = %tx.file.name, "Transaction already on the main chain");
                return false;
            }
            if let Some(existing) = node.txs.get_by_name(&tx.file.name) {
                warn!(
                    name = %tx.file.name,
                    claimed_by = %hex::encode(existing.file.metafile_hash),
                    "Filename already claimed on the main chain"
                );
                return false;
            }
            match node.parent {
                Some(parent) => cursor = parent,
                None => break,
            }
        }

        st.pending.add(tx.clone());
        true
    }

    /// Snapshot for a mining attempt: current tail hash and pending
    /// transactions. None while nothing is pending.
    pub fn mining_snapshot(&self) -> Option<(Hash32, Vec<TxPublish>)> {
        let st = self.inner.lock();
        if st.pending.is_empty() {
            return None;
        }
        Some((st.nodes[st.tail].hash, st.pending.snapshot()))
    }

    /// Commit a nonce found outside the lock.
    ///
    /// Re-snapshots the tail and pending set under the lock, re-verifies
    /// the proof-of-work against the final fields and, if still valid,
    /// attaches the block as the new tail and clears pending. Returns the
    /// committed block and its depth.
    pub fn commit_mined(&self, nonce: [u8; 32]) -> Option<(Block, u64)> {
        let st = &mut *self.inner.lock();
        if st.pending.is_empty() {
            return None;
        }

        let block = Block {
            prev_hash: st.nodes[st.tail].hash,
            nonce,
            transactions: st.pending.snapshot(),
        };
        if !block.pow_ok() {
            // Tail or pending changed since the candidate was hashed.
            debug!("Mined candidate went stale before commit");
            return None;
        }

        let hash = block.block_hash();
        if st.by_hash.contains_key(&hash) {
            return None;
        }

        let parent = st.tail;
        let idx = st.attach(block.clone(), hash, parent);
        st.tail = idx;
        st.pending.clear();
        let depth = st.nodes[idx].depth;

        info!(
            block = %hex::encode(hash),
            depth,
            txs = block.transactions.len(),
            "Mined block committed"
        );
        Some((block, depth))
    }

    /// Depth of the tail (number of blocks on the official chain).
    pub fn depth(&self) -> u64 {
        let st = self.inner.lock();
        st.nodes[st.tail].depth
    }

    /// Hash of the current tail.
    pub fn tail_hash(&self) -> Hash32 {
        let st = self.inner.lock();
        st.nodes[st.tail].hash
    }

    /// Number of non-genesis blocks in the tree.
    pub fn block_count(&self) -> usize {
        self.inner.lock().nodes.len() - 1
    }

    /// Copy of the pending transaction set.
    pub fn pending_snapshot(&self) -> Vec<TxPublish> {
        self.inner.lock().pending.snapshot()
    }

    /// Block hashes from the tail back to genesis (exclusive).
    pub fn main_chain(&self) -> Vec<Hash32> {
        let st = self.inner.lock();
        let mut hashes = Vec::new();
        let mut cursor = st.tail;
        while let Some(parent) = st.nodes[cursor].parent {
            hashes.push(st.nodes[cursor].hash);
            cursor = parent;
        }
        hashes
    }

    /// The filename claims confirmed on the official chain, tail first.
    pub fn confirmed_claims(&self) -> Vec<TxPublish> {
        let st = self.inner.lock();
        let mut claims = Vec::new();
        let mut cursor = st.tail;
        while let Some(parent) = st.nodes[cursor].parent {
            claims.extend(st.nodes[cursor].txs.snapshot());
            cursor = parent;
        }
        claims
    }
}
