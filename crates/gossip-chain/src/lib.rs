//! # gossip-chain
//!
//! The proof-of-work blockchain recording filename-to-metafile claims:
//! - [`Blockchain`]: a tree of blocks rooted at a synthetic all-zero
//!   genesis, longest chain wins, pending transactions reconciled across
//!   fork switches
//! - [`Miner`]: a dedicated thread searching nonces over the pending set
//!   and committing mined blocks under the chain lock

mod miner;
mod tree;

pub use miner::Miner;
pub use tree::{Blockchain, TxSet};

use std::time::Duration;

/// Sleep while the pending transaction set is empty.
pub const MINER_IDLE_SLEEP: Duration = Duration::from_millis(500);

/// Pause after mining the very first block past genesis.
pub const FIRST_BLOCK_DELAY: Duration = Duration::from_secs(5);
