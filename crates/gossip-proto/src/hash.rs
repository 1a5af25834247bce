//! SHA-256 hashing for the protocol.
//!
//! All hashes on the wire are 32 bytes. The transaction and block layouts
//! must match across implementations byte for byte, so they are written out
//! explicitly here rather than derived.

use crate::packet::{Block, TxPublish};
use crate::POW_LEADING_ZERO_BYTES;
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest.
pub type Hash32 = [u8; 32];

/// Hash arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash32 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

impl TxPublish {
    /// Transaction hash: `SHA256(LE-u32(len(name)) || name || metafile_hash)`.
    ///
    /// The hop limit is transport state and is excluded.
    pub fn tx_hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update((self.file.name.len() as u32).to_le_bytes());
        hasher.update(self.file.name.as_bytes());
        hasher.update(self.file.metafile_hash);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

impl Block {
    /// Block hash: `SHA256(prev_hash || nonce || LE-u32(len(tx)) || tx hashes)`.
    pub fn block_hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash);
        hasher.update(self.nonce);
        hasher.update((self.transactions.len() as u32).to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.tx_hash());
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    /// Proof-of-work rule: the first bytes of the block hash are zero.
    pub fn pow_ok(&self) -> bool {
        let hash = self.block_hash();
        hash[..POW_LEADING_ZERO_BYTES].iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::FileRecord;

    fn tx(name: &str) -> TxPublish {
        TxPublish {
            file: FileRecord {
                name: name.to_string(),
                size: 100,
                metafile_hash: [7u8; 32],
            },
            hop_limit: 10,
        }
    }

    #[test]
    fn test_tx_hash_ignores_hop_limit() {
        let a = tx("file.txt");
        let mut b = tx("file.txt");
        b.hop_limit = 0;
        assert_eq!(a.tx_hash(), b.tx_hash());
    }

    #[test]
    fn test_tx_hash_depends_on_name_and_metahash() {
        assert_ne!(tx("a").tx_hash(), tx("b").tx_hash());

        let mut other = tx("a");
        other.file.metafile_hash = [8u8; 32];
        assert_ne!(tx("a").tx_hash(), other.tx_hash());
    }

    #[test]
    fn test_block_hash_covers_parent_nonce_and_txs() {
        let base = Block {
            prev_hash: [0u8; 32],
            nonce: [1u8; 32],
            transactions: vec![tx("a")],
        };

        let mut reparented = base.clone();
        reparented.prev_hash = [2u8; 32];
        assert_ne!(base.block_hash(), reparented.block_hash());

        let mut renonced = base.clone();
        renonced.nonce = [3u8; 32];
        assert_ne!(base.block_hash(), renonced.block_hash());

        let mut refilled = base.clone();
        refilled.transactions.push(tx("b"));
        assert_ne!(base.block_hash(), refilled.block_hash());
    }

    #[test]
    fn test_pow_checks_leading_bytes() {
        // Search a nonce until the hash starts with two zero bytes. The
        // expected work is 65536 hashes, well within test budget.
        let mut block = Block {
            prev_hash: [0u8; 32],
            nonce: [0u8; 32],
            transactions: vec![tx("pow.bin")],
        };

        let mut counter: u64 = 0;
        loop {
            block.nonce[..8].copy_from_slice(&counter.to_le_bytes());
            if block.pow_ok() {
                break;
            }
            counter += 1;
        }

        let hash = block.block_hash();
        assert_eq!(&hash[..POW_LEADING_ZERO_BYTES], &[0, 0]);
    }
}
