//! Test data generators.

use gossip_files::CHUNK_SIZE;
use gossip_proto::{sha256, Hash32};
use std::path::{Path, PathBuf};

/// Deterministic pseudo-random bytes for test files.
pub fn patterned_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// The metafile a node builds for these bytes: chunk hashes in order.
pub fn metafile_of(bytes: &[u8]) -> Vec<u8> {
    let mut metafile = Vec::new();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        metafile.extend_from_slice(&sha256(chunk));
    }
    metafile
}

/// The metahash a node derives for these bytes.
pub fn metahash_of(bytes: &[u8]) -> Hash32 {
    sha256(&metafile_of(bytes))
}

/// Write a test file and return its path.
pub fn write_test_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("test file written");
    path
}
