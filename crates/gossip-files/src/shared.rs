//! Files shared by this node.
//!
//! Sharing splits a file into `CHUNK_SIZE` chunks, writes every chunk to
//! `<shared>/<filename>/<hex(hash)>.chunk` and the metafile (the in-order
//! concatenation of chunk hashes) to `<hex(metahash)>.metafile`. Serving is
//! then a pure hash lookup.

use crate::error::{FileError, FileResult};
use crate::{name_matches, CHUNK_SIZE, CHUNK_SUFFIX, MAX_FILE_SIZE, METAFILE_SUFFIX};
use gossip_proto::{sha256, Hash32, SearchResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

struct SharedFile {
    name: String,
    size: usize,
    meta_hash: Hash32,
    metafile: Vec<u8>,
    chunk_set: HashSet<Hash32>,
    chunk_count: usize,
}

/// Outcome of sharing a file, used to build the filename-claim transaction.
#[derive(Debug, Clone)]
pub struct SharedFileSummary {
    pub name: String,
    pub size: usize,
    pub meta_hash: Hash32,
    pub chunk_count: usize,
}

/// Store of files this node serves chunks of.
pub struct SharedFileStore {
    base: PathBuf,
    files: Mutex<HashMap<String, SharedFile>>,
}

impl SharedFileStore {
    /// Create a store rooted at the shared-files directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Split a file into chunks, persist them content-addressed and start
    /// serving it.
    pub fn share(&self, path: &Path) -> FileResult<SharedFileSummary> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileError::NotAFile(path.display().to_string()))?
            .to_string();

        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(FileError::NotAFile(path.display().to_string())),
        }

        if self.files.lock().contains_key(&name) {
            return Err(FileError::AlreadyShared(name));
        }

        let bytes = fs::read(path)?;
        if bytes.len() > MAX_FILE_SIZE {
            return Err(FileError::TooLarge {
                size: bytes.len(),
                max: MAX_FILE_SIZE,
            });
        }

        let dir = self.base.join(&name);
        fs::create_dir_all(&dir)?;

        let mut metafile = Vec::with_capacity((bytes.len() / CHUNK_SIZE + 1) * 32);
        let mut chunk_set = HashSet::new();
        let mut chunk_count = 0usize;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            let hash = sha256(chunk);
            metafile.extend_from_slice(&hash);
            // Identical chunks collapse onto one file; the metafile keeps
            // the order either way.
            chunk_set.insert(hash);
            chunk_count += 1;
            fs::write(dir.join(format!("{}{}", hex::encode(hash), CHUNK_SUFFIX)), chunk)?;
        }

        let meta_hash = sha256(&metafile);
        fs::write(
            dir.join(format!("{}{}", hex::encode(meta_hash), METAFILE_SUFFIX)),
            &metafile,
        )?;

        info!(
            name = %name,
            size = bytes.len(),
            chunks = chunk_count,
            metahash = %hex::encode(meta_hash),
            "File shared"
        );

        let summary = SharedFileSummary {
            name: name.clone(),
            size: bytes.len(),
            meta_hash,
            chunk_count,
        };

        self.files.lock().insert(
            name.clone(),
            SharedFile {
                name,
                size: bytes.len(),
                meta_hash,
                metafile,
                chunk_set,
                chunk_count,
            },
        );

        Ok(summary)
    }

    /// Serve the bytes stored under a hash: a metafile or a chunk.
    pub fn chunk_or_metafile(&self, hash: &Hash32) -> Option<Vec<u8>> {
        let files = self.files.lock();
        for file in files.values() {
            if file.meta_hash == *hash {
                return Some(file.metafile.clone());
            }
            if file.chunk_set.contains(hash) {
                let path = self
                    .base
                    .join(&file.name)
                    .join(format!("{}{}", hex::encode(hash), CHUNK_SUFFIX));
                match fs::read(&path) {
                    Ok(bytes) => return Some(bytes),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Shared chunk unreadable");
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Search results for shared files whose name contains any keyword.
    /// Every chunk is resident, so the chunk map is complete.
    pub fn search_results(&self, keywords: &[String]) -> Vec<SearchResult> {
        let files = self.files.lock();
        files
            .values()
            .filter(|file| name_matches(&file.name, keywords))
            .map(|file| SearchResult {
                file_name: file.name.clone(),
                metafile_hash: file.meta_hash,
                chunk_map: (1..=file.chunk_count as u64).collect(),
                chunk_count: file.chunk_count as u64,
            })
            .collect()
    }

    /// Names of all shared files, sorted.
    pub fn shared_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total size of a shared file, if present.
    pub fn size_of(&self, name: &str) -> Option<usize> {
        self.files.lock().get(name).map(|f| f.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_file(contents: &[u8]) -> (SharedFileStore, SharedFileSummary, TempDir, TempDir) {
        let shared_dir = TempDir::new().unwrap();
        let input_dir = TempDir::new().unwrap();
        let path = input_dir.path().join("data.bin");
        fs::write(&path, contents).unwrap();

        let store = SharedFileStore::new(shared_dir.path());
        let summary = store.share(&path).unwrap();
        (store, summary, shared_dir, input_dir)
    }

    #[test]
    fn test_share_builds_metafile_and_chunks() {
        let contents = vec![0xA5u8; CHUNK_SIZE * 2 + 100];
        let (store, summary, shared_dir, _input) = store_with_file(&contents);

        assert_eq!(summary.chunk_count, 3);
        assert_eq!(summary.size, contents.len());

        // Metafile is the concatenation of per-chunk hashes, metahash its hash.
        let metafile = store.chunk_or_metafile(&summary.meta_hash).unwrap();
        assert_eq!(metafile.len(), 3 * 32);
        assert_eq!(sha256(&metafile), summary.meta_hash);

        // Every chunk is retrievable by its own hash and hashes back to it.
        for window in metafile.chunks(32) {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(window);
            let chunk = store.chunk_or_metafile(&hash).unwrap();
            assert_eq!(sha256(&chunk), hash);

            let on_disk = shared_dir
                .path()
                .join("data.bin")
                .join(format!("{}.chunk", hex::encode(hash)));
            assert!(on_disk.exists());
        }
    }

    #[test]
    fn test_share_rejects_duplicates_and_oversize() {
        let (store, _summary, _shared, input) = store_with_file(b"abc");
        let path = input.path().join("data.bin");
        assert!(matches!(
            store.share(&path),
            Err(FileError::AlreadyShared(_))
        ));

        let big = input.path().join("big.bin");
        fs::write(&big, vec![0u8; MAX_FILE_SIZE + 1]).unwrap();
        assert!(matches!(store.share(&big), Err(FileError::TooLarge { .. })));
    }

    #[test]
    fn test_search_matching_is_substring_over_any_keyword() {
        let (store, summary, _shared, _input) = store_with_file(b"iso bytes");

        let hits = store.search_results(&["data".to_string()]);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_full_match());
        assert_eq!(hits[0].metafile_hash, summary.meta_hash);

        assert!(store.search_results(&["nope".to_string()]).is_empty());
        // One matching keyword among misses is enough.
        assert_eq!(
            store
                .search_results(&["zzz".to_string(), "bin".to_string()])
                .len(),
            1
        );
    }

    #[test]
    fn test_unknown_hash_not_served() {
        let (store, _summary, _shared, _input) = store_with_file(b"abc");
        assert!(store.chunk_or_metafile(&[0xFF; 32]).is_none());
    }
}
