//! Per-origin downloading-file state.
//!
//! A download starts with only the target metahash. The first verified reply
//! must be the metafile; it is parsed into the ordered chunk-hash slice and
//! the missing set. Each further verified reply removes one chunk from the
//! missing set. When it empties, the file is reassembled in metafile order.
//!
//! Chunks in flight live under `<downloads>/.chunks/<filename>/`, keyed by
//! the hash of their bytes like shared chunks, so a downloading file can
//! already serve the chunks it holds.

use crate::error::FileResult;
use crate::{name_matches, CHUNK_SUFFIX, METAFILE_SUFFIX};
use gossip_proto::{sha256, DataReply, Hash32, SearchResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// How a data reply advanced a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// All chunks arrived; the file was reassembled on disk.
    Finished,
    /// The reply was accepted, more chunks are missing.
    Progress,
    /// The reply did not advance state (bad hash, unexpected chunk, no such
    /// download). The caller re-requests the same hash.
    Rejected,
}

struct DownloadingFile {
    name: String,
    meta_hash: Hash32,
    metafile: Option<Vec<u8>>,
    /// Chunk hashes in file order, parsed from the metafile.
    chunk_order: Vec<Hash32>,
    chunk_set: HashSet<Hash32>,
    missing: HashSet<Hash32>,
}

/// Store of in-flight downloads, at most one per origin.
///
/// Finished downloads move out of the per-origin slot (freeing the origin
/// for another download) but keep serving their chunks and answering
/// searches, like shared files do.
pub struct DownloadStore {
    base: PathBuf,
    files: Mutex<HashMap<String, DownloadingFile>>,
    completed: Mutex<Vec<DownloadingFile>>,
}

impl DownloadStore {
    /// Create a store rooted at the downloads directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            files: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    fn chunks_dir(&self, name: &str) -> PathBuf {
        self.base.join(".chunks").join(name)
    }

    /// Register a download from an origin. Returns false when a download
    /// from that origin is already in progress.
    pub fn start(&self, origin: &str, name: &str, meta_hash: Hash32) -> bool {
        let mut files = self.files.lock();
        if files.contains_key(origin) {
            return false;
        }
        files.insert(
            origin.to_string(),
            DownloadingFile {
                name: name.to_string(),
                meta_hash,
                metafile: None,
                chunk_order: Vec::new(),
                chunk_set: HashSet::new(),
                missing: HashSet::new(),
            },
        );
        true
    }

    /// Is a download from this origin in progress?
    pub fn is_downloading(&self, origin: &str) -> bool {
        self.files.lock().contains_key(origin)
    }

    /// Drop a download record (retries exhausted or finished).
    pub fn drop_download(&self, origin: &str) {
        self.files.lock().remove(origin);
    }

    /// Feed a data reply into the download from `origin`.
    pub fn process_reply(&self, origin: &str, reply: &DataReply) -> ReplyOutcome {
        let mut files = self.files.lock();
        let Some(file) = files.get_mut(origin) else {
            warn!(origin = %origin, "Data reply for unknown download");
            return ReplyOutcome::Rejected;
        };

        if sha256(&reply.data) != reply.hash {
            warn!(origin = %origin, "Data reply failed hash verification");
            return ReplyOutcome::Rejected;
        }

        if file.metafile.is_none() {
            let outcome = match Self::accept_metafile(&self.base, file, reply) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(origin = %origin, error = %e, "Failed to persist metafile");
                    ReplyOutcome::Rejected
                }
            };
            if outcome == ReplyOutcome::Finished {
                let done = files.remove(origin).expect("record present");
                self.completed.lock().push(done);
            }
            return outcome;
        }

        if !file.missing.contains(&reply.hash) {
            warn!(
                origin = %origin,
                hash = %hex::encode(reply.hash),
                "Chunk not expected (not in metafile or already held)"
            );
            return ReplyOutcome::Rejected;
        }

        let chunk_path = self
            .chunks_dir(&file.name)
            .join(format!("{}{}", hex::encode(reply.hash), CHUNK_SUFFIX));
        if let Err(e) = fs::write(&chunk_path, &reply.data) {
            warn!(path = %chunk_path.display(), error = %e, "Failed to write chunk");
            return ReplyOutcome::Rejected;
        }
        file.missing.remove(&reply.hash);

        info!(
            name = %file.name,
            origin = %origin,
            received = file.chunk_order.len() - file.missing.len(),
            total = file.chunk_order.len(),
            "Chunk downloaded"
        );

        if file.missing.is_empty() {
            match self.assemble(file) {
                Ok(()) => {
                    let done = files.remove(origin).expect("record present");
                    self.completed.lock().push(done);
                    ReplyOutcome::Finished
                }
                Err(e) => {
                    warn!(name = %file.name, error = %e, "Failed to assemble file");
                    ReplyOutcome::Rejected
                }
            }
        } else {
            ReplyOutcome::Progress
        }
    }

    fn accept_metafile(
        base: &std::path::Path,
        file: &mut DownloadingFile,
        reply: &DataReply,
    ) -> FileResult<ReplyOutcome> {
        if reply.hash != file.meta_hash || reply.data.len() % 32 != 0 {
            warn!(
                expected = %hex::encode(file.meta_hash),
                got = %hex::encode(reply.hash),
                "Reply is not the awaited metafile"
            );
            return Ok(ReplyOutcome::Rejected);
        }

        for raw in reply.data.chunks(32) {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(raw);
            file.chunk_order.push(hash);
            file.chunk_set.insert(hash);
            file.missing.insert(hash);
        }
        file.metafile = Some(reply.data.clone());

        let dir = base.join(".chunks").join(&file.name);
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{}{}", hex::encode(file.meta_hash), METAFILE_SUFFIX)),
            &reply.data,
        )?;

        info!(
            name = %file.name,
            chunks = file.chunk_order.len(),
            "Metafile received"
        );

        if file.missing.is_empty() {
            // Zero-chunk file: nothing left to fetch.
            fs::create_dir_all(base)?;
            fs::write(base.join(&file.name), [])?;
            return Ok(ReplyOutcome::Finished);
        }
        Ok(ReplyOutcome::Progress)
    }

    fn assemble(&self, file: &DownloadingFile) -> FileResult<()> {
        let dir = self.chunks_dir(&file.name);
        let mut bytes = Vec::new();
        for hash in &file.chunk_order {
            let chunk = fs::read(dir.join(format!("{}{}", hex::encode(hash), CHUNK_SUFFIX)))?;
            bytes.extend_from_slice(&chunk);
        }
        fs::create_dir_all(&self.base)?;
        fs::write(self.base.join(&file.name), &bytes)?;
        info!(name = %file.name, size = bytes.len(), "Download reassembled");
        Ok(())
    }

    /// Next chunk hash to request, any still-missing one.
    pub fn next_request_hash(&self, origin: &str) -> Option<Hash32> {
        let files = self.files.lock();
        files
            .get(origin)
            .and_then(|file| file.missing.iter().next().copied())
    }

    /// Serve bytes this download already holds: the metafile or a chunk
    /// that has been verified and persisted. Finished downloads keep
    /// serving.
    pub fn chunk_or_metafile(&self, hash: &Hash32) -> Option<Vec<u8>> {
        let files = self.files.lock();
        let completed = self.completed.lock();
        for file in files.values().chain(completed.iter()) {
            if file.meta_hash == *hash {
                if let Some(metafile) = &file.metafile {
                    return Some(metafile.clone());
                }
                continue;
            }
            if file.chunk_set.contains(hash) && !file.missing.contains(hash) {
                let path = self
                    .chunks_dir(&file.name)
                    .join(format!("{}{}", hex::encode(hash), CHUNK_SUFFIX));
                match fs::read(&path) {
                    Ok(bytes) => return Some(bytes),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Downloaded chunk unreadable");
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Search results over in-flight and finished downloads: the chunk map
    /// lists the 1-based indices of chunks already held.
    pub fn search_results(&self, keywords: &[String]) -> Vec<SearchResult> {
        let files = self.files.lock();
        let completed = self.completed.lock();
        files
            .values()
            .chain(completed.iter())
            .filter(|file| file.metafile.is_some() && name_matches(&file.name, keywords))
            .map(|file| {
                let chunk_map: Vec<u64> = file
                    .chunk_order
                    .iter()
                    .enumerate()
                    .filter(|(_, hash)| !file.missing.contains(*hash))
                    .map(|(i, _)| i as u64 + 1)
                    .collect();
                SearchResult {
                    file_name: file.name.clone(),
                    metafile_hash: file.meta_hash,
                    chunk_map,
                    chunk_count: file.chunk_order.len() as u64,
                }
            })
            .collect()
    }
}
