//! # gossip-files
//!
//! Content-addressed file state for the gossip node:
//! - [`SharedFileStore`]: files this node serves, split into fixed-size
//!   chunks stored on disk under the hash of their bytes
//! - [`DownloadStore`]: per-origin downloading-file records driven by the
//!   download task, reassembled once every chunk arrived
//!
//! A metafile is the in-order concatenation of chunk hashes; its own hash
//! (the metahash) is the file's content-addressed identifier. Any node
//! serving a given hash answers with identical bytes.

mod download;
mod error;
mod shared;

pub use download::{DownloadStore, ReplyOutcome};
pub use error::{FileError, FileResult};
pub use shared::{SharedFileStore, SharedFileSummary};

/// Fixed chunk size files are split into.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Largest file the node will share.
pub const MAX_FILE_SIZE: usize = 2 * 1024 * 1024;

/// File name a chunk is stored under: hex of its hash plus this suffix.
pub(crate) const CHUNK_SUFFIX: &str = ".chunk";

/// File name a metafile is stored under.
pub(crate) const METAFILE_SUFFIX: &str = ".metafile";

/// True when any keyword is a substring of the file name.
pub(crate) fn name_matches(name: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|kw| name.contains(kw.as_str()))
}
