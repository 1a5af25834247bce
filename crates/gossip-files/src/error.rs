//! File sharing error types.

use thiserror::Error;

/// Errors raised by the file stores.
#[derive(Error, Debug)]
pub enum FileError {
    /// The path to share does not point at a regular file.
    #[error("Not a shareable file: {0}")]
    NotAFile(String),

    /// The file exceeds the sharing size limit.
    #[error("File too large: {size} bytes, max {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// The file is already being shared under this name.
    #[error("Already shared: {0}")]
    AlreadyShared(String),

    /// I/O error while reading or writing chunks.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for file operations.
pub type FileResult<T> = Result<T, FileError>;
