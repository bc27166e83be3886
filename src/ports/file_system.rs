use std::{path::Path, time::SystemTime};

use thiserror::Error;
use tokio::io::AsyncRead;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The path exists but is not a regular file
    #[error("Not a regular file: {0}")]
    NotAFile(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// An opened file, exclusively owned by one request.
///
/// Dropping it closes the underlying handle.
pub struct OpenedFile {
    pub size: u64,
    pub modified: SystemTime,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedFile")
            .field("size", &self.size)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// FileSystem defines the port (interface) static exports read through
pub trait FileSystem: Send + Sync + 'static {
    /// Whether `path` names an existing regular file
    fn is_file(&self, path: &Path) -> impl std::future::Future<Output = bool> + Send;

    /// Open `path` for streaming and read its size and modification time
    fn open(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = FileSystemResult<OpenedFile>> + Send;
}
