use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Nothing servable at the path (missing file, or a directory without index)
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// A regular file ready to be opened, after index fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Reader limited to the requested byte window.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = FileSystemResult<ResolvedFile>> + Send + 'a>>;

pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = FileSystemResult<FileReader>> + Send + 'a>>;

/// FileSystem defines the port (interface) for reading static files
pub trait FileSystem: Send + Sync + 'static {
    /// Resolve `path` to a regular file. Directories resolve to their
    /// `index.html`; anything else that is not a file is `NotFound`.
    fn resolve<'a>(&'a self, path: PathBuf) -> ResolveFuture<'a>;

    /// Open `file` positioned at `start`, yielding at most `end - start` bytes.
    fn open<'a>(&'a self, file: &'a ResolvedFile, start: u64, end: u64) -> OpenFuture<'a>;
}
