use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::ports::file_system::{
    FileReader, FileSystem, FileSystemError, FileSystemResult, OpenFuture, ResolveFuture,
    ResolvedFile,
};

const INDEX_FILE: &str = "index.html";

/// A file system implementation backed by `tokio::fs`
#[derive(Debug, Default, Clone)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    async fn resolve_path(path: PathBuf) -> FileSystemResult<ResolvedFile> {
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileSystemError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let (path, metadata) = if metadata.is_dir() {
            let index = path.join(INDEX_FILE);
            match fs::metadata(&index).await {
                Ok(metadata) => (index, metadata),
                Err(_) => return Err(FileSystemError::NotFound(index)),
            }
        } else {
            (path, metadata)
        };

        if !metadata.is_file() {
            return Err(FileSystemError::NotFound(path));
        }

        Ok(ResolvedFile {
            size: metadata.len(),
            path,
        })
    }

    async fn open_window(file: &ResolvedFile, start: u64, end: u64) -> FileSystemResult<FileReader> {
        let mut handle = File::open(&file.path).await?;
        if start > 0 {
            handle.seek(SeekFrom::Start(start)).await?;
        }
        Ok(Box::new(handle.take(end.saturating_sub(start))))
    }
}

impl FileSystem for TokioFileSystem {
    fn resolve<'a>(&'a self, path: PathBuf) -> ResolveFuture<'a> {
        Box::pin(Self::resolve_path(path))
    }

    fn open<'a>(&'a self, file: &'a ResolvedFile, start: u64, end: u64) -> OpenFuture<'a> {
        Box::pin(Self::open_window(file, start, end))
    }
}
