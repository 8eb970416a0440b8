//! On-disk file storage for GET and POST.
//!
//! Request paths are joined onto a root directory as-is. There is no
//! traversal protection and no locking: a GET racing a POST on the same
//! path may observe a partially written file.

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Storage errors
#[derive(Debug)]
pub enum StorageError {
    /// The target's parent directory does not exist
    MissingParent(PathBuf),
    /// Any other filesystem failure
    Io(PathBuf, io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::MissingParent(path) => {
                write!(f, "Parent directory of '{}' does not exist", path.display())
            }
            StorageError::Io(path, e) => write!(f, "I/O error on '{}': {}", path.display(), e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(_, e) => Some(e),
            StorageError::MissingParent(_) => None,
        }
    }
}

/// Files addressed relative to a root directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(FileStore { root: root.into() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location on disk for a request path
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Read a whole file. Returns `None` if the path is not a regular file.
    pub async fn read(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        let target = self.resolve(path);

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                trace!(path = %target.display(), "Not a regular file");
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(target, e)),
        }

        match tokio::fs::read(&target).await {
            Ok(contents) => {
                debug!(path = %target.display(), bytes = contents.len(), "Read file");
                Ok(Some(Bytes::from(contents)))
            }
            // Removed between the metadata check and the read
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(target, e)),
        }
    }

    /// Create or overwrite a file. Missing parent directories are not created.
    pub async fn write(&self, path: &str, contents: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve(path);

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !tokio::fs::metadata(parent).await.is_ok_and(|m| m.is_dir()) {
                return Err(StorageError::MissingParent(target));
            }
        }

        match tokio::fs::write(&target, contents).await {
            Ok(()) => {
                debug!(path = %target.display(), bytes = contents.len(), "Wrote file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::MissingParent(target))
            }
            Err(e) => Err(StorageError::Io(target, e)),
        }
    }
}

/// Fresh, empty directory for a test
#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    let dir = std::env::temp_dir().join(format!(
        "filebeam-{}-{}-{}",
        name,
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let store = FileStore::new(scratch_dir("store-roundtrip"));

        store.write("notes.txt", b"first draft").await.unwrap();
        assert_eq!(
            store.read("notes.txt").await.unwrap().as_deref(),
            Some(&b"first draft"[..])
        );

        // Overwrite replaces, never appends
        store.write("notes.txt", b"v2").await.unwrap();
        assert_eq!(
            store.read("notes.txt").await.unwrap().as_deref(),
            Some(&b"v2"[..])
        );
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = FileStore::new(scratch_dir("store-missing"));
        assert!(store.read("nope.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let root = scratch_dir("store-dir");
        std::fs::create_dir(root.join("sub")).unwrap();
        let store = FileStore::new(root);

        assert!(store.read("sub").await.unwrap().is_none());
        assert!(store.read("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_into_existing_subdirectory() {
        let root = scratch_dir("store-subdir");
        std::fs::create_dir(root.join("images")).unwrap();
        let store = FileStore::new(root.clone());

        store.write("images/logo.png", b"\x89PNG").await.unwrap();
        assert_eq!(std::fs::read(root.join("images/logo.png")).unwrap(), b"\x89PNG");
    }

    #[tokio::test]
    async fn test_write_missing_parent() {
        let root = scratch_dir("store-noparent");
        let store = FileStore::new(root.clone());

        let err = store.write("missing/dir/file.txt", b"data").await.unwrap_err();
        assert!(matches!(err, StorageError::MissingParent(_)));
        assert!(!root.join("missing").exists());
    }

    #[tokio::test]
    async fn test_write_onto_directory_fails() {
        let root = scratch_dir("store-ontodir");
        std::fs::create_dir(root.join("taken")).unwrap();
        let store = FileStore::new(root);

        let err = store.write("taken", b"data").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_, _)));
    }
}
