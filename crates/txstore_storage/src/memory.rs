//! In-memory path store for testing.

use crate::backend::{FinishWrite, PathStore, StoreReader, StoreWriter};
use crate::error::{StorageError, StorageResult};
use crate::path::validate;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

type Files = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// An in-memory path store.
///
/// This backend keeps every file in a shared map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Directories are implicit: a file's parents exist as long as the file
/// does.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. Cloning
/// yields a handle onto the same files.
///
/// # Example
///
/// ```rust
/// use txstore_storage::{InMemoryStore, PathStore};
///
/// let store = InMemoryStore::with_files([("docs/1", b"v1".to_vec())]);
/// assert!(store.exists("docs/1").unwrap());
/// assert_eq!(store.contents("docs/1"), Some(b"v1".to_vec()));
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    files: Files,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with files.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_files<P: Into<String>>(files: impl IntoIterator<Item = (P, Vec<u8>)>) -> Self {
        let map = files.into_iter().map(|(p, d)| (p.into(), d)).collect();
        Self {
            files: Arc::new(RwLock::new(map)),
        }
    }

    /// Returns a copy of the file at `path`, if present.
    #[must_use]
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    /// Returns every path currently stored.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Removes every file.
    pub fn clear(&self) {
        self.files.write().clear();
    }
}

impl PathStore for InMemoryStore {
    fn exists(&self, path: &str) -> StorageResult<bool> {
        validate(path)?;
        Ok(self.files.read().contains_key(path))
    }

    fn create(&self, path: &str) -> StorageResult<()> {
        validate(path)?;
        self.files.write().insert(path.to_string(), Vec::new());
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        validate(path)?;
        match self.files.write().remove(path) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(path)),
        }
    }

    fn move_to(&self, path: &str, new_path: &str) -> StorageResult<()> {
        validate(path)?;
        validate(new_path)?;

        let mut files = self.files.write();
        if files.contains_key(new_path) {
            return Err(StorageError::AlreadyExists {
                path: new_path.to_string(),
            });
        }
        let data = files
            .remove(path)
            .ok_or_else(|| StorageError::not_found(path))?;
        files.insert(new_path.to_string(), data);
        Ok(())
    }

    fn open_read(&self, path: &str) -> StorageResult<StoreReader> {
        validate(path)?;
        let data = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn open_write(&self, path: &str) -> StorageResult<StoreWriter> {
        validate(path)?;
        self.files.write().insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter {
            files: Arc::clone(&self.files),
            path: path.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        validate(dir)?;
        let prefix = format!("{dir}/");
        Ok(self
            .files
            .read()
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}

/// Buffers writes and publishes them to the shared map on flush.
struct MemoryWriter {
    files: Files,
    path: String,
    buffer: Vec<u8>,
}

impl MemoryWriter {
    fn publish(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut files = self.files.write();
        files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(&self.buffer);
        self.buffer.clear();
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl FinishWrite for MemoryWriter {
    fn finish(mut self: Box<Self>) -> StorageResult<()> {
        self.publish();
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.publish();
    }
}
