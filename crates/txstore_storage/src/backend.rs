//! Path-store backend trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::io::{Read, Write};

/// Stream returned by [`PathStore::open_read`].
pub type StoreReader = Box<dyn Read + Send>;

/// Stream returned by [`PathStore::open_write`].
pub type StoreWriter = Box<dyn FinishWrite>;

/// A write stream whose completion can fail.
///
/// Dropping a writer without calling [`FinishWrite::finish`] keeps whatever
/// was written so far, exactly like an unsynced file would; errors from
/// the final flush are only observable through `finish`.
pub trait FinishWrite: Write + Send {
    /// Flushes buffered bytes and makes them durable according to the
    /// backend's policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush or sync fails.
    fn finish(self: Box<Self>) -> StorageResult<()>;
}

/// A path-addressable store of opaque files.
///
/// Paths are relative and `/`-separated (see [`crate::validate`]). The store
/// knows nothing about the suffix convention the blob store layers on top;
/// it only moves bytes between names.
///
/// # Invariants
///
/// - `move_to` never overwrites: it fails if the target exists
/// - `create` and `open_write` create missing parent directories
/// - `open_read` on a missing path fails with a not-found error
/// - Backends must be `Send + Sync` so one instance serves many transactions
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait PathStore: Send + Sync + fmt::Debug {
    /// Returns true if a file exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the check itself fails.
    fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Creates an empty file at `path`, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directories cannot be
    /// created.
    fn create(&self, path: &str) -> StorageResult<()>;

    /// Removes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if nothing exists at `path`, or an I/O
    /// error if removal fails.
    fn delete(&self, path: &str) -> StorageResult<()>;

    /// Renames `path` to `new_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is missing, `new_path` already exists, or
    /// the rename fails.
    fn move_to(&self, path: &str, new_path: &str) -> StorageResult<()>;

    /// Opens `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if nothing exists at `path`.
    fn open_read(&self, path: &str) -> StorageResult<StoreReader>;

    /// Opens `path` for writing, truncating existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    fn open_write(&self, path: &str) -> StorageResult<StoreWriter>;

    /// Lists every file below directory `dir`, recursively, as full
    /// relative paths in lexical order.
    ///
    /// A missing directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list(&self, dir: &str) -> StorageResult<Vec<String>>;
}
