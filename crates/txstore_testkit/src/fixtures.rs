//! Test fixtures and registry helpers.
//!
//! [`TestStores`] wires a [`StoreRegistry`] with two object types, one per
//! storage kind:
//!
//! - `document`, staged files under `blobs/`
//! - `note`, inline in `T_NOTE.BODY`, with rows 0 to 63 present

use crate::sql::ScriptedPool;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use txstore_core::{
    BlobColumn, BlobKey, Config, CoreResult, FileLayout, LocalCoordinator, ObjectId, ObjectType,
    StoreKind, StoreRegistry, TransactionContext,
};
use txstore_storage::{FileStore, InMemoryStore, PathStore};

/// Staged-file object type of the fixture.
pub const DOCUMENT: &str = "document";
/// Inline object type of the fixture.
pub const NOTE: &str = "note";
/// Layout root of the staged-file type.
pub const BLOB_ROOT: &str = "blobs";

/// Key of document `id`.
pub fn document(id: u64) -> BlobKey {
    BlobKey::new(
        ObjectType::new(DOCUMENT).expect("valid type name"),
        ObjectId::new(id),
    )
}

/// Key of note `id`.
pub fn note(id: u64) -> BlobKey {
    BlobKey::new(
        ObjectType::new(NOTE).expect("valid type name"),
        ObjectId::new(id),
    )
}

/// Layout of the `document` type.
pub fn document_layout() -> FileLayout {
    FileLayout::new(BLOB_ROOT)
}

/// A registry over scripted SQL and a path store, with cleanup.
pub struct TestStores {
    /// The registry.
    pub registry: Arc<StoreRegistry>,
    /// The coordinator, with history kept.
    pub coordinator: Arc<LocalCoordinator>,
    /// The SQL side.
    pub pool: ScriptedPool,
    /// The path store backing documents.
    pub files: Arc<dyn PathStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStores {
    /// Creates stores over an [`InMemoryStore`].
    pub fn memory() -> Self {
        Self::with_path_store(Arc::new(InMemoryStore::new()), Config::default())
    }

    /// Creates stores over a [`FileStore`] in a temporary directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        let mut stores = Self::with_path_store(Arc::new(store), Config::default());
        stores._temp_dir = Some(temp_dir);
        stores
    }

    /// Creates stores over `files` with `config`.
    pub fn with_path_store(files: Arc<dyn PathStore>, config: Config) -> Self {
        let pool = ScriptedPool::with_rows(0..64);
        let coordinator = Arc::new(LocalCoordinator::with_history());
        let registry = StoreRegistry::builder(coordinator.clone())
            .pool(pool.shared())
            .path_store(Arc::clone(&files))
            .register(
                ObjectType::new(DOCUMENT).expect("valid type name"),
                StoreKind::StagedFile(document_layout()),
            )
            .register(
                ObjectType::new(NOTE).expect("valid type name"),
                StoreKind::Inline(BlobColumn::new("T_NOTE", "BODY")),
            )
            .config(config)
            .build()
            .expect("Failed to build registry");
        Self {
            registry,
            coordinator,
            pool,
            files,
            _temp_dir: None,
        }
    }

    /// Returns the temporary directory, if on disk.
    pub fn dir(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Begins a transaction.
    pub fn begin(&self) -> TransactionContext {
        TransactionContext::begin(&self.registry)
    }

    /// Writes `content` to `key` in its own committed transaction.
    pub fn commit_write(&self, key: &BlobKey, content: &[u8]) -> CoreResult<()> {
        let mut ctx = self.begin();
        ctx.blob_store(key)?.write(&mut &content[..], None)?;
        ctx.commit()
    }

    /// Deletes `key` in its own committed transaction.
    pub fn commit_delete(&self, key: &BlobKey) -> CoreResult<()> {
        let mut ctx = self.begin();
        ctx.blob_store(key)?.delete()?;
        ctx.commit()
    }

    /// Reads committed content of `key`, `None` if not readable.
    pub fn read(&self, key: &BlobKey) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        self.registry.read(key, &mut out).ok().map(|_| out)
    }

    /// Reads the raw file at `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        self.files.open_read(path).ok()?.read_to_end(&mut out).ok()?;
        Some(out)
    }

    /// Lists every file under the blob root.
    pub fn file_paths(&self) -> Vec<String> {
        self.files.list(BLOB_ROOT).expect("Failed to list blob root")
    }
}
