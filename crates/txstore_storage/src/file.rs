//! File-based path store for persistent storage.

use crate::backend::{FinishWrite, PathStore, StoreReader, StoreWriter};
use crate::error::{StorageError, StorageResult};
use crate::path::validate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A path store rooted at a local directory.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `FinishWrite::finish` flushes buffered bytes to the OS
/// - with `sync_on_close` enabled, `finish` also calls `File::sync_all()`
///   and renames fsync the parent directory
///
/// # Thread Safety
///
/// This backend holds no open handles and can be shared across threads.
/// Callers are responsible for not racing on the same path.
///
/// # Example
///
/// ```no_run
/// use txstore_storage::{FileStore, PathStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("blobs")).unwrap().sync_on_close(true);
/// store.create("documents/1.tmp").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    sync_on_close: bool,
}

impl FileStore {
    /// Opens a file store rooted at `root`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `root` exists
    /// but is not a directory.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("store root is not a directory: {}", root.display()),
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            sync_on_close: false,
        })
    }

    /// Sets whether finished writes and renames are synced to disk.
    #[must_use]
    pub fn sync_on_close(mut self, value: bool) -> Self {
        self.sync_on_close = value;
        self
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        validate(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, s| acc.join(s)))
    }

    fn ensure_parent(full: &Path) -> StorageResult<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn sync_dir(&self, full: &Path) -> StorageResult<()> {
        if self.sync_on_close {
            sync_parent(full)?;
        }
        Ok(())
    }

    fn map_missing(err: io::Error, path: &str) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::not_found(path)
        } else {
            StorageError::Io(err)
        }
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<String>) -> StorageResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_files(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                let segments: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(segments.join("/"));
            }
        }
        Ok(())
    }
}

impl PathStore for FileStore {
    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn create(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        File::create(&full)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|e| Self::map_missing(e, path))?;
        debug!(path, "removed file");
        self.sync_dir(&full)
    }

    fn move_to(&self, path: &str, new_path: &str) -> StorageResult<()> {
        let from = self.resolve(path)?;
        let to = self.resolve(new_path)?;

        if to.exists() {
            return Err(StorageError::AlreadyExists {
                path: new_path.to_string(),
            });
        }
        if !from.is_file() {
            return Err(StorageError::not_found(path));
        }

        Self::ensure_parent(&to)?;
        fs::rename(&from, &to)?;
        debug!(from = path, to = new_path, "renamed file");
        self.sync_dir(&to)
    }

    fn open_read(&self, path: &str) -> StorageResult<StoreReader> {
        let full = self.resolve(path)?;
        let file = File::open(&full).map_err(|e| Self::map_missing(e, path))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_write(&self, path: &str) -> StorageResult<StoreWriter> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)?;
        Ok(Box::new(FileWriter {
            inner: BufWriter::new(file),
            sync: self.sync_on_close,
        }))
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        let full = self.resolve(dir)?;
        if !full.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        self.collect_files(&full, &mut out)?;
        out.sort();
        Ok(out)
    }
}

#[cfg(unix)]
fn sync_parent(full: &Path) -> io::Result<()> {
    match full.parent() {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

// Directory handles cannot be synced portably outside unix.
#[cfg(not(unix))]
fn sync_parent(_full: &Path) -> io::Result<()> {
    Ok(())
}

struct FileWriter {
    inner: BufWriter<File>,
    sync: bool,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for FileWriter {
    fn finish(self: Box<Self>) -> StorageResult<()> {
        let sync = self.sync;
        let file = self.inner.into_inner().map_err(|e| e.into_error())?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }
}
