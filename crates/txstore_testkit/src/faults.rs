//! Fault injection for path stores.
//!
//! [`FailingStore`] wraps any [`PathStore`] and fails chosen calls. Rules
//! match an operation, optionally a path suffix, and the n-th matching call
//! (0-based). A rule fires once; later matching calls pass through.
//!
//! A failed `move_to` in the middle of a commit leaves the files exactly as
//! a crash at that point would, which is what the reconciliation tests
//! need.
//!
//! ```rust
//! use std::sync::Arc;
//! use txstore_storage::{InMemoryStore, PathStore};
//! use txstore_testkit::faults::{FailingStore, StoreOp};
//!
//! let store = FailingStore::new(Arc::new(InMemoryStore::new()));
//! store.fail(StoreOp::Create, 0);
//! assert!(store.create("a/1.tmp").is_err());
//! assert!(store.create("a/1.tmp").is_ok());
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;
use txstore_storage::{PathStore, StorageError, StorageResult, StoreReader, StoreWriter};

/// A path store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `exists`
    Exists,
    /// `create`
    Create,
    /// `delete`
    Delete,
    /// `move_to`, matched against the source path
    MoveTo,
    /// `open_read`
    OpenRead,
    /// `open_write`
    OpenWrite,
    /// `list`
    List,
}

#[derive(Debug)]
struct Rule {
    op: StoreOp,
    suffix: Option<String>,
    remaining: usize,
}

/// A path store that fails scripted calls.
pub struct FailingStore {
    inner: Arc<dyn PathStore>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(StoreOp, String)>>,
}

impl FailingStore {
    /// Wraps `inner` with no rules.
    pub fn new(inner: Arc<dyn PathStore>) -> Self {
        Self {
            inner,
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the `nth` call of `op`.
    pub fn fail(&self, op: StoreOp, nth: usize) {
        self.push(op, None, nth);
    }

    /// Fails the `nth` call of `op` whose path ends with `suffix`.
    pub fn fail_on_suffix(&self, op: StoreOp, suffix: &str, nth: usize) {
        self.push(op, Some(suffix.to_string()), nth);
    }

    /// Removes every pending rule.
    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    /// Returns every call made so far with its path, in order.
    pub fn calls(&self) -> Vec<(StoreOp, String)> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls of `op`.
    pub fn count(&self, op: StoreOp) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    fn push(&self, op: StoreOp, suffix: Option<String>, nth: usize) {
        self.rules.lock().push(Rule {
            op,
            suffix,
            remaining: nth,
        });
    }

    fn check(&self, op: StoreOp, path: &str) -> StorageResult<()> {
        self.calls.lock().push((op, path.to_string()));

        let mut rules = self.rules.lock();
        let matching = rules.iter_mut().enumerate().find(|(_, rule)| {
            rule.op == op && rule.suffix.as_deref().map_or(true, |s| path.ends_with(s))
        });
        let Some((index, rule)) = matching else {
            return Ok(());
        };
        if rule.remaining > 0 {
            rule.remaining -= 1;
            return Ok(());
        }
        rules.remove(index);
        Err(StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("injected {op:?} failure on {path}"),
        )))
    }
}

impl fmt::Debug for FailingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingStore")
            .field("inner", &self.inner)
            .field("rules", &self.rules.lock().len())
            .finish()
    }
}

impl PathStore for FailingStore {
    fn exists(&self, path: &str) -> StorageResult<bool> {
        self.check(StoreOp::Exists, path)?;
        self.inner.exists(path)
    }

    fn create(&self, path: &str) -> StorageResult<()> {
        self.check(StoreOp::Create, path)?;
        self.inner.create(path)
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        self.check(StoreOp::Delete, path)?;
        self.inner.delete(path)
    }

    fn move_to(&self, path: &str, new_path: &str) -> StorageResult<()> {
        self.check(StoreOp::MoveTo, path)?;
        self.inner.move_to(path, new_path)
    }

    fn open_read(&self, path: &str) -> StorageResult<StoreReader> {
        self.check(StoreOp::OpenRead, path)?;
        self.inner.open_read(path)
    }

    fn open_write(&self, path: &str) -> StorageResult<StoreWriter> {
        self.check(StoreOp::OpenWrite, path)?;
        self.inner.open_write(path)
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.check(StoreOp::List, dir)?;
        self.inner.list(dir)
    }
}
