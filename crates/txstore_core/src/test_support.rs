//! In-memory SQL fakes for unit tests.

use crate::config::BlobColumn;
use crate::connection::{ConnectionError, ConnectionPool, ConnectionResult, SqlConnection};
use crate::types::ObjectId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One blob table shared by every connection of a [`TablePool`].
///
/// Updates stay private to their connection until it commits.
#[derive(Default)]
pub(crate) struct Table {
    rows: Mutex<HashMap<u64, Option<Vec<u8>>>>,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub checkouts: AtomicUsize,
    pub given_back: AtomicUsize,
    pub fail_commit: AtomicBool,
}

impl Table {
    pub fn with_rows(ids: &[u64]) -> Arc<Self> {
        let table = Self::default();
        table.rows.lock().extend(ids.iter().map(|id| (*id, None)));
        Arc::new(table)
    }

    pub fn pool(self: &Arc<Self>) -> Arc<dyn ConnectionPool> {
        Arc::new(TablePool(Arc::clone(self)))
    }

    pub fn set(&self, id: u64, content: &[u8]) {
        self.rows.lock().insert(id, Some(content.to_vec()));
    }

    pub fn get(&self, id: u64) -> Option<Vec<u8>> {
        self.rows.lock().get(&id).cloned().flatten()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct TablePool(Arc<Table>);

impl ConnectionPool for TablePool {
    fn name(&self) -> &str {
        "table"
    }

    fn checkout(&self) -> ConnectionResult<Box<dyn SqlConnection>> {
        self.0.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TableConn {
            table: Arc::clone(&self.0),
            pending: HashMap::new(),
        }))
    }

    fn give_back(&self, _conn: Box<dyn SqlConnection>) {
        self.0.given_back.fetch_add(1, Ordering::SeqCst);
    }
}

struct TableConn {
    table: Arc<Table>,
    pending: HashMap<u64, Option<Vec<u8>>>,
}

impl SqlConnection for TableConn {
    fn set_autocommit(&mut self, _enabled: bool) -> ConnectionResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> ConnectionResult<()> {
        self.table.commits.fetch_add(1, Ordering::SeqCst);
        if self.table.fail_commit.load(Ordering::SeqCst) {
            self.pending.clear();
            return Err(ConnectionError::Sql("database is locked".into()));
        }
        self.table.rows.lock().extend(self.pending.drain());
        Ok(())
    }

    fn rollback(&mut self) -> ConnectionResult<()> {
        self.table.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.pending.clear();
        Ok(())
    }

    fn execute(&mut self, _sql: &str) -> ConnectionResult<usize> {
        Ok(0)
    }

    fn update_blob(
        &mut self,
        _column: &BlobColumn,
        id: ObjectId,
        content: Option<&[u8]>,
    ) -> ConnectionResult<usize> {
        if !self.table.rows.lock().contains_key(&id.as_u64()) {
            return Ok(0);
        }
        self.pending.insert(id.as_u64(), content.map(<[u8]>::to_vec));
        Ok(1)
    }

    fn select_blob(&mut self, _column: &BlobColumn, id: ObjectId) -> ConnectionResult<Option<Vec<u8>>> {
        match self.pending.get(&id.as_u64()) {
            Some(content) => Ok(content.clone()),
            None => Ok(self.table.get(id.as_u64())),
        }
    }

    fn close(self: Box<Self>) -> ConnectionResult<()> {
        Ok(())
    }
}
