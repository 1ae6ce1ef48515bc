//! Scripted SQL connections.
//!
//! [`ScriptedPool`] hands out connections over one shared in-memory blob
//! table. Updates stay private to their connection until it commits, which
//! is enough isolation to observe commit and rollback. Every native call is
//! counted in [`SqlStats`], and individual calls can be told to fail.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use txstore_core::{
    BlobColumn, ConnectionError, ConnectionPool, ConnectionResult, ObjectId, SqlConnection,
};

/// Counters of native calls made through a [`ScriptedPool`].
#[derive(Debug, Default)]
pub struct SqlStats {
    /// Connections handed out.
    pub checkouts: AtomicUsize,
    /// Connections given back.
    pub given_back: AtomicUsize,
    /// Native commits attempted.
    pub commits: AtomicUsize,
    /// Native rollbacks.
    pub rollbacks: AtomicUsize,
    /// Calls disabling autocommit.
    pub autocommit_off: AtomicUsize,
    /// Statements run through `execute`.
    pub statements: AtomicUsize,
}

impl SqlStats {
    /// Reads one counter.
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Returns the number of connections checked out and not given back.
    pub fn outstanding(&self) -> usize {
        Self::get(&self.checkouts) - Self::get(&self.given_back)
    }
}

#[derive(Debug, Default)]
struct Faults {
    checkout: AtomicBool,
    autocommit: AtomicBool,
    commit: AtomicBool,
    rollback: AtomicBool,
}

#[derive(Debug, Default)]
struct Shared {
    rows: Mutex<HashMap<u64, Option<Vec<u8>>>>,
    statements: Mutex<Vec<String>>,
    stats: SqlStats,
    faults: Faults,
}

/// Pool over one in-memory blob table.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPool {
    shared: Arc<Shared>,
}

impl ScriptedPool {
    /// Creates a pool whose table has an empty row for each of `ids`.
    pub fn with_rows(ids: impl IntoIterator<Item = u64>) -> Self {
        let pool = Self::default();
        pool.shared
            .rows
            .lock()
            .extend(ids.into_iter().map(|id| (id, None)));
        pool
    }

    /// Returns the pool as the trait object participants consume.
    pub fn shared(&self) -> Arc<dyn ConnectionPool> {
        Arc::new(self.clone())
    }

    /// Returns the call counters.
    pub fn stats(&self) -> &SqlStats {
        &self.shared.stats
    }

    /// Sets committed content of row `id`, creating the row.
    pub fn set(&self, id: u64, content: &[u8]) {
        self.shared.rows.lock().insert(id, Some(content.to_vec()));
    }

    /// Returns committed content of row `id`.
    pub fn get(&self, id: u64) -> Option<Vec<u8>> {
        self.shared.rows.lock().get(&id).cloned().flatten()
    }

    /// Returns every statement passed to `execute`, in order.
    pub fn statements(&self) -> Vec<String> {
        self.shared.statements.lock().clone()
    }

    /// Makes the next checkout fail.
    pub fn fail_next_checkout(&self) {
        self.shared.faults.checkout.store(true, Ordering::SeqCst);
    }

    /// Makes the next attempt to disable autocommit fail.
    pub fn fail_next_autocommit(&self) {
        self.shared.faults.autocommit.store(true, Ordering::SeqCst);
    }

    /// Makes the next native commit fail. The connection's pending changes
    /// are lost, as with a real failed commit.
    pub fn fail_next_commit(&self) {
        self.shared.faults.commit.store(true, Ordering::SeqCst);
    }

    /// Makes the next native rollback fail.
    pub fn fail_next_rollback(&self) {
        self.shared.faults.rollback.store(true, Ordering::SeqCst);
    }
}

fn tripped(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::SeqCst)
}

impl ConnectionPool for ScriptedPool {
    fn name(&self) -> &str {
        "scripted"
    }

    fn checkout(&self) -> ConnectionResult<Box<dyn SqlConnection>> {
        if tripped(&self.shared.faults.checkout) {
            return Err(ConnectionError::Unavailable("scripted checkout failure".into()));
        }
        self.shared.stats.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            shared: Arc::clone(&self.shared),
            pending: HashMap::new(),
        }))
    }

    fn give_back(&self, _conn: Box<dyn SqlConnection>) {
        self.shared.stats.given_back.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connection handed out by [`ScriptedPool`].
#[derive(Debug)]
pub struct ScriptedConnection {
    shared: Arc<Shared>,
    pending: HashMap<u64, Option<Vec<u8>>>,
}

impl SqlConnection for ScriptedConnection {
    fn set_autocommit(&mut self, enabled: bool) -> ConnectionResult<()> {
        if !enabled {
            if tripped(&self.shared.faults.autocommit) {
                return Err(ConnectionError::Sql("scripted autocommit failure".into()));
            }
            self.shared.stats.autocommit_off.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn commit(&mut self) -> ConnectionResult<()> {
        self.shared.stats.commits.fetch_add(1, Ordering::SeqCst);
        if tripped(&self.shared.faults.commit) {
            self.pending.clear();
            return Err(ConnectionError::Sql("scripted commit failure".into()));
        }
        self.shared.rows.lock().extend(self.pending.drain());
        Ok(())
    }

    fn rollback(&mut self) -> ConnectionResult<()> {
        self.shared.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.pending.clear();
        if tripped(&self.shared.faults.rollback) {
            return Err(ConnectionError::Sql("scripted rollback failure".into()));
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> ConnectionResult<usize> {
        self.shared.stats.statements.fetch_add(1, Ordering::SeqCst);
        self.shared.statements.lock().push(sql.to_string());
        Ok(1)
    }

    fn update_blob(
        &mut self,
        _column: &BlobColumn,
        id: ObjectId,
        content: Option<&[u8]>,
    ) -> ConnectionResult<usize> {
        let exists = self.pending.contains_key(&id.as_u64())
            || self.shared.rows.lock().contains_key(&id.as_u64());
        if !exists {
            return Ok(0);
        }
        self.pending
            .insert(id.as_u64(), content.map(<[u8]>::to_vec));
        Ok(1)
    }

    fn select_blob(&mut self, _column: &BlobColumn, id: ObjectId) -> ConnectionResult<Option<Vec<u8>>> {
        match self.pending.get(&id.as_u64()) {
            Some(content) => Ok(content.clone()),
            None => Ok(self.shared.rows.lock().get(&id.as_u64()).cloned().flatten()),
        }
    }

    fn close(self: Box<Self>) -> ConnectionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column() -> BlobColumn {
        BlobColumn::new("T_DOC", "CONTENT")
    }

    #[test]
    fn pending_until_commit() {
        let pool = ScriptedPool::with_rows([1]);
        let mut conn = pool.checkout().unwrap();

        conn.update_blob(&column(), ObjectId::new(1), Some(b"x")).unwrap();
        assert_eq!(pool.get(1), None);
        conn.commit().unwrap();
        assert_eq!(pool.get(1), Some(b"x".to_vec()));
        pool.give_back(conn);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn scripted_commit_failure_is_one_shot() {
        let pool = ScriptedPool::with_rows([1]);
        pool.fail_next_commit();
        let mut conn = pool.checkout().unwrap();

        conn.update_blob(&column(), ObjectId::new(1), Some(b"x")).unwrap();
        assert!(conn.commit().is_err());
        assert!(conn.commit().is_ok());
        assert_eq!(pool.get(1), None);
        assert_eq!(SqlStats::get(&pool.stats().commits), 2);
    }

    #[test]
    fn missing_row_updates_nothing() {
        let pool = ScriptedPool::default();
        let mut conn = pool.checkout().unwrap();
        assert_eq!(
            conn.update_blob(&column(), ObjectId::new(9), Some(b"x")).unwrap(),
            0
        );
    }
}
