//! SQLite-backed connections via `rusqlite`.
//!
//! [`SqlitePool`] opens one native connection per checkout against a
//! database file and closes it on give-back. Databases are switched to WAL
//! journaling so a dedicated reader connection never blocks the writer's
//! commit.

use crate::config::BlobColumn;
use crate::connection::{ConnectionError, ConnectionPool, ConnectionResult, SqlConnection};
use crate::types::ObjectId;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection pool over one SQLite database file.
#[derive(Debug)]
pub struct SqlitePool {
    name: String,
    path: PathBuf,
    busy_timeout: Duration,
    open: AtomicUsize,
}

impl SqlitePool {
    /// Creates a pool for the database at `path`, creating the file and
    /// enabling WAL journaling.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path) -> ConnectionResult<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.close().map_err(|(_, e)| ConnectionError::from(e))?;

        Ok(Self {
            name: format!("sqlite:{}", path.display()),
            path: path.to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            open: AtomicUsize::new(0),
        })
    }

    /// Sets how long a statement waits on a locked database.
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Returns the number of connections currently checked out.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl ConnectionPool for SqlitePool {
    fn name(&self) -> &str {
        &self.name
    }

    fn checkout(&self) -> ConnectionResult<Box<dyn SqlConnection>> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SqliteConnection::new(conn)))
    }

    fn give_back(&self, conn: Box<dyn SqlConnection>) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = conn.close() {
            warn!(pool = %self.name, error = %e, "closing connection failed");
        }
    }
}

/// One native SQLite connection.
///
/// With autocommit disabled a transaction is started lazily before the
/// next statement, mirroring how JDBC-style drivers behave.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
    manual: bool,
}

impl SqliteConnection {
    /// Wraps an open rusqlite connection in autocommit mode.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            manual: false,
        }
    }

    fn ensure_txn(&mut self) -> ConnectionResult<()> {
        if self.manual && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn row_id(id: ObjectId) -> ConnectionResult<i64> {
        i64::try_from(id.as_u64())
            .map_err(|_| ConnectionError::Sql(format!("object id {id} exceeds i64")))
    }
}

impl SqlConnection for SqliteConnection {
    fn set_autocommit(&mut self, enabled: bool) -> ConnectionResult<()> {
        if enabled && !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        self.manual = !enabled;
        Ok(())
    }

    fn commit(&mut self) -> ConnectionResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
            debug!("sqlite commit");
        }
        Ok(())
    }

    fn rollback(&mut self) -> ConnectionResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            debug!("sqlite rollback");
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> ConnectionResult<usize> {
        self.ensure_txn()?;
        Ok(self.conn.execute(sql, [])?)
    }

    fn update_blob(
        &mut self,
        column: &BlobColumn,
        id: ObjectId,
        content: Option<&[u8]>,
    ) -> ConnectionResult<usize> {
        self.ensure_txn()?;
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            column.table, column.column, column.key_column
        );
        Ok(self.conn.execute(&sql, params![content, Self::row_id(id)?])?)
    }

    fn select_blob(&mut self, column: &BlobColumn, id: ObjectId) -> ConnectionResult<Option<Vec<u8>>> {
        self.ensure_txn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            column.column, column.table, column.key_column
        );
        let row: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(&sql, params![Self::row_id(id)?], |row| row.get(0))
            .optional()?;
        Ok(row.flatten())
    }

    fn close(self: Box<Self>) -> ConnectionResult<()> {
        self.conn.close().map_err(|(_, e)| ConnectionError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::open(&dir.path().join("main.db")).unwrap();
        let mut conn = pool.checkout().unwrap();
        conn.execute("CREATE TABLE T_DOC (ID INTEGER PRIMARY KEY, CONTENT BLOB)")
            .unwrap();
        conn.execute("INSERT INTO T_DOC (ID) VALUES (42)").unwrap();
        pool.give_back(conn);
        (dir, pool)
    }

    fn column() -> BlobColumn {
        BlobColumn::new("T_DOC", "CONTENT")
    }

    #[test]
    fn update_visible_after_commit_only() {
        let (_dir, pool) = setup();
        let mut writer = pool.checkout().unwrap();
        writer.set_autocommit(false).unwrap();
        writer
            .update_blob(&column(), ObjectId::new(42), Some(b"v1"))
            .unwrap();

        let mut reader = pool.checkout().unwrap();
        assert_eq!(reader.select_blob(&column(), ObjectId::new(42)).unwrap(), None);

        writer.commit().unwrap();
        assert_eq!(
            reader.select_blob(&column(), ObjectId::new(42)).unwrap(),
            Some(b"v1".to_vec())
        );

        pool.give_back(writer);
        pool.give_back(reader);
        assert_eq!(pool.open_connections(), 0);
    }

    #[test]
    fn rollback_discards_update() {
        let (_dir, pool) = setup();
        let mut conn = pool.checkout().unwrap();
        conn.set_autocommit(false).unwrap();
        conn.update_blob(&column(), ObjectId::new(42), Some(b"gone"))
            .unwrap();
        conn.rollback().unwrap();

        assert_eq!(conn.select_blob(&column(), ObjectId::new(42)).unwrap(), None);
        pool.give_back(conn);
    }

    #[test]
    fn missing_row_selects_none() {
        let (_dir, pool) = setup();
        let mut conn = pool.checkout().unwrap();
        assert_eq!(conn.select_blob(&column(), ObjectId::new(7)).unwrap(), None);
        assert_eq!(
            conn.update_blob(&column(), ObjectId::new(7), Some(b"x")).unwrap(),
            0
        );
        pool.give_back(conn);
    }
}
