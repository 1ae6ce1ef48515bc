//! SQL connection participant.
//!
//! A [`ConnectionParticipant`] owns one native connection checked out of a
//! [`ConnectionPool`] for the duration of a transaction. Autocommit is
//! disabled on construction, so every statement run through the
//! participant stays pending until the coordinator commits or aborts it.
//!
//! The native handle lives in a [`PooledConnection`] guard: whichever path
//! ends the transaction (commit, rollback, an error in either, or a panic),
//! dropping the guard hands the handle back to the pool exactly once.

use crate::config::BlobColumn;
use crate::error::{CoreError, CoreResult};
use crate::participant::{ParticipantCore, Resource};
use crate::types::{ObjectId, ResourceKind, ResourceManagerId};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for native connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors raised by a native connection or its pool.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The database rejected a statement.
    #[error("SQL error: {0}")]
    Sql(String),

    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No connection could be handed out.
    #[error("connection unavailable: {0}")]
    Unavailable(String),
}

/// A native SQL connection, as far as the participants need it.
pub trait SqlConnection: Send {
    /// Enables or disables autocommit.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode cannot be changed.
    fn set_autocommit(&mut self, enabled: bool) -> ConnectionResult<()>;

    /// Commits the current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database refuses the commit.
    fn commit(&mut self) -> ConnectionResult<()>;

    /// Rolls back the current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&mut self) -> ConnectionResult<()>;

    /// Executes one statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn execute(&mut self, sql: &str) -> ConnectionResult<usize>;

    /// Sets the blob column of row `id` to `content` (`None` = NULL) and
    /// returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn update_blob(
        &mut self,
        column: &BlobColumn,
        id: ObjectId,
        content: Option<&[u8]>,
    ) -> ConnectionResult<usize>;

    /// Fetches the blob column of row `id`. `None` when the row is missing
    /// or the column is NULL.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn select_blob(&mut self, column: &BlobColumn, id: ObjectId) -> ConnectionResult<Option<Vec<u8>>>;

    /// Closes the native handle.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails; the handle is gone either way.
    fn close(self: Box<Self>) -> ConnectionResult<()>;
}

/// Source of native connections. Owns handles outside transactions.
pub trait ConnectionPool: Send + Sync {
    /// Name of the data source; part of the resource manager identity.
    fn name(&self) -> &str;

    /// Hands out a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be opened.
    fn checkout(&self) -> ConnectionResult<Box<dyn SqlConnection>>;

    /// Takes a connection back. The pool decides whether to close or keep
    /// it; the caller must not use it again.
    fn give_back(&self, conn: Box<dyn SqlConnection>);
}

/// A checked-out connection that returns itself to its pool on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn SqlConnection>>,
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Checks a connection out of `pool`.
    ///
    /// # Errors
    ///
    /// Returns the pool's error if checkout fails.
    pub fn checkout(pool: &Arc<dyn ConnectionPool>) -> ConnectionResult<Self> {
        let conn = pool.checkout()?;
        Ok(Self {
            conn: Some(conn),
            pool: Arc::clone(pool),
        })
    }

    /// Returns the pool this connection came from.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }
}

impl Deref for PooledConnection {
    type Target = dyn SqlConnection;

    fn deref(&self) -> &Self::Target {
        // Only emptied by drop.
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("pooled connection used after drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.as_mut(),
            None => unreachable!("pooled connection used after drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
            debug!(pool = self.pool.name(), "connection given back");
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .finish_non_exhaustive()
    }
}

/// Shared access to a transaction's connection.
///
/// Inline blob stores borrow the connection of the transaction they write
/// in. Once the owning participant commits or rolls back, the slot is empty
/// and every borrower sees [`BorrowedConnection::is_released`].
#[derive(Clone)]
pub struct BorrowedConnection {
    slot: Arc<Mutex<Option<PooledConnection>>>,
    resource_manager: ResourceManagerId,
}

impl BorrowedConnection {
    /// An empty slot, for stores that are only read outside a transaction.
    pub(crate) fn detached(resource_manager: ResourceManagerId) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            resource_manager,
        }
    }

    /// Runs `f` on the connection, or returns `None` once it was released.
    pub fn with<T>(&self, f: impl FnOnce(&mut dyn SqlConnection) -> T) -> Option<T> {
        let mut slot = self.slot.lock();
        slot.as_mut().map(|conn| f(&mut **conn))
    }

    /// Returns true once the owning participant gave the handle back.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Returns the resource manager of the owning participant.
    #[must_use]
    pub fn resource_manager(&self) -> &ResourceManagerId {
        &self.resource_manager
    }

    fn take(&self) -> Option<PooledConnection> {
        self.slot.lock().take()
    }
}

impl fmt::Debug for BorrowedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowedConnection")
            .field("resource_manager", &self.resource_manager)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Participant wrapping one native SQL connection.
#[derive(Debug)]
pub struct ConnectionParticipant {
    core: ParticipantCore,
    conn: BorrowedConnection,
}

impl ConnectionParticipant {
    /// Wraps a checked-out connection and disables its autocommit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Enlist`] if autocommit cannot be disabled; the
    /// connection is given back to its pool.
    pub fn new(mut conn: PooledConnection) -> CoreResult<Self> {
        let resource_manager =
            ResourceManagerId::new(ResourceKind::Connection, conn.pool().name());
        conn.set_autocommit(false).map_err(|e| {
            CoreError::enlist(format!("cannot disable autocommit on {resource_manager}: {e}"))
        })?;

        Ok(Self {
            core: ParticipantCore::new(resource_manager.clone(), None),
            conn: BorrowedConnection {
                slot: Arc::new(Mutex::new(Some(conn))),
                resource_manager,
            },
        })
    }

    /// Runs caller statements on the connection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotOpen`] if the participant is not open or its
    /// handle was already released.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut dyn SqlConnection) -> T) -> CoreResult<T> {
        self.core.ensure_open()?;
        self.conn.with(f).ok_or(CoreError::NotOpen {
            participant: self.core.id(),
        })
    }

    /// Returns a borrow of the connection for stores that write through it.
    #[must_use]
    pub fn borrow(&self) -> BorrowedConnection {
        self.conn.clone()
    }

    /// Returns true once the native handle was given back.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.conn.is_released()
    }

    /// Rolls back the connection's work; the participant protocol's abort.
    ///
    /// # Errors
    ///
    /// See [`crate::Participant::abort`].
    pub fn rollback(&mut self) -> CoreResult<()> {
        crate::participant::Participant::abort(self)
    }

    fn take_handle(&self) -> Option<PooledConnection> {
        self.conn.take()
    }
}

impl Resource for ConnectionParticipant {
    fn core(&self) -> &ParticipantCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ParticipantCore {
        &mut self.core
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.conn.is_released() {
            return Err(CoreError::invalid_operation(format!(
                "{} has no native handle left",
                self.core.id()
            )));
        }
        Ok(())
    }

    fn finish_commit(&mut self) -> CoreResult<()> {
        let rm = self.core.resource_manager().clone();
        let mut conn = self
            .take_handle()
            .ok_or_else(|| CoreError::commit_failed(&rm, "connection already released"))?;
        // The guard gives the handle back when it leaves this scope.
        conn.commit().map_err(|e| CoreError::commit_failed(&rm, e))
    }

    fn finish_abort(&mut self) -> CoreResult<()> {
        let rm = self.core.resource_manager().clone();
        let mut conn = self
            .take_handle()
            .ok_or_else(|| CoreError::rollback_failed(&rm, "connection already released"))?;
        conn.rollback().map_err(|e| CoreError::rollback_failed(&rm, e))
    }

    fn release_resource(&mut self) {
        if let Some(conn) = self.take_handle() {
            warn!(participant = %self.core.id(), "connection still held at release");
            drop(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::LocalCoordinator;
    use crate::participant::{Participant, ParticipantState, TxnHandle};
    use crate::types::TransactionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        given_back: AtomicUsize,
        autocommit_off: AtomicUsize,
    }

    struct FakeConn {
        counters: Arc<Counters>,
        fail_commit: bool,
    }

    impl SqlConnection for FakeConn {
        fn set_autocommit(&mut self, enabled: bool) -> ConnectionResult<()> {
            if !enabled {
                self.counters.autocommit_off.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn commit(&mut self) -> ConnectionResult<()> {
            self.counters.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(ConnectionError::Sql("disk I/O error".into()));
            }
            Ok(())
        }

        fn rollback(&mut self) -> ConnectionResult<()> {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn execute(&mut self, _sql: &str) -> ConnectionResult<usize> {
            Ok(1)
        }

        fn update_blob(
            &mut self,
            _column: &BlobColumn,
            _id: ObjectId,
            _content: Option<&[u8]>,
        ) -> ConnectionResult<usize> {
            Ok(1)
        }

        fn select_blob(
            &mut self,
            _column: &BlobColumn,
            _id: ObjectId,
        ) -> ConnectionResult<Option<Vec<u8>>> {
            Ok(None)
        }

        fn close(self: Box<Self>) -> ConnectionResult<()> {
            Ok(())
        }
    }

    struct FakePool {
        counters: Arc<Counters>,
        fail_commit: bool,
    }

    impl ConnectionPool for FakePool {
        fn name(&self) -> &str {
            "fake"
        }

        fn checkout(&self) -> ConnectionResult<Box<dyn SqlConnection>> {
            Ok(Box::new(FakeConn {
                counters: Arc::clone(&self.counters),
                fail_commit: self.fail_commit,
            }))
        }

        fn give_back(&self, _conn: Box<dyn SqlConnection>) {
            self.counters.given_back.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(fail_commit: bool) -> (Arc<Counters>, ConnectionParticipant, TxnHandle) {
        let counters = Arc::new(Counters::default());
        let pool: Arc<dyn ConnectionPool> = Arc::new(FakePool {
            counters: Arc::clone(&counters),
            fail_commit,
        });
        let conn = PooledConnection::checkout(&pool).unwrap();
        let participant = ConnectionParticipant::new(conn).unwrap();
        let txn = TxnHandle::new(
            TransactionId::generate(),
            Arc::new(LocalCoordinator::new()),
        );
        (counters, participant, txn)
    }

    #[test]
    fn construction_disables_autocommit() {
        let (counters, participant, _) = setup(false);
        assert_eq!(counters.autocommit_off.load(Ordering::SeqCst), 1);
        assert_eq!(participant.resource_manager().kind, ResourceKind::Connection);
        assert_eq!(participant.resource_manager().location, "fake");
    }

    #[test]
    fn commit_gives_handle_back_once() {
        let (counters, mut participant, txn) = setup(false);
        participant.open(&txn).unwrap();

        participant.commit().unwrap();
        assert_eq!(counters.commits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.given_back.load(Ordering::SeqCst), 1);
        assert!(participant.is_released());
    }

    #[test]
    fn failed_native_commit_still_gives_handle_back() {
        let (counters, mut participant, txn) = setup(true);
        participant.open(&txn).unwrap();

        let result = participant.commit();
        assert!(matches!(result, Err(CoreError::CommitFailed { .. })));
        assert_eq!(counters.given_back.load(Ordering::SeqCst), 1);
        assert_eq!(participant.state(), ParticipantState::Closed);
        assert!(txn.is_rollback_only());
    }

    #[test]
    fn rollback_gives_handle_back_once() {
        let (counters, mut participant, txn) = setup(false);
        participant.open(&txn).unwrap();

        participant.rollback().unwrap();
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(counters.given_back.load(Ordering::SeqCst), 1);
        assert!(matches!(participant.rollback(), Err(CoreError::NotOpen { .. })));
        assert_eq!(counters.given_back.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_connection_requires_open() {
        let (_, mut participant, txn) = setup(false);
        assert!(participant.with_connection(|c| c.execute("SELECT 1")).is_err());

        participant.open(&txn).unwrap();
        let rows = participant
            .with_connection(|c| c.execute("UPDATE T SET A = 1"))
            .unwrap()
            .unwrap();
        assert_eq!(rows, 1);

        participant.commit().unwrap();
        assert!(participant.with_connection(|c| c.execute("SELECT 1")).is_err());
    }

    #[test]
    fn released_wrapper_cannot_reopen() {
        let (_, mut participant, txn) = setup(false);
        participant.open(&txn).unwrap();
        participant.commit().unwrap();

        let next = TxnHandle::new(TransactionId::generate(), Arc::new(LocalCoordinator::new()));
        assert!(matches!(
            participant.open(&next),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn borrowers_see_release() {
        let (_, mut participant, txn) = setup(false);
        let borrowed = participant.borrow();
        participant.open(&txn).unwrap();
        assert!(borrowed.with(|c| c.execute("SELECT 1")).is_some());

        participant.commit().unwrap();
        assert!(borrowed.is_released());
        assert!(borrowed.with(|c| c.execute("SELECT 1")).is_none());
    }
}
