//! The enlist/commit/abort state machine shared by every participant.
//!
//! Concrete participants implement [`Resource`] (their finalization work
//! and release hook); the blanket [`Participant`] implementation wraps that
//! work in the protocol:
//!
//! ```text
//!            open (enlist)
//!   Closed ───────────────► Open
//!     ▲                      │
//!     └──── commit / abort ──┘   finalize → report → release → Closed
//! ```

use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::types::{
    BlobKey, Outcome, ParticipantId, ParticipantInfo, ResourceManagerId, TransactionId, Vote,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    /// Not enlisted in any transaction.
    Closed,
    /// Enlisted and accepting work.
    Open,
}

struct TxnShared {
    id: TransactionId,
    coordinator: Arc<dyn Coordinator>,
    rollback_only: AtomicBool,
    live: Mutex<Vec<ParticipantId>>,
}

/// A participant's handle on the ambient transaction.
///
/// Cloning is cheap; every clone refers to the same transaction. The handle
/// carries the rollback-only flag and the registry of participants that are
/// enlisted but not yet released.
#[derive(Clone)]
pub struct TxnHandle {
    inner: Arc<TxnShared>,
}

impl TxnHandle {
    /// Creates a handle for a new transaction driven by `coordinator`.
    #[must_use]
    pub fn new(id: TransactionId, coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            inner: Arc::new(TxnShared {
                id,
                coordinator,
                rollback_only: AtomicBool::new(false),
                live: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Returns the coordinator driving this transaction.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.inner.coordinator
    }

    /// Marks the whole transaction as rolled back.
    pub fn set_rollback_only(&self) {
        if !self.inner.rollback_only.swap(true, Ordering::SeqCst) {
            debug!(txn = %self.inner.id, "transaction marked rollback-only");
        }
    }

    /// Returns true if the transaction can no longer commit.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.inner.rollback_only.load(Ordering::SeqCst)
    }

    /// Returns the participants that are enlisted but not yet released.
    #[must_use]
    pub fn live_participants(&self) -> Vec<ParticipantId> {
        self.inner.live.lock().clone()
    }

    fn enlist(&self, info: &ParticipantInfo) -> CoreResult<()> {
        self.inner.coordinator.enlist(self.inner.id, info)?;
        self.inner.live.lock().push(info.id);
        Ok(())
    }

    fn report(&self, participant: ParticipantId, outcome: Outcome) {
        self.inner
            .coordinator
            .report_outcome(self.inner.id, participant, outcome);
    }

    fn release(&self, participant: ParticipantId) {
        self.inner.live.lock().retain(|id| *id != participant);
    }
}

impl fmt::Debug for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnHandle")
            .field("id", &self.inner.id)
            .field("rollback_only", &self.is_rollback_only())
            .finish_non_exhaustive()
    }
}

/// State every participant embeds: identity, lifecycle, and the handle of
/// the transaction it is enlisted in.
#[derive(Debug)]
pub struct ParticipantCore {
    id: ParticipantId,
    resource_manager: ResourceManagerId,
    key: Option<BlobKey>,
    state: ParticipantState,
    txn: Option<TxnHandle>,
}

impl ParticipantCore {
    /// Creates a closed participant core with a fresh ID.
    #[must_use]
    pub fn new(resource_manager: ResourceManagerId, key: Option<BlobKey>) -> Self {
        Self {
            id: ParticipantId::next(),
            resource_manager,
            key,
            state: ParticipantState::Closed,
            txn: None,
        }
    }

    /// Returns the participant ID.
    #[must_use]
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Returns the resource manager identity.
    #[must_use]
    pub fn resource_manager(&self) -> &ResourceManagerId {
        &self.resource_manager
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ParticipantState {
        self.state
    }

    /// Returns the transaction this participant is enlisted in.
    #[must_use]
    pub fn txn(&self) -> Option<&TxnHandle> {
        self.txn.as_ref()
    }

    /// Fails with [`CoreError::NotOpen`] unless the participant is open.
    pub fn ensure_open(&self) -> CoreResult<&TxnHandle> {
        match (&self.state, &self.txn) {
            (ParticipantState::Open, Some(txn)) => Ok(txn),
            _ => Err(CoreError::NotOpen {
                participant: self.id,
            }),
        }
    }

    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            resource_manager: self.resource_manager.clone(),
            key: self.key.clone(),
        }
    }
}

/// Resource-specific behavior behind the participant protocol.
pub trait Resource: Send {
    /// Returns the embedded participant state.
    fn core(&self) -> &ParticipantCore;

    /// Returns the embedded participant state mutably.
    fn core_mut(&mut self) -> &mut ParticipantCore;

    /// Checks that the resource can be enlisted right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource lost what it needs to take part.
    fn check_open(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Makes the participant's work durable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CommitFailed`] if finalization failed.
    fn finish_commit(&mut self) -> CoreResult<()>;

    /// Discards the participant's work.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RollbackFailed`] if cleanup failed.
    fn finish_abort(&mut self) -> CoreResult<()>;

    /// Gives back pooled or native handles. Called exactly once per
    /// open/close cycle, after the outcome was reported.
    fn release_resource(&mut self);
}

/// The participant contract the coordinator drives.
pub trait Participant: Send {
    /// Returns the participant ID.
    fn id(&self) -> ParticipantId;

    /// Returns the resource manager this participant belongs to.
    fn resource_manager(&self) -> &ResourceManagerId;

    /// Returns the current state.
    fn state(&self) -> ParticipantState;

    /// Enlists the participant in `txn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyOpen`] if already open, or
    /// [`CoreError::Enlist`] if the coordinator refuses.
    fn open(&mut self, txn: &TxnHandle) -> CoreResult<()>;

    /// Answers the coordinator's prepare callback.
    fn prepare(&mut self) -> Vote {
        Vote::Ready
    }

    /// Finalizes the participant's work and closes it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotOpen`] if not open, or the finalization
    /// error. The participant is closed and released either way.
    fn commit(&mut self) -> CoreResult<()>;

    /// Discards the participant's work, marks the transaction rollback-only
    /// and closes the participant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotOpen`] if not open, or the cleanup error.
    /// The participant is closed and released either way.
    fn abort(&mut self) -> CoreResult<()>;
}

impl<R: Resource> Participant for R {
    fn id(&self) -> ParticipantId {
        self.core().id
    }

    fn resource_manager(&self) -> &ResourceManagerId {
        &self.core().resource_manager
    }

    fn state(&self) -> ParticipantState {
        self.core().state
    }

    fn open(&mut self, txn: &TxnHandle) -> CoreResult<()> {
        let core = self.core();
        if core.state == ParticipantState::Open {
            return Err(CoreError::AlreadyOpen {
                participant: core.id,
            });
        }
        self.check_open()?;

        let info = self.core().info();
        txn.enlist(&info)?;

        let core = self.core_mut();
        core.txn = Some(txn.clone());
        core.state = ParticipantState::Open;
        debug!(participant = %info.id, txn = %txn.id(), "participant opened");
        Ok(())
    }

    fn commit(&mut self) -> CoreResult<()> {
        let txn = self.core().ensure_open()?.clone();
        let result = self.finish_commit();
        let outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(e) => {
                warn!(participant = %self.core().id, error = %e, "commit failed");
                txn.set_rollback_only();
                Outcome::Failure
            }
        };
        close(self, &txn, outcome);
        result
    }

    fn abort(&mut self) -> CoreResult<()> {
        let txn = self.core().ensure_open()?.clone();
        let result = self.finish_abort();
        if let Err(e) = &result {
            warn!(participant = %self.core().id, error = %e, "abort failed");
        }
        txn.set_rollback_only();
        close(self, &txn, Outcome::Failure);
        result
    }
}

fn close<R: Resource + ?Sized>(resource: &mut R, txn: &TxnHandle, outcome: Outcome) {
    let id = resource.core().id;
    txn.report(id, outcome);
    resource.release_resource();
    txn.release(id);

    let core = resource.core_mut();
    core.txn = None;
    core.state = ParticipantState::Closed;
    debug!(participant = %id, ?outcome, "participant closed");
}
