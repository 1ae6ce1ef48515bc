//! Coordinator interface consumed by participants.
//!
//! The coordinator owns the global outcome of a transaction. Participants
//! only enlist and report how their own work ended; they always vote
//! [`Vote::Ready`](crate::Vote::Ready) on prepare, so the effective protocol
//! is one-phase with best-effort ordering rather than true two-phase commit.

use crate::error::{CoreError, CoreResult};
use crate::types::{Outcome, ParticipantId, ParticipantInfo, ResourceManagerId, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// External transaction coordinator, seen from the participant side.
pub trait Coordinator: Send + Sync {
    /// Enlists a participant in `txn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Enlist`] if the transaction no longer accepts
    /// participants.
    fn enlist(&self, txn: TransactionId, participant: &ParticipantInfo) -> CoreResult<()>;

    /// Records how a participant's work ended.
    fn report_outcome(&self, txn: TransactionId, participant: ParticipantId, outcome: Outcome);

    /// Called when `txn` starts committing or rolling back; later
    /// enlistments must be refused.
    fn begin_completion(&self, _txn: TransactionId) {}

    /// Called once `txn` is finished.
    fn end(&self, _txn: TransactionId) {}
}

/// Everything the [`LocalCoordinator`] knows about one transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    /// Participants in enlistment order.
    pub enlisted: Vec<ParticipantInfo>,
    /// Reported outcomes in report order.
    pub outcomes: Vec<(ParticipantId, Outcome)>,
    /// Whether completion has started.
    pub completing: bool,
    /// Whether the transaction ended.
    pub ended: bool,
}

impl TransactionLog {
    /// Returns the distinct resource managers, in first-enlisted order.
    #[must_use]
    pub fn resource_managers(&self) -> Vec<ResourceManagerId> {
        let mut out: Vec<ResourceManagerId> = Vec::new();
        for info in &self.enlisted {
            if !out.contains(&info.resource_manager) {
                out.push(info.resource_manager.clone());
            }
        }
        out
    }

    /// Returns the outcome reported by `participant`, if any.
    #[must_use]
    pub fn outcome_of(&self, participant: ParticipantId) -> Option<Outcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(id, _)| *id == participant)
            .map(|(_, outcome)| *outcome)
    }
}

/// In-process reference coordinator.
///
/// Tracks enlistments and outcomes per transaction and refuses enlistment
/// once completion has begun. With history enabled, logs of ended
/// transactions are kept for inspection; otherwise they are dropped on
/// [`Coordinator::end`].
#[derive(Debug, Default)]
pub struct LocalCoordinator {
    logs: Mutex<HashMap<TransactionId, TransactionLog>>,
    keep_history: bool,
}

impl LocalCoordinator {
    /// Creates a coordinator that forgets transactions when they end.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a coordinator that keeps the log of ended transactions.
    #[must_use]
    pub fn with_history() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            keep_history: true,
        }
    }

    /// Returns a copy of the log for `txn`.
    #[must_use]
    pub fn log(&self, txn: TransactionId) -> Option<TransactionLog> {
        self.logs.lock().get(&txn).cloned()
    }

    /// Returns the number of transactions that have not ended.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.logs.lock().values().filter(|log| !log.ended).count()
    }
}

impl Coordinator for LocalCoordinator {
    fn enlist(&self, txn: TransactionId, participant: &ParticipantInfo) -> CoreResult<()> {
        let mut logs = self.logs.lock();
        let log = logs.entry(txn).or_default();
        if log.completing || log.ended {
            return Err(CoreError::enlist(format!(
                "{txn} is already completing, cannot enlist {}",
                participant.id
            )));
        }
        debug!(%txn, participant = %participant.id, rm = %participant.resource_manager, "enlisted");
        log.enlisted.push(participant.clone());
        Ok(())
    }

    fn report_outcome(&self, txn: TransactionId, participant: ParticipantId, outcome: Outcome) {
        debug!(%txn, %participant, ?outcome, "outcome reported");
        self.logs
            .lock()
            .entry(txn)
            .or_default()
            .outcomes
            .push((participant, outcome));
    }

    fn begin_completion(&self, txn: TransactionId) {
        self.logs.lock().entry(txn).or_default().completing = true;
    }

    fn end(&self, txn: TransactionId) {
        let mut logs = self.logs.lock();
        if self.keep_history {
            logs.entry(txn).or_default().ended = true;
        } else {
            logs.remove(&txn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    fn info(id: u64, kind: ResourceKind) -> ParticipantInfo {
        ParticipantInfo {
            id: ParticipantId::new(id),
            resource_manager: ResourceManagerId::new(kind, "main"),
            key: None,
        }
    }

    #[test]
    fn enlist_then_report() {
        let coordinator = LocalCoordinator::with_history();
        let txn = TransactionId::generate();

        coordinator.enlist(txn, &info(1, ResourceKind::Connection)).unwrap();
        coordinator.report_outcome(txn, ParticipantId::new(1), Outcome::Success);

        let log = coordinator.log(txn).unwrap();
        assert_eq!(log.enlisted.len(), 1);
        assert_eq!(log.outcome_of(ParticipantId::new(1)), Some(Outcome::Success));
    }

    #[test]
    fn enlist_refused_while_completing() {
        let coordinator = LocalCoordinator::new();
        let txn = TransactionId::generate();
        coordinator.begin_completion(txn);

        let result = coordinator.enlist(txn, &info(1, ResourceKind::Connection));
        assert!(matches!(result, Err(CoreError::Enlist { .. })));
    }

    #[test]
    fn resource_managers_are_grouped_by_typed_identity() {
        let coordinator = LocalCoordinator::with_history();
        let txn = TransactionId::generate();
        coordinator.enlist(txn, &info(1, ResourceKind::StagedFileBlob)).unwrap();
        coordinator.enlist(txn, &info(2, ResourceKind::StagedFileBlob)).unwrap();
        coordinator.enlist(txn, &info(3, ResourceKind::Connection)).unwrap();

        let rms = coordinator.log(txn).unwrap().resource_managers();
        assert_eq!(rms.len(), 2);
        assert_eq!(rms[0].kind, ResourceKind::StagedFileBlob);
    }

    #[test]
    fn end_forgets_without_history() {
        let coordinator = LocalCoordinator::new();
        let txn = TransactionId::generate();
        coordinator.enlist(txn, &info(1, ResourceKind::Connection)).unwrap();
        assert_eq!(coordinator.active_count(), 1);

        coordinator.end(txn);
        assert!(coordinator.log(txn).is_none());
        assert_eq!(coordinator.active_count(), 0);
    }
}
