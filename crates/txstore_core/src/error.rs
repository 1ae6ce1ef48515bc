//! Error types for txstore core.

use crate::types::{BlobKey, ParticipantId};
use std::io;
use std::time::Duration;
use thiserror::Error;
use txstore_storage::StorageError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by participants, blob stores and the transaction context.
///
/// Backend errors from the path store or the SQL connection never escape
/// directly; they are folded into one of these kinds with a message.
#[derive(Debug, Error)]
pub enum CoreError {
    /// `open` was called on a participant that is already open.
    #[error("participant {participant} is already open")]
    AlreadyOpen {
        /// The offending participant.
        participant: ParticipantId,
    },

    /// `commit` or `abort` was called on a participant that is not open.
    #[error("participant {participant} is not open")]
    NotOpen {
        /// The offending participant.
        participant: ParticipantId,
    },

    /// The coordinator refused to enlist a participant.
    #[error("enlistment rejected: {reason}")]
    Enlist {
        /// Why enlistment was refused.
        reason: String,
    },

    /// Finalizing a participant's work failed during commit.
    #[error("commit failed for {resource}: {message}")]
    CommitFailed {
        /// The resource that failed.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// Rolling back a participant's work failed.
    #[error("rollback failed for {resource}: {message}")]
    RollbackFailed {
        /// The resource that failed.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// The object has no readable content.
    #[error("object {key} is not readable: {reason}")]
    NotReadable {
        /// The object that was read.
        key: BlobKey,
        /// Why the content could not be read.
        reason: String,
    },

    /// Staging or storing content failed before commit.
    #[error("write to {key} failed: {message}")]
    WriteFailed {
        /// The object being written.
        key: BlobKey,
        /// Description of the failure.
        message: String,
    },

    /// The caller's sink rejected content streamed out of a store.
    #[error("output of {key} failed: {source}")]
    Output {
        /// The object being read.
        key: BlobKey,
        /// The sink's error.
        #[source]
        source: io::Error,
    },

    /// Another transaction held the object's lease for too long.
    #[error("lease on {key} not acquired within {waited:?}")]
    LeaseTimeout {
        /// The contended object.
        key: BlobKey,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The transaction was marked rollback-only and could not commit.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Store configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Path store error outside the participant protocol, during
    /// reconciliation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// Creates an enlistment error.
    pub fn enlist(reason: impl Into<String>) -> Self {
        Self::Enlist {
            reason: reason.into(),
        }
    }

    /// Creates a commit failure for `resource`.
    pub fn commit_failed(resource: impl ToString, message: impl ToString) -> Self {
        Self::CommitFailed {
            resource: resource.to_string(),
            message: message.to_string(),
        }
    }

    /// Creates a rollback failure for `resource`.
    pub fn rollback_failed(resource: impl ToString, message: impl ToString) -> Self {
        Self::RollbackFailed {
            resource: resource.to_string(),
            message: message.to_string(),
        }
    }

    /// Creates a not-readable error.
    pub fn not_readable(key: &BlobKey, reason: impl ToString) -> Self {
        Self::NotReadable {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }

    /// Creates a write failure.
    pub fn write_failed(key: &BlobKey, message: impl ToString) -> Self {
        Self::WriteFailed {
            key: key.clone(),
            message: message.to_string(),
        }
    }

    /// Creates an output error for a failing sink.
    pub fn output(key: &BlobKey, source: io::Error) -> Self {
        Self::Output {
            key: key.clone(),
            source,
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true for protocol misuse that must never be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpen { .. }
                | Self::NotOpen { .. }
                | Self::Enlist { .. }
                | Self::InvalidOperation { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Returns true for errors the caller can handle locally, such as an
    /// object that has no content yet.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotReadable { .. } | Self::WriteFailed { .. } | Self::LeaseTimeout { .. }
        )
    }

    /// Returns true if this error must force the whole transaction to a
    /// failed outcome.
    #[must_use]
    pub fn forces_rollback(&self) -> bool {
        matches!(
            self,
            Self::CommitFailed { .. } | Self::RollbackFailed { .. } | Self::TransactionAborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectId, ObjectType};

    fn key() -> BlobKey {
        BlobKey::new(ObjectType::new("document").unwrap(), ObjectId::new(42))
    }

    #[test]
    fn protocol_errors_are_fatal() {
        let id = ParticipantId::new(3);
        assert!(CoreError::AlreadyOpen { participant: id }.is_fatal());
        assert!(CoreError::NotOpen { participant: id }.is_fatal());
        assert!(CoreError::enlist("ending").is_fatal());
        assert!(!CoreError::not_readable(&key(), "missing").is_fatal());
    }

    #[test]
    fn finalization_errors_force_rollback() {
        assert!(CoreError::commit_failed("conn", "disk full").forces_rollback());
        assert!(CoreError::rollback_failed("conn", "gone").forces_rollback());
        assert!(!CoreError::write_failed(&key(), "short read").forces_rollback());
    }

    #[test]
    fn output_errors_keep_their_source() {
        let err = CoreError::output(&key(), io::Error::new(io::ErrorKind::WriteZero, "full"));
        assert!(!err.is_recoverable());
        assert!(!err.forces_rollback());
        assert_eq!(err.to_string(), "output of document:42 failed: full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn not_readable_is_recoverable() {
        let err = CoreError::not_readable(&key(), "no content");
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "object document:42 is not readable: no content"
        );
    }
}
