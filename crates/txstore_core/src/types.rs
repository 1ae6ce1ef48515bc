//! Core type definitions for txstore.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Creates a fresh random transaction ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the raw UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Process-unique identifier of one participant instance.
///
/// Participant IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(pub u64);

static NEXT_PARTICIPANT: AtomicU64 = AtomicU64::new(1);

impl ParticipantId {
    /// Creates a participant ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next unused participant ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PARTICIPANT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant:{}", self.0)
    }
}

/// Name of an application object type, e.g. `document`.
///
/// Type names become a directory segment in the staged-file layout, so they
/// are restricted to ASCII letters, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectType(String);

impl ObjectType {
    /// Creates an object type after validating its name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for empty names or names with
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(CoreError::invalid_config(format!(
                "invalid object type name {name:?}"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric identifier of an object within its type.
///
/// Assigned once at object creation and never reused for another object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Creates a new object ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable key of one blob: the owning object's type and ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlobKey {
    /// Object type.
    pub object_type: ObjectType,
    /// Object ID.
    pub object_id: ObjectId,
}

impl BlobKey {
    /// Creates a new blob key.
    #[must_use]
    pub fn new(object_type: ObjectType, object_id: ObjectId) -> Self {
        Self {
            object_type,
            object_id,
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Kind of resource manager a participant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A native SQL connection.
    Connection,
    /// Blob content kept in a database column.
    InlineBlob,
    /// Blob content kept as staged files in a path store.
    StagedFileBlob,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::InlineBlob => "inline-blob",
            Self::StagedFileBlob => "staged-file-blob",
        })
    }
}

/// Typed identity of a resource manager.
///
/// Two participants belong to the same resource manager iff their kinds
/// and locations are equal. The location names the data source of a
/// connection pool or the root of a file layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceManagerId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Data source or store location.
    pub location: String,
}

impl ResourceManagerId {
    /// Creates a new resource manager ID.
    #[must_use]
    pub fn new(kind: ResourceKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
        }
    }
}

impl fmt::Display for ResourceManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.location)
    }
}

/// Outcome a participant reports to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The participant finished its work successfully.
    Success,
    /// The participant failed or was aborted.
    Failure,
}

/// Answer to the coordinator's prepare callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Ready to commit.
    Ready,
}

/// What the coordinator is told about a participant when it enlists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    /// The participant instance.
    pub id: ParticipantId,
    /// Its resource manager.
    pub resource_manager: ResourceManagerId,
    /// The blob it guards, for blob stores.
    pub key: Option<BlobKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_ids_are_unique() {
        let a = ParticipantId::next();
        let b = ParticipantId::next();
        assert!(b > a);
    }

    #[test]
    fn object_type_validation() {
        assert!(ObjectType::new("document_v2").is_ok());
        assert!(ObjectType::new("image-raw").is_ok());
        assert!(ObjectType::new("").is_err());
        assert!(ObjectType::new("../etc").is_err());
        assert!(ObjectType::new("a/b").is_err());
    }

    #[test]
    fn blob_key_display() {
        let key = BlobKey::new(ObjectType::new("document").unwrap(), ObjectId::new(42));
        assert_eq!(format!("{key}"), "document:42");
    }

    #[test]
    fn resource_manager_identity_is_typed() {
        let a = ResourceManagerId::new(ResourceKind::StagedFileBlob, "files");
        let b = ResourceManagerId::new(ResourceKind::InlineBlob, "files");
        assert_ne!(a, b);
        assert_eq!(a, ResourceManagerId::new(ResourceKind::StagedFileBlob, "files"));
        assert_eq!(a.to_string(), "staged-file-blob@files");
    }
}
