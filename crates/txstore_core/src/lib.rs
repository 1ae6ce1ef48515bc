//! # txstore Core
//!
//! Transactional resource participants for txstore.
//!
//! This crate provides:
//! - The participant state machine every resource follows (open, commit,
//!   abort, release) and the coordinator contract it reports to
//! - A SQL connection participant whose native handle is always given back
//!   to its pool
//! - Blob stores that guard one object's binary content, either inline in a
//!   database column or as staged files rotated in at commit
//! - A transaction context that creates participants on demand and drives
//!   them to a common outcome
//! - Optional per-object leases and an offline reconciliation pass
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use txstore_core::{
//!     BlobKey, Config, FileLayout, LocalCoordinator, ObjectId, ObjectType, StoreKind,
//!     StoreRegistry, TransactionContext,
//! };
//! use txstore_storage::InMemoryStore;
//!
//! let files = InMemoryStore::new();
//! let registry = StoreRegistry::builder(Arc::new(LocalCoordinator::new()))
//!     .path_store(Arc::new(files.clone()))
//!     .register(
//!         ObjectType::new("document").unwrap(),
//!         StoreKind::StagedFile(FileLayout::new("blobs")),
//!     )
//!     .config(Config::default())
//!     .build()
//!     .unwrap();
//!
//! let key = BlobKey::new(ObjectType::new("document").unwrap(), ObjectId::new(42));
//! let mut ctx = TransactionContext::begin(&registry);
//! ctx.blob_store(&key).unwrap().write(&mut &b"v1"[..], None).unwrap();
//! ctx.commit().unwrap();
//!
//! let mut content = Vec::new();
//! registry.read(&key, &mut content).unwrap();
//! assert_eq!(content, b"v1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
mod config;
mod connection;
mod context;
mod coordinator;
mod error;
pub mod lease;
mod participant;
pub mod repair;
#[cfg(feature = "sqlite")]
mod sqlite;
mod types;

#[cfg(test)]
mod test_support;

pub use blob::{
    copy_content, Artifact, BlobPaths, BlobStore, InlineBlobReader, InlineBlobStore, PendingOp,
    StagedFileBlobStore,
};
pub use config::{BlobColumn, Config, FileLayout, StoreKind};
pub use connection::{
    BorrowedConnection, ConnectionError, ConnectionParticipant, ConnectionPool, ConnectionResult,
    PooledConnection, SqlConnection,
};
pub use context::{ContextState, StoreRegistry, StoreRegistryBuilder, TransactionContext};
pub use coordinator::{Coordinator, LocalCoordinator, TransactionLog};
pub use error::{CoreError, CoreResult};
pub use lease::{Lease, LeaseRegistry};
pub use participant::{Participant, ParticipantCore, ParticipantState, Resource, TxnHandle};
pub use repair::{ObjectState, RepairPolicy, ScanReport};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqlitePool};
pub use types::{
    BlobKey, ObjectId, ObjectType, Outcome, ParticipantId, ParticipantInfo, ResourceKind,
    ResourceManagerId, TransactionId, Vote,
};
