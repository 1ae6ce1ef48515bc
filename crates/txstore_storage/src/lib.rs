//! # txstore Storage
//!
//! Path-addressable storage backends for txstore.
//!
//! This crate provides the lowest-level storage abstraction used by the
//! staged-file blob store. Backends are **opaque path stores** - they do not
//! interpret the bytes they hold, nor the naming convention layered on top.
//!
//! ## Design Principles
//!
//! - Backends are simple path stores (exists, create, delete, move, open)
//! - No knowledge of staged/backup suffixes or object keys
//! - Must be `Send + Sync` so one backend can serve many transactions
//! - Paths are relative, `/`-separated, and never escape the backend root
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral storage
//! - [`FileStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use std::io::{Read, Write};
//! use txstore_storage::{InMemoryStore, PathStore};
//!
//! let store = InMemoryStore::new();
//! let mut writer = store.open_write("docs/1.tmp").unwrap();
//! writer.write_all(b"hello").unwrap();
//! writer.finish().unwrap();
//! store.move_to("docs/1.tmp", "docs/1").unwrap();
//!
//! let mut data = Vec::new();
//! store.open_read("docs/1").unwrap().read_to_end(&mut data).unwrap();
//! assert_eq!(&data, b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod path;

pub use backend::{FinishWrite, PathStore, StoreReader, StoreWriter};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use path::{join, parent, validate};
