//! # txstore Testkit
//!
//! Test utilities for txstore.
//!
//! This crate provides:
//! - A registry fixture with one staged-file and one inline object type
//! - Scripted SQL connections that count native calls and fail on request
//! - A fault-injecting path store for crash and cleanup scenarios
//! - Property-based generators for blob operation histories
//!
//! ## Usage
//!
//! ```rust
//! use txstore_testkit::prelude::*;
//!
//! let stores = TestStores::memory();
//! stores.commit_write(&document(42), b"v1").unwrap();
//! assert_eq!(stores.read(&document(42)), Some(b"v1".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod sql;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::sql::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use sql::*;
