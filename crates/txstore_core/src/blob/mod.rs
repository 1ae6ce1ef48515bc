//! Per-object binary content participants.
//!
//! A [`BlobStore`] guards the content of one object, addressed by its
//! [`BlobKey`]. Two implementations exist:
//!
//! - [`StagedFileBlobStore`] keeps content as files in a path store and
//!   realizes writes and deletes at commit through a stage/rotate/backup
//!   scheme.
//! - [`InlineBlobStore`] keeps content in a database column and inherits
//!   durability from the transaction's SQL connection.

mod inline;
mod staged;

pub use inline::{InlineBlobReader, InlineBlobStore};
pub use staged::{
    parse_artifact, Artifact, BlobPaths, StagedFileBlobStore, BACKUP_SUFFIX, STAGED_SUFFIX,
};

use crate::error::{CoreError, CoreResult};
use crate::participant::Participant;
use crate::types::BlobKey;
use std::io::{self, Read, Write};

/// A participant guarding the binary content of one object.
pub trait BlobStore: Participant {
    /// Returns the key of the guarded object.
    fn key(&self) -> &BlobKey;

    /// Stores new content read from `source`.
    ///
    /// With `known_len = None` the source is copied until exhaustion;
    /// with `Some(n)` exactly `n` bytes are copied. Returns the number of
    /// bytes stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::NotOpen`] outside a transaction and
    /// [`crate::CoreError::WriteFailed`] if copying fails.
    fn write(&mut self, source: &mut dyn Read, known_len: Option<u64>) -> CoreResult<u64>;

    /// Removes the object's content.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::NotOpen`] outside a transaction.
    fn delete(&mut self) -> CoreResult<()>;

    /// Streams the committed content into `sink` and returns its length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::NotReadable`] if there is no readable
    /// content and [`crate::CoreError::Output`] if `sink` fails.
    fn read(&mut self, sink: &mut dyn Write) -> CoreResult<u64>;

    /// Opens the committed content as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::NotReadable`] if there is no readable
    /// content.
    fn open_read(&mut self) -> CoreResult<Box<dyn Read + Send>>;
}

/// The effect a blob store will realize at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOp {
    /// Nothing to do.
    #[default]
    None,
    /// Promote the staged content.
    Write,
    /// Demote the current content to the backup.
    Delete,
}

/// Copies `source` into `sink` through a buffer of `buffer_size` bytes.
///
/// With `known_len = None` copying stops at end of input; with `Some(n)`
/// exactly `n` bytes are copied and a shorter source is an
/// [`io::ErrorKind::UnexpectedEof`] error. Returns the number of bytes
/// copied.
///
/// # Errors
///
/// Returns any I/O error from either side.
pub fn copy_content(
    source: &mut dyn Read,
    sink: &mut dyn Write,
    known_len: Option<u64>,
    buffer_size: usize,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut copied = 0u64;

    loop {
        let want = match known_len {
            Some(len) if copied >= len => break,
            Some(len) => buffer.len().min(usize::try_from(len - copied).unwrap_or(usize::MAX)),
            None => buffer.len(),
        };

        let read = match source.read(&mut buffer[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buffer[..read])?;
        copied += read as u64;
    }

    match known_len {
        Some(len) if copied < len => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source ended after {copied} of {len} bytes"),
        )),
        _ => Ok(copied),
    }
}

/// Streams `source` into the caller's `sink` for a read of `key`.
///
/// Failures on the source side are [`CoreError::NotReadable`]; failures
/// of the sink are [`CoreError::Output`].
pub(crate) fn stream_out(
    key: &BlobKey,
    source: &mut dyn Read,
    sink: &mut dyn Write,
    buffer_size: usize,
) -> CoreResult<u64> {
    let mut sink = TrackedSink {
        inner: sink,
        failed: false,
    };
    match copy_content(source, &mut sink, None, buffer_size) {
        Ok(copied) => Ok(copied),
        Err(e) if sink.failed => Err(CoreError::output(key, e)),
        Err(e) => Err(CoreError::not_readable(key, e)),
    }
}

/// Remembers whether the wrapped writer reported an error.
struct TrackedSink<'a> {
    inner: &'a mut dyn Write,
    failed: bool,
}

impl TrackedSink<'_> {
    fn track<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::Interrupted {
                self.failed = true;
            }
        }
        result
    }
}

impl Write for TrackedSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf);
        self.track(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.inner.flush();
        self.track(result)
    }
}
