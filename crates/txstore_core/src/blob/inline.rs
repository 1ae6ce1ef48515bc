//! Blob content kept in a database column.
//!
//! Writes go through the transaction's own connection, so their durability
//! is whatever that [`ConnectionParticipant`](crate::ConnectionParticipant)
//! decides at commit; the inline store's own commit and abort do nothing.
//!
//! Reads use a dedicated connection instead. The returned
//! [`InlineBlobReader`] owns it and commits and gives it back when the
//! reader is closed or dropped.

use super::{copy_content, stream_out, BlobStore};
use crate::config::{BlobColumn, Config};
use crate::connection::{BorrowedConnection, ConnectionPool, PooledConnection};
use crate::error::{CoreError, CoreResult};
use crate::participant::{ParticipantCore, Resource};
use crate::types::{BlobKey, ResourceKind, ResourceManagerId};
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Blob store keeping content in one column of one table.
pub struct InlineBlobStore {
    core: ParticipantCore,
    key: BlobKey,
    column: BlobColumn,
    conn: BorrowedConnection,
    pool: Arc<dyn ConnectionPool>,
    buffer_size: usize,
}

impl InlineBlobStore {
    /// Creates a closed store for `key` that writes through `conn` and
    /// reads through fresh connections from `pool`.
    #[must_use]
    pub fn new(
        conn: BorrowedConnection,
        pool: Arc<dyn ConnectionPool>,
        column: BlobColumn,
        key: BlobKey,
        config: &Config,
    ) -> Self {
        let resource_manager = ResourceManagerId::new(ResourceKind::InlineBlob, pool.name());
        Self {
            core: ParticipantCore::new(resource_manager, Some(key.clone())),
            key,
            column,
            conn,
            pool,
            buffer_size: config.copy_buffer_size,
        }
    }

    /// Returns the column holding the content.
    #[must_use]
    pub fn column(&self) -> &BlobColumn {
        &self.column
    }

    /// Fetches the committed content on a dedicated connection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotReadable`] if no connection is available,
    /// the row is missing, or the column is NULL.
    pub fn open_reader(&self) -> CoreResult<InlineBlobReader> {
        let not_readable = |e: &dyn fmt::Display| CoreError::not_readable(&self.key, e);

        let mut conn = PooledConnection::checkout(&self.pool).map_err(|e| not_readable(&e))?;
        conn.set_autocommit(false).map_err(|e| not_readable(&e))?;
        let content = conn
            .select_blob(&self.column, self.key.object_id)
            .map_err(|e| not_readable(&e))?
            .ok_or_else(|| not_readable(&"no content stored"))?;

        debug!(key = %self.key, bytes = content.len(), "inline content fetched");
        Ok(InlineBlobReader {
            key: self.key.clone(),
            content: Cursor::new(content),
            conn: Some(conn),
        })
    }

    fn update(&self, content: Option<&[u8]>) -> CoreResult<usize> {
        let column = &self.column;
        let id = self.key.object_id;
        self.conn
            .with(|conn| conn.update_blob(column, id, content))
            .ok_or_else(|| CoreError::write_failed(&self.key, "connection already released"))?
            .map_err(|e| CoreError::write_failed(&self.key, e))
    }
}

impl fmt::Debug for InlineBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineBlobStore")
            .field("key", &self.key)
            .field("column", &self.column)
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl Resource for InlineBlobStore {
    fn core(&self) -> &ParticipantCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ParticipantCore {
        &mut self.core
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.conn.is_released() {
            return Err(CoreError::invalid_operation(format!(
                "{} is no longer attached to a connection",
                self.key
            )));
        }
        Ok(())
    }

    fn finish_commit(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn finish_abort(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn release_resource(&mut self) {}
}

impl BlobStore for InlineBlobStore {
    fn key(&self) -> &BlobKey {
        &self.key
    }

    fn write(&mut self, source: &mut dyn Read, known_len: Option<u64>) -> CoreResult<u64> {
        self.core.ensure_open()?;

        let capacity = known_len.and_then(|len| usize::try_from(len).ok()).unwrap_or(0);
        let mut content = Vec::with_capacity(capacity);
        let copied = copy_content(source, &mut content, known_len, self.buffer_size)
            .map_err(|e| CoreError::write_failed(&self.key, e))?;

        match self.update(Some(&content))? {
            0 => Err(CoreError::write_failed(
                &self.key,
                format!("no row in {}", self.column.table),
            )),
            _ => {
                debug!(key = %self.key, bytes = copied, "inline content updated");
                Ok(copied)
            }
        }
    }

    fn delete(&mut self) -> CoreResult<()> {
        self.core.ensure_open()?;
        let rows = self.update(None)?;
        debug!(key = %self.key, rows, "inline content cleared");
        Ok(())
    }

    fn read(&mut self, sink: &mut dyn Write) -> CoreResult<u64> {
        let mut reader = self.open_reader()?;
        let copied = stream_out(&self.key, &mut reader, sink, self.buffer_size)?;
        reader.close()?;
        Ok(copied)
    }

    fn open_read(&mut self) -> CoreResult<Box<dyn Read + Send>> {
        Ok(Box::new(self.open_reader()?))
    }
}

/// Stream over inline content that owns the connection it was read on.
///
/// Closing the reader commits that connection and gives it back to the
/// pool. Dropping an unclosed reader does the same and logs failures.
pub struct InlineBlobReader {
    key: BlobKey,
    content: Cursor<Vec<u8>>,
    conn: Option<PooledConnection>,
}

impl InlineBlobReader {
    /// Returns the total content length.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.content.get_ref().len() as u64
    }

    /// Returns true if the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.get_ref().is_empty()
    }

    /// Commits the read connection and gives it back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotReadable`] if the commit fails; the
    /// connection is given back either way.
    pub fn close(mut self) -> CoreResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> CoreResult<()> {
        match self.conn.take() {
            Some(mut conn) => conn
                .commit()
                .map_err(|e| CoreError::not_readable(&self.key, e)),
            None => Ok(()),
        }
    }
}

impl Read for InlineBlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

impl Drop for InlineBlobReader {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(key = %self.key, error = %e, "closing inline reader failed");
        }
    }
}

impl fmt::Debug for InlineBlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineBlobReader")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("open", &self.conn.is_some())
            .finish()
    }
}
