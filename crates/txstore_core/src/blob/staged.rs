//! Blob content as files, made durable by rotation.
//!
//! Every object maps to up to three sibling files:
//!
//! ```text
//! <id>       normal: the committed content, the only file `read` opens
//! <id>.tmp   staged: uncommitted content written in this transaction
//! <id>.bak   backup: the previous committed content
//! ```
//!
//! `write` only ever touches the staged file. At commit a pending write is
//! rotated in (backup discarded, normal → backup, staged → normal) and a
//! pending delete demotes normal to backup. Abort removes the staged file.
//!
//! The rotation is three separate renames/removals. A crash between them
//! can leave normal missing with backup and staged present, or staged next
//! to normal; [`crate::repair`] classifies and fixes those states.

use super::{copy_content, stream_out, BlobStore, PendingOp};
use crate::config::{Config, FileLayout};
use crate::error::{CoreError, CoreResult};
use crate::lease::Lease;
use crate::participant::{ParticipantCore, Resource};
use crate::types::{BlobKey, ObjectId, ObjectType, ResourceKind, ResourceManagerId};
use std::io::{Read, Write};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;
use txstore_storage::{join, PathStore, StorageError};

/// Suffix of the staged artifact.
pub const STAGED_SUFFIX: &str = ".tmp";
/// Suffix of the backup artifact.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Which of an object's three files a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Artifact {
    /// Committed content.
    Normal,
    /// Uncommitted content.
    Staged,
    /// Previous committed content.
    Backup,
}

/// The three paths of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPaths {
    /// Committed content.
    pub normal: String,
    /// Uncommitted content.
    pub staged: String,
    /// Previous committed content.
    pub backup: String,
}

impl BlobPaths {
    /// Derives the paths of `key` under `layout`.
    #[must_use]
    pub fn new(layout: &FileLayout, key: &BlobKey) -> Self {
        let dir = Self::type_dir(layout, &key.object_type);
        let bucket = layout.sub_dirs.map(|count| bucket_name(key.object_id, count));
        let normal = join([
            dir.as_str(),
            bucket.as_deref().unwrap_or(""),
            &key.object_id.to_string(),
        ]);
        Self {
            staged: format!("{normal}{STAGED_SUFFIX}"),
            backup: format!("{normal}{BACKUP_SUFFIX}"),
            normal,
        }
    }

    /// Returns the directory holding every object of `object_type`.
    #[must_use]
    pub fn type_dir(layout: &FileLayout, object_type: &ObjectType) -> String {
        join([layout.root.as_str(), object_type.as_str()])
    }

    /// Returns the path of one artifact.
    #[must_use]
    pub fn get(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::Normal => &self.normal,
            Artifact::Staged => &self.staged,
            Artifact::Backup => &self.backup,
        }
    }
}

fn bucket_name(id: ObjectId, count: NonZeroU32) -> String {
    let width = (count.get() - 1).max(1).to_string().len();
    format!("{:0width$}", id.as_u64() % u64::from(count.get()))
}

/// Parses the file name at the end of `path` into the object ID and
/// artifact it belongs to.
#[must_use]
pub fn parse_artifact(path: &str) -> Option<(ObjectId, Artifact)> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, artifact) = if let Some(stem) = name.strip_suffix(STAGED_SUFFIX) {
        (stem, Artifact::Staged)
    } else if let Some(stem) = name.strip_suffix(BACKUP_SUFFIX) {
        (stem, Artifact::Backup)
    } else {
        (name, Artifact::Normal)
    };
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok().map(|id| (ObjectId::new(id), artifact))
}

/// Blob store keeping content as rotated files in a [`PathStore`].
pub struct StagedFileBlobStore {
    core: ParticipantCore,
    key: BlobKey,
    paths: BlobPaths,
    store: Arc<dyn PathStore>,
    pending: PendingOp,
    staged_written: bool,
    buffer_size: usize,
    lease: Option<Lease>,
}

impl StagedFileBlobStore {
    /// Creates a closed store for `key`.
    #[must_use]
    pub fn new(store: Arc<dyn PathStore>, layout: &FileLayout, key: BlobKey, config: &Config) -> Self {
        let location = if layout.root.is_empty() {
            "."
        } else {
            layout.root.as_str()
        };
        let resource_manager = ResourceManagerId::new(ResourceKind::StagedFileBlob, location);
        Self {
            core: ParticipantCore::new(resource_manager, Some(key.clone())),
            paths: BlobPaths::new(layout, &key),
            key,
            store,
            pending: PendingOp::None,
            staged_written: false,
            buffer_size: config.copy_buffer_size,
            lease: None,
        }
    }

    /// Attaches a lease that is held until the store is released.
    #[must_use]
    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Returns the paths of the guarded object.
    #[must_use]
    pub fn paths(&self) -> &BlobPaths {
        &self.paths
    }

    /// Returns the effect commit will realize.
    #[must_use]
    pub fn pending(&self) -> PendingOp {
        self.pending
    }

    /// Streams the backup content into `sink`.
    ///
    /// This is the explicit recovery path; [`BlobStore::read`] never falls
    /// back to the backup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotReadable`] if there is no backup.
    pub fn read_backup(&self, sink: &mut dyn Write) -> CoreResult<u64> {
        self.read_artifact(Artifact::Backup, sink)
    }

    fn read_artifact(&self, artifact: Artifact, sink: &mut dyn Write) -> CoreResult<u64> {
        let mut source = self.open_artifact(artifact)?;
        stream_out(&self.key, &mut source, sink, self.buffer_size)
    }

    fn open_artifact(&self, artifact: Artifact) -> CoreResult<Box<dyn Read + Send>> {
        let path = self.paths.get(artifact);
        self.store.open_read(path).map_err(|e| {
            let reason = if e.is_not_found() {
                format!("{path} does not exist")
            } else {
                e.to_string()
            };
            CoreError::not_readable(&self.key, reason)
        })
    }

    fn stage(&mut self, source: &mut dyn Read, known_len: Option<u64>) -> Result<u64, String> {
        let staged = &self.paths.staged;
        self.store.create(staged).map_err(|e| e.to_string())?;
        self.staged_written = true;

        let mut sink = self.store.open_write(staged).map_err(|e| e.to_string())?;
        let copied = copy_content(source, &mut sink, known_len, self.buffer_size)
            .map_err(|e| e.to_string())?;
        sink.finish().map_err(|e| e.to_string())?;
        Ok(copied)
    }

    fn commit_step(&self, step: &str, result: Result<(), StorageError>) -> CoreResult<()> {
        result.map_err(|e| {
            CoreError::commit_failed(self.core.resource_manager(), format!("{} {step}: {e}", self.key))
        })
    }

    fn exists(&self, path: &str) -> CoreResult<bool> {
        self.store
            .exists(path)
            .map_err(|e| CoreError::commit_failed(self.core.resource_manager(), e))
    }

    /// backup → discard, normal → backup, staged → normal.
    fn rotate(&self) -> CoreResult<()> {
        let BlobPaths {
            normal,
            staged,
            backup,
        } = &self.paths;

        if self.exists(backup)? {
            self.commit_step("discard backup", self.store.delete(backup))?;
        }
        if self.exists(normal)? {
            self.commit_step("demote current", self.store.move_to(normal, backup))?;
        }
        self.commit_step("promote staged", self.store.move_to(staged, normal))?;
        debug!(key = %self.key, "rotated staged content in");
        Ok(())
    }

    /// Drops any staged content, then normal → backup.
    fn demote(&self) -> CoreResult<()> {
        let BlobPaths {
            normal,
            staged,
            backup,
        } = &self.paths;

        if self.staged_written && self.exists(staged)? {
            self.commit_step("discard staged", self.store.delete(staged))?;
        }
        if !self.exists(normal)? {
            debug!(key = %self.key, "delete of object without content");
            return Ok(());
        }
        if self.exists(backup)? {
            self.commit_step("discard backup", self.store.delete(backup))?;
        }
        self.commit_step("demote current", self.store.move_to(normal, backup))?;
        debug!(key = %self.key, "demoted content to backup");
        Ok(())
    }

    fn discard_staged(&self) -> Result<(), StorageError> {
        let staged = &self.paths.staged;
        if self.staged_written && self.store.exists(staged)? {
            self.store.delete(staged)?;
            debug!(key = %self.key, "discarded staged content");
        }
        Ok(())
    }
}

impl std::fmt::Debug for StagedFileBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFileBlobStore")
            .field("key", &self.key)
            .field("state", &self.core.state())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Resource for StagedFileBlobStore {
    fn core(&self) -> &ParticipantCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ParticipantCore {
        &mut self.core
    }

    fn finish_commit(&mut self) -> CoreResult<()> {
        let pending = std::mem::take(&mut self.pending);
        let result = match pending {
            PendingOp::Write => self.rotate(),
            PendingOp::Delete => self.demote(),
            PendingOp::None => self
                .discard_staged()
                .map_err(|e| CoreError::commit_failed(self.core.resource_manager(), e)),
        };
        self.staged_written = false;
        result
    }

    fn finish_abort(&mut self) -> CoreResult<()> {
        self.pending = PendingOp::None;
        let result = self
            .discard_staged()
            .map_err(|e| CoreError::rollback_failed(self.core.resource_manager(), e));
        self.staged_written = false;
        result
    }

    fn release_resource(&mut self) {
        self.lease = None;
    }
}

impl BlobStore for StagedFileBlobStore {
    fn key(&self) -> &BlobKey {
        &self.key
    }

    fn write(&mut self, source: &mut dyn Read, known_len: Option<u64>) -> CoreResult<u64> {
        self.core.ensure_open()?;
        match self.stage(source, known_len) {
            Ok(copied) => {
                self.pending = PendingOp::Write;
                debug!(key = %self.key, bytes = copied, "staged content");
                Ok(copied)
            }
            Err(message) => {
                // The staged file is now partial and must never be promoted.
                // A requested delete still stands; demote discards the file.
                if self.pending == PendingOp::Write {
                    self.pending = PendingOp::None;
                }
                Err(CoreError::write_failed(&self.key, message))
            }
        }
    }

    fn delete(&mut self) -> CoreResult<()> {
        self.core.ensure_open()?;
        self.pending = PendingOp::Delete;
        Ok(())
    }

    fn read(&mut self, sink: &mut dyn Write) -> CoreResult<u64> {
        self.read_artifact(Artifact::Normal, sink)
    }

    fn open_read(&mut self) -> CoreResult<Box<dyn Read + Send>> {
        self.open_artifact(Artifact::Normal)
    }
}
