//! Reconciliation of staged-file objects left split by a crash.
//!
//! Commit rotates an object's files in separate steps, so a crash can leave
//! any of these states behind:
//!
//! | normal | staged | backup | state                 |
//! |--------|--------|--------|-----------------------|
//! | yes    | no     | any    | `Clean`               |
//! | no     | no     | yes    | `Deleted`             |
//! | yes    | yes    | any    | `OrphanStaged`        |
//! | no     | yes    | yes    | `InterruptedRotation` |
//! | no     | yes    | no     | `StagedOnly`          |
//!
//! [`scan`] classifies every object of one type, [`repair`] fixes what a
//! [`RepairPolicy`] allows. Both must only run while no transaction uses
//! the store.

use crate::blob::{parse_artifact, Artifact, BlobPaths};
use crate::config::FileLayout;
use crate::error::CoreResult;
use crate::types::{BlobKey, ObjectId, ObjectType};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};
use txstore_storage::PathStore;

/// Consistency state of one object's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    /// Committed content present, nothing staged.
    Clean,
    /// Only the backup of deleted content is left.
    Deleted,
    /// Staged content next to committed content.
    OrphanStaged,
    /// Staged content and a backup, but no committed content.
    InterruptedRotation,
    /// Only staged content.
    StagedOnly,
}

impl ObjectState {
    /// Classifies an object from which of its files exist.
    #[must_use]
    pub fn classify(normal: bool, staged: bool, backup: bool) -> Option<Self> {
        match (normal, staged, backup) {
            (true, false, _) => Some(Self::Clean),
            (false, false, true) => Some(Self::Deleted),
            (true, true, _) => Some(Self::OrphanStaged),
            (false, true, true) => Some(Self::InterruptedRotation),
            (false, true, false) => Some(Self::StagedOnly),
            (false, false, false) => None,
        }
    }

    /// Returns true for states a committed transaction can leave behind.
    #[must_use]
    pub fn is_consistent(self) -> bool {
        matches!(self, Self::Clean | Self::Deleted)
    }
}

/// Files found for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectEntry {
    /// Object ID.
    pub id: ObjectId,
    /// Classified state.
    pub state: ObjectState,
    /// Whether committed content exists.
    pub normal: bool,
    /// Whether staged content exists.
    pub staged: bool,
    /// Whether a backup exists.
    pub backup: bool,
}

/// Result of scanning one object type.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Scanned type.
    pub object_type: ObjectType,
    /// Layout root.
    pub root: String,
    /// Objects in ID order.
    pub objects: Vec<ObjectEntry>,
    /// Files under the type directory that are not object artifacts.
    pub ignored: Vec<String>,
}

impl ScanReport {
    /// Returns the number of objects in `state`.
    #[must_use]
    pub fn count(&self, state: ObjectState) -> usize {
        self.objects.iter().filter(|o| o.state == state).count()
    }

    /// Returns the objects not in a consistent state.
    pub fn split(&self) -> impl Iterator<Item = &ObjectEntry> {
        self.objects.iter().filter(|o| !o.state.is_consistent())
    }

    /// Returns true if every object is consistent.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.split().next().is_none()
    }
}

/// Lists the artifacts of every `object_type` object under `layout` and
/// classifies each object.
///
/// # Errors
///
/// Returns [`crate::CoreError::Storage`] if the directory cannot be listed.
pub fn scan(
    store: &dyn PathStore,
    layout: &FileLayout,
    object_type: &ObjectType,
) -> CoreResult<ScanReport> {
    let dir = BlobPaths::type_dir(layout, object_type);
    let mut found: BTreeMap<ObjectId, [bool; 3]> = BTreeMap::new();
    let mut ignored = Vec::new();

    for path in store.list(&dir)? {
        let Some((id, artifact)) = parse_artifact(&path) else {
            ignored.push(path);
            continue;
        };
        // A well-formed name in the wrong bucket is not ours to touch.
        let expected = BlobPaths::new(layout, &BlobKey::new(object_type.clone(), id));
        if expected.get(artifact) != path {
            ignored.push(path);
            continue;
        }
        found.entry(id).or_default()[slot(artifact)] = true;
    }

    let objects: Vec<ObjectEntry> = found
        .into_iter()
        .filter_map(|(id, [normal, staged, backup])| {
            ObjectState::classify(normal, staged, backup).map(|state| ObjectEntry {
                id,
                state,
                normal,
                staged,
                backup,
            })
        })
        .collect();

    debug!(
        dir = %dir,
        objects = objects.len(),
        ignored = ignored.len(),
        "scanned object type"
    );
    Ok(ScanReport {
        object_type: object_type.clone(),
        root: layout.root.clone(),
        objects,
        ignored,
    })
}

fn slot(artifact: Artifact) -> usize {
    match artifact {
        Artifact::Normal => 0,
        Artifact::Staged => 1,
        Artifact::Backup => 2,
    }
}

/// What [`repair`] may change.
///
/// The default policy changes nothing and reports every split object as
/// skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairPolicy {
    /// Promote the staged content of interrupted rotations.
    pub promote_interrupted: bool,
    /// Remove staged files that cannot be promoted.
    pub discard_orphans: bool,
    /// Report actions without performing them.
    pub dry_run: bool,
}

impl RepairPolicy {
    /// Creates a policy that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also completes interrupted rotations.
    ///
    /// A staged file next to a backup is usually a commit that crashed
    /// between its two moves, but a write after a committed delete that
    /// never reached commit looks the same.
    #[must_use]
    pub const fn promote_interrupted(mut self, value: bool) -> Self {
        self.promote_interrupted = value;
        self
    }

    /// Also removes orphaned staged files.
    #[must_use]
    pub const fn discard_orphans(mut self, value: bool) -> Self {
        self.discard_orphans = value;
        self
    }

    /// Reports without changing anything.
    #[must_use]
    pub const fn dry_run(mut self, value: bool) -> Self {
        self.dry_run = value;
        self
    }
}

/// One change made (or, in a dry run, proposed) by [`repair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    /// Staged content moved to the normal path.
    Promote {
        /// Object ID.
        id: ObjectId,
        /// Staged path.
        from: String,
        /// Normal path.
        to: String,
    },
    /// Staged content removed.
    DiscardStaged {
        /// Object ID.
        id: ObjectId,
        /// Staged path.
        path: String,
    },
}

/// Result of a [`repair`] run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    /// Actions in object order.
    pub actions: Vec<RepairAction>,
    /// Split objects the policy left alone.
    pub skipped: Vec<ObjectId>,
    /// False for a dry run.
    pub applied: bool,
}

/// Fixes the split objects of `report`.
///
/// Interrupted rotations are completed by promoting the staged content,
/// and orphaned staged content (next to committed content, or on its own)
/// is removed, each only if the policy allows it.
///
/// # Errors
///
/// Returns [`crate::CoreError::Storage`] on the first failed change; the
/// changes made before it stay in place.
pub fn repair(
    store: &dyn PathStore,
    layout: &FileLayout,
    report: &ScanReport,
    policy: &RepairPolicy,
) -> CoreResult<RepairReport> {
    let mut out = RepairReport {
        applied: !policy.dry_run,
        ..RepairReport::default()
    };

    for entry in report.split() {
        let paths = BlobPaths::new(layout, &BlobKey::new(report.object_type.clone(), entry.id));
        let action = match entry.state {
            ObjectState::InterruptedRotation if policy.promote_interrupted => {
                RepairAction::Promote {
                    id: entry.id,
                    from: paths.staged,
                    to: paths.normal,
                }
            }
            ObjectState::OrphanStaged | ObjectState::StagedOnly if policy.discard_orphans => {
                RepairAction::DiscardStaged {
                    id: entry.id,
                    path: paths.staged,
                }
            }
            _ => {
                out.skipped.push(entry.id);
                continue;
            }
        };

        if !policy.dry_run {
            match &action {
                RepairAction::Promote { from, to, .. } => store.move_to(from, to)?,
                RepairAction::DiscardStaged { path, .. } => store.delete(path)?,
            }
            info!(object_type = %report.object_type, ?action, "repaired object");
        }
        out.actions.push(action);
    }
    Ok(out)
}
