//! CLI command implementations.

pub mod inspect;
pub mod repair;
pub mod verify;

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use txstore_core::{FileLayout, ObjectType};
use txstore_storage::FileStore;

/// The object type directory a command works on.
#[derive(Debug)]
pub struct Target {
    /// File store root on disk.
    pub path: PathBuf,
    /// The opened store.
    pub store: FileStore,
    /// Layout of the object type.
    pub layout: FileLayout,
    /// The object type.
    pub object_type: ObjectType,
}

impl Target {
    /// Opens `object_type` under an existing file store at `path`.
    pub fn open(
        path: &Path,
        object_type: &str,
        root: &str,
        sub_dirs: Option<NonZeroU32>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.is_dir() {
            return Err(format!("No file store found at {:?}", path).into());
        }
        let mut layout = FileLayout::new(root);
        if let Some(count) = sub_dirs {
            layout = layout.sub_dirs(count);
        }
        layout.validate()?;

        Ok(Self {
            path: path.to_path_buf(),
            store: FileStore::open(path)?,
            layout,
            object_type: ObjectType::new(object_type)?,
        })
    }
}

/// Formats a byte count for display.
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Writes `files` (relative path, content) under a new directory.
    pub(crate) fn store_with(files: &[(&str, &[u8])]) -> (TempDir, Target) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        let target = Target::open(dir.path(), "document", "blobs", None).unwrap();
        (dir, target)
    }

    #[test]
    fn missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(Target::open(&missing, "document", "", None).is_err());
    }

    #[test]
    fn invalid_layout_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(Target::open(dir.path(), "document", "../up", None).is_err());
        assert!(Target::open(dir.path(), "", "", None).is_err());
    }

    #[test]
    fn sizes_are_readable() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
