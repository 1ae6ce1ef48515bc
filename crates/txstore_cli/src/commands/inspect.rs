//! Inspect command implementation.

use super::{format_size, Target};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io;
use txstore_core::blob::{Artifact, BlobPaths};
use txstore_core::repair::{scan, ObjectState};
use txstore_core::{BlobKey, ObjectId};
use txstore_storage::PathStore;

/// Inspection result for one object type.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// File store path.
    pub path: String,
    /// Object type.
    pub object_type: String,
    /// Objects in ID order.
    pub objects: Vec<ObjectInfo>,
    /// Files that are not object artifacts.
    pub ignored: Vec<String>,
    /// Total size of every artifact in bytes.
    pub total_size: u64,
}

/// Files of one object.
#[derive(Debug, Serialize)]
pub struct ObjectInfo {
    /// Object ID.
    pub id: ObjectId,
    /// Consistency state.
    pub state: ObjectState,
    /// Artifacts present.
    pub files: Vec<FileInfo>,
}

/// One artifact file.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// Which artifact.
    pub artifact: Artifact,
    /// Path inside the store.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the content (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Runs the inspect command.
pub fn run(target: &Target, digests: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(target, digests)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

/// Gathers the artifacts of every object of the target type.
pub fn collect(target: &Target, digests: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let report = scan(&target.store, &target.layout, &target.object_type)?;

    let mut total_size = 0;
    let mut objects = Vec::with_capacity(report.objects.len());
    for entry in &report.objects {
        let key = BlobKey::new(target.object_type.clone(), entry.id);
        let paths = BlobPaths::new(&target.layout, &key);
        let present = [
            (Artifact::Normal, entry.normal),
            (Artifact::Staged, entry.staged),
            (Artifact::Backup, entry.backup),
        ];

        let mut files = Vec::new();
        for (artifact, exists) in present {
            if !exists {
                continue;
            }
            let path = paths.get(artifact).to_string();
            let (size, sha256) = measure(&target.store, &path, digests)?;
            total_size += size;
            files.push(FileInfo {
                artifact,
                path,
                size,
                sha256,
            });
        }
        objects.push(ObjectInfo {
            id: entry.id,
            state: entry.state,
            files,
        });
    }

    Ok(InspectResult {
        path: target.path.display().to_string(),
        object_type: target.object_type.to_string(),
        objects,
        ignored: report.ignored,
        total_size,
    })
}

fn measure(
    store: &dyn PathStore,
    path: &str,
    digest: bool,
) -> Result<(u64, Option<String>), Box<dyn std::error::Error>> {
    let mut reader = store.open_read(path)?;
    if !digest {
        return Ok((io::copy(&mut reader, &mut io::sink())?, None));
    }
    let mut hasher = Sha256::new();
    let size = io::copy(&mut reader, &mut hasher)?;
    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok((size, Some(hex)))
}

fn print_text(result: &InspectResult) {
    println!("txstore Inspection");
    println!("==================");
    println!();
    println!("Path: {}", result.path);
    println!("Type: {}", result.object_type);
    println!();
    println!("Objects: {}", result.objects.len());
    println!("Total size: {}", format_size(result.total_size));
    println!();

    for object in &result.objects {
        println!("  {} ({:?})", object.id, object.state);
        for file in &object.files {
            match &file.sha256 {
                Some(digest) => println!(
                    "    {:<8} {:>10}  {}  {}",
                    format!("{:?}", file.artifact),
                    format_size(file.size),
                    digest,
                    file.path
                ),
                None => println!(
                    "    {:<8} {:>10}  {}",
                    format!("{:?}", file.artifact),
                    format_size(file.size),
                    file.path
                ),
            }
        }
    }

    if !result.ignored.is_empty() {
        println!();
        println!("Ignored files:");
        for path in &result.ignored {
            println!("  {}", path);
        }
    }
}
