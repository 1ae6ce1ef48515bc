//! Benchmark utilities.

use std::num::NonZeroU32;
use std::sync::Arc;
use txstore_core::{
    BlobKey, Config, FileLayout, LocalCoordinator, ObjectId, ObjectType, StoreKind, StoreRegistry,
};
use txstore_storage::PathStore;

/// Object type every benchmark writes.
pub const BENCH_TYPE: &str = "bench";

/// Generate patterned content of the specified size.
pub fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Key of benchmark object `id`.
pub fn key(id: u64) -> BlobKey {
    BlobKey::new(
        ObjectType::new(BENCH_TYPE).expect("valid type name"),
        ObjectId::new(id),
    )
}

/// Build a registry storing the benchmark type as staged files in `files`.
pub fn registry(files: Arc<dyn PathStore>, sub_dirs: Option<NonZeroU32>) -> Arc<StoreRegistry> {
    let mut layout = FileLayout::new("blobs");
    if let Some(count) = sub_dirs {
        layout = layout.sub_dirs(count);
    }
    StoreRegistry::builder(Arc::new(LocalCoordinator::new()))
        .path_store(files)
        .register(
            ObjectType::new(BENCH_TYPE).expect("valid type name"),
            StoreKind::StagedFile(layout),
        )
        .config(Config::default())
        .build()
        .expect("Failed to build registry")
}
