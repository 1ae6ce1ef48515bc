//! Inline blobs and staged files against a real SQLite database.

#![cfg(feature = "sqlite")]

use std::io::Read;
use std::num::NonZeroU32;
use std::sync::Arc;
use tempfile::TempDir;
use txstore_core::{
    BlobColumn, BlobKey, ConnectionPool, FileLayout, LocalCoordinator, ObjectId, ObjectType,
    SqlitePool, StoreKind, StoreRegistry, TransactionContext,
};
use txstore_storage::FileStore;

struct Db {
    dir: TempDir,
    pool: Arc<SqlitePool>,
    registry: Arc<StoreRegistry>,
}

fn setup() -> Db {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("main.db");
    let pool = Arc::new(SqlitePool::open(&db_path).unwrap());

    let mut conn = pool.checkout().unwrap();
    conn.execute("CREATE TABLE T_NOTE (ID INTEGER PRIMARY KEY, BODY BLOB)")
        .unwrap();
    conn.execute("CREATE TABLE T_AUDIT (ENTRY TEXT)").unwrap();
    conn.execute("INSERT INTO T_NOTE (ID) VALUES (1), (2), (3)")
        .unwrap();
    pool.give_back(conn);

    let files = FileStore::open(&dir.path().join("files")).unwrap();
    let shared: Arc<dyn ConnectionPool> = pool.clone();
    let registry = StoreRegistry::builder(Arc::new(LocalCoordinator::new()))
        .pool(shared)
        .path_store(Arc::new(files))
        .register(
            ObjectType::new("note").unwrap(),
            StoreKind::Inline(BlobColumn::new("T_NOTE", "BODY")),
        )
        .register(
            ObjectType::new("document").unwrap(),
            StoreKind::StagedFile(FileLayout::new("blobs").sub_dirs(NonZeroU32::new(4).unwrap())),
        )
        .build()
        .unwrap();
    Db {
        dir,
        pool,
        registry,
    }
}

fn note(id: u64) -> BlobKey {
    BlobKey::new(ObjectType::new("note").unwrap(), ObjectId::new(id))
}

fn document(id: u64) -> BlobKey {
    BlobKey::new(ObjectType::new("document").unwrap(), ObjectId::new(id))
}

fn audit_rows(db: &Db) -> i64 {
    let conn = rusqlite::Connection::open(db.dir.path().join("main.db")).unwrap();
    conn.query_row("SELECT COUNT(*) FROM T_AUDIT", [], |row| row.get(0))
        .unwrap()
}

fn read(db: &Db, key: &BlobKey) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    db.registry.read(key, &mut out).ok().map(|_| out)
}

fn write_all(ctx: &mut TransactionContext) {
    ctx.connection()
        .unwrap()
        .with_connection(|c| c.execute("INSERT INTO T_AUDIT VALUES ('saved')"))
        .unwrap()
        .unwrap();
    ctx.blob_store(&note(1))
        .unwrap()
        .write(&mut &b"inline body"[..], None)
        .unwrap();
    ctx.blob_store(&document(6))
        .unwrap()
        .write(&mut &b"file body"[..], Some(9))
        .unwrap();
}

#[test]
fn commit_makes_statements_and_blobs_durable() {
    let db = setup();
    let mut ctx = TransactionContext::begin(&db.registry);
    write_all(&mut ctx);
    ctx.commit().unwrap();

    assert_eq!(read(&db, &note(1)), Some(b"inline body".to_vec()));
    assert_eq!(read(&db, &document(6)), Some(b"file body".to_vec()));
    assert_eq!(audit_rows(&db), 1);
    assert!(db.dir.path().join("files/blobs/document/2/6").is_file());
    assert_eq!(db.pool.open_connections(), 0);
}

#[test]
fn rollback_discards_statements_and_blobs() {
    let db = setup();
    let mut ctx = TransactionContext::begin(&db.registry);
    write_all(&mut ctx);
    ctx.rollback().unwrap();

    assert_eq!(read(&db, &note(1)), None);
    assert_eq!(read(&db, &document(6)), None);
    assert_eq!(audit_rows(&db), 0);
    assert!(!db.dir.path().join("files/blobs/document/2/6.tmp").exists());
    assert_eq!(db.pool.open_connections(), 0);
}

#[test]
fn uncommitted_inline_write_is_invisible_to_readers() {
    let db = setup();
    let mut ctx = TransactionContext::begin(&db.registry);
    ctx.blob_store(&note(2))
        .unwrap()
        .write(&mut &b"draft"[..], None)
        .unwrap();

    // WAL lets the dedicated reader see the last committed state.
    assert_eq!(read(&db, &note(2)), None);
    ctx.commit().unwrap();
    assert_eq!(read(&db, &note(2)), Some(b"draft".to_vec()));
}

#[test]
fn inline_delete_clears_the_column() {
    let db = setup();
    let mut ctx = TransactionContext::begin(&db.registry);
    ctx.blob_store(&note(3))
        .unwrap()
        .write(&mut &b"short lived"[..], None)
        .unwrap();
    ctx.commit().unwrap();

    let mut ctx = TransactionContext::begin(&db.registry);
    ctx.blob_store(&note(3)).unwrap().delete().unwrap();
    ctx.commit().unwrap();
    assert_eq!(read(&db, &note(3)), None);
}

#[test]
fn inline_reader_holds_its_own_connection() {
    let db = setup();
    let mut ctx = TransactionContext::begin(&db.registry);
    ctx.blob_store(&note(1))
        .unwrap()
        .write(&mut &b"streamed"[..], None)
        .unwrap();
    ctx.commit().unwrap();

    let mut reader = db.registry.open_read(&note(1)).unwrap();
    assert_eq!(db.pool.open_connections(), 1);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    drop(reader);

    assert_eq!(out, b"streamed");
    assert_eq!(db.pool.open_connections(), 0);
}

#[test]
fn missing_row_fails_the_inline_write() {
    let db = setup();
    let mut ctx = TransactionContext::begin(&db.registry);
    let result = ctx
        .blob_store(&note(99))
        .unwrap()
        .write(&mut &b"nowhere"[..], None);
    assert!(result.is_err());
    ctx.rollback().unwrap();
    assert_eq!(db.pool.open_connections(), 0);
}
