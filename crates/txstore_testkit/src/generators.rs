//! Property-based test generators using proptest.

use proptest::prelude::*;
use txstore_core::{BlobKey, ObjectId, ObjectType};

/// One step a transaction applies to a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobOp {
    /// Write this content.
    Write(Vec<u8>),
    /// Delete the content.
    Delete,
}

/// How a generated transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Commit.
    Commit,
    /// Roll back.
    Rollback,
}

/// Strategy for blob content, including empty content.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Strategy for valid object type names.
pub fn object_type_strategy() -> impl Strategy<Value = ObjectType> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}")
        .expect("Invalid regex")
        .prop_map(|name| ObjectType::new(name).expect("generated name is valid"))
}

/// Strategy for blob keys with small IDs, so that keys collide often.
pub fn blob_key_strategy() -> impl Strategy<Value = BlobKey> {
    (object_type_strategy(), 0u64..64)
        .prop_map(|(object_type, id)| BlobKey::new(object_type, ObjectId::new(id)))
}

/// Strategy for one blob operation; writes are three times as likely.
pub fn blob_op_strategy() -> impl Strategy<Value = BlobOp> {
    prop_oneof![
        3 => content_strategy().prop_map(BlobOp::Write),
        1 => Just(BlobOp::Delete),
    ]
}

/// Strategy for a transaction: 1 to 4 operations and an ending.
pub fn transaction_strategy() -> impl Strategy<Value = (Vec<BlobOp>, Ending)> {
    (
        prop::collection::vec(blob_op_strategy(), 1..5),
        prop_oneof![3 => Just(Ending::Commit), 1 => Just(Ending::Rollback)],
    )
}

/// Strategy for a history of transactions against one blob.
pub fn history_strategy() -> impl Strategy<Value = Vec<(Vec<BlobOp>, Ending)>> {
    prop::collection::vec(transaction_strategy(), 1..8)
}

/// Expected committed content after replaying `history` from `initial`.
///
/// Returns `(normal, backup)`: what `read` and `read_backup` should see.
pub fn expected_after(
    initial: Option<Vec<u8>>,
    history: &[(Vec<BlobOp>, Ending)],
) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let mut normal = initial;
    let mut backup = None;
    for (ops, ending) in history {
        if *ending == Ending::Rollback {
            continue;
        }
        match ops.last() {
            Some(BlobOp::Write(content)) => {
                backup = normal.replace(content.clone());
            }
            Some(BlobOp::Delete) if normal.is_some() => backup = normal.take(),
            Some(BlobOp::Delete) | None => {}
        }
    }
    (normal, backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_after_tracks_rotation() {
        let history = vec![
            (vec![BlobOp::Write(b"v1".to_vec())], Ending::Commit),
            (vec![BlobOp::Write(b"v2".to_vec())], Ending::Commit),
            (vec![BlobOp::Write(b"v3".to_vec())], Ending::Rollback),
        ];
        let (normal, backup) = expected_after(None, &history);
        assert_eq!(normal, Some(b"v2".to_vec()));
        assert_eq!(backup, Some(b"v1".to_vec()));
    }

    #[test]
    fn delete_without_content_keeps_backup() {
        let history = vec![
            (vec![BlobOp::Write(b"v1".to_vec())], Ending::Commit),
            (vec![BlobOp::Delete], Ending::Commit),
            (vec![BlobOp::Delete], Ending::Commit),
        ];
        assert_eq!(expected_after(None, &history), (None, Some(b"v1".to_vec())));
    }

    proptest! {
        #[test]
        fn generated_keys_are_valid(key in blob_key_strategy()) {
            prop_assert!(!key.object_type.as_str().is_empty());
            prop_assert!(key.object_id.as_u64() < 64);
        }
    }
}
