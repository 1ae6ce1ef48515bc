//! Verify command implementation.

use super::Target;
use txstore_core::repair::{scan, ObjectState, ScanReport};

const STATES: [ObjectState; 5] = [
    ObjectState::Clean,
    ObjectState::Deleted,
    ObjectState::OrphanStaged,
    ObjectState::InterruptedRotation,
    ObjectState::StagedOnly,
];

/// Runs the verify command. Returns false if any object is split.
pub fn run(target: &Target, format: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let report = scan(&target.store, &target.layout, &target.object_type)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(target, &report),
    }
    Ok(report.is_consistent())
}

fn print_text(target: &Target, report: &ScanReport) {
    println!(
        "Verifying {} objects at {:?}",
        target.object_type, target.path
    );
    println!();
    println!("Objects checked: {}", report.objects.len());
    for state in STATES {
        let count = report.count(state);
        if count > 0 {
            println!("  {:<22} {}", format!("{state:?}:"), count);
        }
    }

    let split: Vec<_> = report.split().collect();
    if !split.is_empty() {
        println!();
        println!("Split objects:");
        for entry in &split {
            println!("  {} {:?}", entry.id, entry.state);
        }
    }

    println!();
    if split.is_empty() {
        println!("✓ Verification passed");
    } else {
        println!("✗ Verification failed: run `txstore repair`");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::store_with;

    #[test]
    fn committed_states_pass() {
        let (_dir, target) = store_with(&[
            ("blobs/document/1", b"a"),
            ("blobs/document/2.bak", b"b"),
        ]);
        assert!(run(&target, "json").unwrap());
    }

    #[test]
    fn interrupted_rotation_fails() {
        let (_dir, target) = store_with(&[
            ("blobs/document/1.tmp", b"new"),
            ("blobs/document/1.bak", b"old"),
        ]);
        assert!(!run(&target, "text").unwrap());
    }
}
