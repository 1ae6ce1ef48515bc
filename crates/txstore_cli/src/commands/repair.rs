//! Repair command implementation.

use super::Target;
use tracing::info;
use txstore_core::repair::{repair, scan, RepairAction, RepairPolicy, RepairReport};

/// Runs the repair command.
pub fn run(
    target: &Target,
    policy: &RepairPolicy,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(target, policy)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

/// Scans the target and repairs it under `policy`.
pub fn execute(
    target: &Target,
    policy: &RepairPolicy,
) -> Result<RepairReport, Box<dyn std::error::Error>> {
    let scanned = scan(&target.store, &target.layout, &target.object_type)?;
    info!(
        object_type = %target.object_type,
        objects = scanned.objects.len(),
        split = scanned.split().count(),
        "scan complete"
    );
    Ok(repair(&target.store, &target.layout, &scanned, policy)?)
}

fn print_text(report: &RepairReport) {
    if !report.applied {
        println!("Dry run - no changes made");
        println!();
    }

    if report.actions.is_empty() {
        println!("Nothing to repair");
    }
    for action in &report.actions {
        match action {
            RepairAction::Promote { id, from, to } => {
                println!("  {}: promote {} -> {}", id, from, to)
            }
            RepairAction::DiscardStaged { id, path } => {
                println!("  {}: discard {}", id, path)
            }
        }
    }

    if !report.skipped.is_empty() {
        println!();
        println!(
            "Skipped {} split object(s) (use --promote-interrupted or --discard-orphans)",
            report.skipped.len()
        );
    }
}
