//! txstore CLI
//!
//! Operator tools for staged-file blob directories.
//!
//! # Commands
//!
//! - `inspect` - List every object's files with sizes and digests
//! - `verify` - Report objects left split by an interrupted commit
//! - `repair` - Complete interrupted rotations and drop orphaned staged files
//!   when asked to
//!
//! The tools assume no transaction is using the directory while they run.

mod commands;

use clap::{Parser, Subcommand};
use commands::Target;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use txstore_core::repair::RepairPolicy;

/// txstore command-line tools.
#[derive(Parser)]
#[command(name = "txstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the file store root directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Object type to work on
    #[arg(global = true, short = 't', long = "type")]
    object_type: Option<String>,

    /// Layout root inside the file store
    #[arg(global = true, short, long, default_value = "")]
    root: String,

    /// Number of bucket subdirectories of the layout
    #[arg(global = true, short, long)]
    sub_dirs: Option<NonZeroU32>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List objects and their files
    Inspect {
        /// Compute SHA-256 digests of every file
        #[arg(short, long)]
        digests: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that every object is in a committed state
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Fix objects left split by an interrupted commit
    Repair {
        /// Promote the staged content of interrupted rotations
        #[arg(long)]
        promote_interrupted: bool,

        /// Also remove staged files that cannot be promoted
        #[arg(long)]
        discard_orphans: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

impl Cli {
    fn target(&self) -> Result<Target, Box<dyn std::error::Error>> {
        let path = self.path.clone().ok_or("Store path required (--path)")?;
        let object_type = self
            .object_type
            .clone()
            .ok_or("Object type required (--type)")?;
        Target::open(&path, &object_type, &self.root, self.sub_dirs)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Inspect { digests, format } => {
            commands::inspect::run(&cli.target()?, *digests, format)?;
        }
        Commands::Verify { format } => {
            if !commands::verify::run(&cli.target()?, format)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Repair {
            promote_interrupted,
            discard_orphans,
            dry_run,
            format,
        } => {
            let policy = RepairPolicy::new()
                .promote_interrupted(*promote_interrupted)
                .discard_orphans(*discard_orphans)
                .dry_run(*dry_run);
            commands::repair::run(&cli.target()?, &policy, format)?;
        }
        Commands::Version => {
            println!("txstore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sub_dirs_is_rejected() {
        assert!(Cli::try_parse_from(["txstore", "--sub-dirs", "0", "version"]).is_err());

        let cli = Cli::try_parse_from(["txstore", "--sub-dirs", "16", "version"]).unwrap();
        assert_eq!(cli.sub_dirs.map(NonZeroU32::get), Some(16));
    }

    #[test]
    fn repair_flags_default_to_off() {
        let cli = Cli::try_parse_from(["txstore", "repair"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Repair {
                promote_interrupted: false,
                discard_orphans: false,
                dry_run: false,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["txstore", "repair", "--promote-interrupted"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Repair {
                promote_interrupted: true,
                ..
            }
        ));
    }
}
