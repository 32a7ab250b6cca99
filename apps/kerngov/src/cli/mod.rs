//! # kerngov CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Write a default configuration and create the stores
//! - `apply` - Apply (or dry-run) operation documents
//! - `change` - Execute a change record step by step
//! - `status` - Ledger and registry summary
//! - `show` - Print one kernel
//! - `replay` - Rebuild kernels from the ledger
//! - `validate` - NRVV validation of one kernel
//! - `search` - Filter kernels
//! - `transitions` - List maturity transition requests
//! - `reevaluations` - List reevaluation records
//! - `review-evidence` - Record a verdict on an evidence item
//! - `verify` - Compare the registry against a replay of the ledger
//! - `rebuild-registry` - Overwrite the registry from the ledger
//! - `export-registry` - Write a registry snapshot built from the ledger

mod commands;

use clap::{Parser, Subcommand};
use kerngov_core::{Actor, KernelError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// kerngov - Kernel governance engine
///
/// Every change to a Kernel is gated, appended to the ledger and projected
/// into the registry.
#[derive(Parser, Debug)]
#[command(name = "kerngov")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "kerngov.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file and create empty stores
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Apply operations from a JSON file (one object or an array)
    Apply {
        /// Path to the operation document
        #[arg(short, long)]
        file: PathBuf,

        /// Evaluate validation and gates without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Execute a change record; step results are written back to the file
    Change {
        /// Path to the change record document
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show ledger and registry status
    Status,

    /// Print one kernel
    Show {
        /// Kernel id
        kernel_id: String,
    },

    /// Replay the ledger into kernels
    Replay {
        /// Only replay this kernel
        #[arg(short, long)]
        kernel: Option<String>,
    },

    /// Run NRVV validation on one kernel
    Validate {
        /// Kernel id
        kernel_id: String,
    },

    /// Search kernels (all filters must match)
    Search {
        #[arg(short, long)]
        maturity: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(short, long)]
        owner: Option<String>,

        #[arg(short, long)]
        tag: Option<String>,

        /// Case-insensitive substring of the statement or id
        #[arg(long)]
        text: Option<String>,
    },

    /// List maturity transition requests
    Transitions {
        #[arg(short, long)]
        kernel: Option<String>,
    },

    /// List reevaluation records
    Reevaluations {
        #[arg(short, long)]
        kernel: Option<String>,
    },

    /// Record a reviewer's verdict on an evidence item
    ReviewEvidence {
        kernel_id: String,
        evidence_id: String,

        /// verified, rejected or unverified
        #[arg(short, long)]
        status: String,

        #[arg(short, long)]
        reviewer: String,

        /// Reviewer's role (required unless solo mode is on)
        #[arg(long)]
        role: Option<String>,

        /// Tracking-issue reference for the review
        #[arg(short, long)]
        issue: String,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Compare the registry with a replay of the ledger
    Verify,

    /// Overwrite the registry with a replay of the ledger
    RebuildRegistry,

    /// Write a registry document built purely from the ledger
    ExportRegistry {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), KernelError> {
    let config = cli.config.as_path();
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(config, force),
        Some(Commands::Apply { file, dry_run }) => cmd_apply(config, json_mode, &file, dry_run),
        Some(Commands::Change { file }) => cmd_change(config, json_mode, &file),
        Some(Commands::Status) | None => cmd_status(config, json_mode),
        Some(Commands::Show { kernel_id }) => cmd_show(config, json_mode, &kernel_id),
        Some(Commands::Replay { kernel }) => cmd_replay(config, json_mode, kernel.as_deref()),
        Some(Commands::Validate { kernel_id }) => cmd_validate(config, json_mode, &kernel_id),
        Some(Commands::Search {
            maturity,
            category,
            owner,
            tag,
            text,
        }) => cmd_search(config, json_mode, maturity, category, owner, tag, text),
        Some(Commands::Transitions { kernel }) => {
            cmd_transitions(config, json_mode, kernel.as_deref())
        }
        Some(Commands::Reevaluations { kernel }) => {
            cmd_reevaluations(config, json_mode, kernel.as_deref())
        }
        Some(Commands::ReviewEvidence {
            kernel_id,
            evidence_id,
            status,
            reviewer,
            role,
            issue,
            note,
        }) => {
            let mut actor = Actor::new(reviewer, issue);
            actor.role = role;
            cmd_review_evidence(
                config,
                json_mode,
                &kernel_id,
                &evidence_id,
                &status,
                &actor,
                note.as_deref(),
            )
        }
        Some(Commands::Verify) => cmd_verify(config, json_mode),
        Some(Commands::RebuildRegistry) => cmd_rebuild_registry(config),
        Some(Commands::ExportRegistry { output }) => cmd_export_registry(config, &output),
    }
}
