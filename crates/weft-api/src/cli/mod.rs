//! CLI command definitions for the `weft` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod demo;
pub mod file;
pub mod inspect;
pub mod run;
pub mod templates;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Decompose workflow DAGs into queued jobs joined by completion barriers.
#[derive(Parser)]
#[command(name = "weft", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to `~/.weft/weft.toml`).
    #[arg(long, global = true, env = "WEFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans with the OpenTelemetry stdout exporter.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that a workflow file decodes into a valid DAG.
    Validate {
        /// Workflow file (JSON, or YAML for .yaml/.yml).
        file: PathBuf,
    },

    /// Show the structure of a workflow file.
    Inspect {
        /// Workflow file (JSON, or YAML for .yaml/.yml).
        file: PathBuf,
    },

    /// Run a workflow in-process against the built-in demo tasks.
    Run {
        /// Workflow file to run.
        #[arg(conflicts_with = "template", required_unless_present = "template")]
        file: Option<PathBuf>,

        /// Run a built-in template instead of a file.
        #[arg(long, short)]
        template: Option<String>,

        /// Template parameter as key=value (value parsed as JSON when possible).
        #[arg(long = "param", short = 'p', requires = "template")]
        params: Vec<String>,
    },

    /// List the built-in workflow templates.
    Templates,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
