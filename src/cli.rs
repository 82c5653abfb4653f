//! CLI struct definitions for the `taskvault` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(
    name = "taskvault",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect and repair an integrity-verified task vault."
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./taskvault.toml when present).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Storage root; overrides `root_dir` from the config file.
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// List initiatives in the vault.
    Initiatives,
    /// List tasks of one initiative.
    Tasks {
        #[clap(long)]
        initiative: String,
    },
    /// Check every signature; exits non-zero when anything fails.
    Verify {
        /// Limit the sweep to one initiative.
        #[clap(long)]
        initiative: Option<String>,
    },
    /// Replay an initiative's journal.
    Journal {
        #[clap(long)]
        initiative: String,
        /// Only show entries still pending.
        #[clap(long)]
        pending: bool,
    },
    /// Settle pending journal entries whose writes landed.
    Recover,
    /// Check stored dependency contracts for cycles and date-order violations.
    Deps {
        #[clap(long)]
        initiative: String,
    },
}
