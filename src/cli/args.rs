//! CLI argument definitions using clap
//!
//! Commands:
//! - objstore check-config --config <path>
//! - objstore dump-journal --journal <path>
//! - objstore bench --config <path> [--ops N] [--streams S] [--bytes B]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// objstore - transaction sequencing and journaling engine
#[derive(Parser, Debug)]
#[command(name = "objstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./objstore.json")]
        config: PathBuf,
    },

    /// Print a journal file's header and one line per record
    DumpJournal {
        /// Path to the journal file
        #[arg(long)]
        journal: PathBuf,
    },

    /// Run a synthetic workload against the in-memory backend
    Bench {
        /// Path to configuration file
        #[arg(long, default_value = "./objstore.json")]
        config: PathBuf,

        /// Ops per stream
        #[arg(long, default_value_t = 10_000)]
        ops: u64,

        /// Concurrent sequencers
        #[arg(long, default_value_t = 4)]
        streams: usize,

        /// Payload bytes per op
        #[arg(long, default_value_t = 4096)]
        bytes: usize,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
