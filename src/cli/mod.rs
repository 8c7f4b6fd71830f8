//! `objstore` command line
//!
//! - check-config: load and validate a config file, print it resolved
//! - dump-journal: print a journal file's header and records
//! - bench: drive a synthetic multi-stream workload and print counters

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{bench, check_config, dump_journal, run, run_command, BenchOptions};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::write_json;
