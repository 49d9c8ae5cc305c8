//! Command-line interface
//!
//! - init: create the object store and journal directories
//! - records: print recovery records
//! - scan: run one recovery scan
//! - recover / forget: resolve a heuristic transaction
//! - simulate: commit one transaction, optionally halting mid-protocol
//! - serve: periodic recovery plus the recovery listener

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{forget, init, records, recover, run, run_command, scan, serve, simulate};
pub use config::{Config, RecoverySection, RemoteParticipant, JOURNAL_DIR};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::write_response;
