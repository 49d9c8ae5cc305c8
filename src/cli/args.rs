//! CLI argument definitions using clap
//!
//! Commands:
//! - xacoord init --config <path>
//! - xacoord records --config <path>
//! - xacoord scan --config <path>
//! - xacoord recover --config <path> --xid <xid>
//! - xacoord forget --config <path> --xid <xid>
//! - xacoord simulate --config <path> [--participants <n>]
//! - xacoord serve --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// xacoord - two-phase commit coordinator with crash recovery
#[derive(Parser, Debug)]
#[command(name = "xacoord")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the object store and participant journal directories
    Init {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,
    },

    /// Print every recovery record
    Records {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,
    },

    /// Run one recovery scan and print its report
    Scan {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,
    },

    /// Reclassify a heuristic transaction so the next scan finishes it
    Recover {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,

        /// Transaction id as printed by `records`
        #[arg(long)]
        xid: String,
    },

    /// Forget a heuristic transaction and remove its record
    Forget {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,

        #[arg(long)]
        xid: String,
    },

    /// Commit one transaction across journaled participants.
    /// Honours XACOORD_HALT_POINT.
    Simulate {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,

        /// Number of local journaled participants
        #[arg(long, default_value_t = 2)]
        participants: usize,
    },

    /// Run periodic recovery and the recovery listener until interrupted
    Serve {
        #[arg(long, default_value = "./xacoord.json")]
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
