//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ripper_core::{MediaType, Provider};

/// Resolve, download and organize music from streaming providers.
#[derive(Parser, Debug)]
#[command(name = "ripper")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/ripper/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Download folder, overriding `downloads.folder`
    #[arg(long, value_name = "DIR", global = true)]
    pub folder: Option<PathBuf>,

    /// Neither consult nor update the download ledger
    #[arg(long, global = true)]
    pub no_db: bool,

    /// Maximum attempts per track for transient failures (1-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10), global = true)]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download items from provider URLs (reads stdin when none are given)
    Url {
        urls: Vec<String>,
    },

    /// Download one item by provider id
    Id {
        provider: Provider,
        media_type: MediaType,
        id: String,
    },

    /// Search a provider and print the raw JSON results
    Search {
        provider: Provider,
        media_type: MediaType,
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List items recorded as permanently failed
    Failed,
}
