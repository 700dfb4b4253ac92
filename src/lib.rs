//! Ripper Core Library
//!
//! Resolves references to music on streaming providers (Qobuz, Tidal,
//! Deezer, SoundCloud) into trees of albums and tracks, downloads every
//! track at the best quality the account allows, and remembers what it
//! already fetched.
//!
//! # Architecture
//!
//! - [`client`] - per-provider API clients behind [`ClientCapability`]
//! - [`media`] - references, parsed metadata and the resolved media tree
//! - [`resolve`] - reference to tree resolution with ledger-based skipping
//! - [`rip`] - the per-track download pipeline (folder, bytes, tags)
//! - [`download`] - byte retrieval, retries and rate limiting
//! - [`orchestrator`] - per-provider scheduling and the run summary
//! - [`ledger`] / [`db`] - persistent succeeded/failed records in `SQLite`
//! - [`parser`] - provider URL recognition
//! - [`config`] - TOML configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod db;
pub mod download;
pub mod ledger;
pub mod media;
pub mod orchestrator;
pub mod parser;
pub mod resolve;
pub mod rip;

// Re-export commonly used types
pub use client::{ClientCapability, ClientError, build_clients};
pub use config::{Config, ConfigError};
pub use db::Database;
pub use download::{Downloadable, FailureType, HttpClient, RateLimiter, RetryPolicy};
pub use ledger::{FailedRecord, Ledger, LedgerError};
pub use media::{MediaType, Provider, Reference, Resolution, ResolvedMedia, SkipReason, Track};
pub use orchestrator::{
    FailureReason, ItemOutcome, ItemStatus, Orchestrator, OrchestratorError, RunSummary,
};
pub use parser::{ParseError, ParsedUrl, extract_urls, parse_reference_url};
pub use resolve::{ResolveError, Resolver};
pub use rip::{Rip, RipContext, RipError, RipState};
