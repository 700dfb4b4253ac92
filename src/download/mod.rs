//! Byte retrieval: the `Downloadable` capability and its provider variants.
//!
//! This module provides everything between "a negotiated quality" and "a
//! file on disk":
//!
//! - [`Downloadable`] and the atomic [`download_to`] helper
//! - Plain HTTP ([`BasicDownloadable`]), Deezer striped-stream decryption
//!   ([`DeezerDownloadable`]) and HLS playlists ([`HlsDownloadable`])
//! - The shared [`HttpClient`], retry classification and the per-provider
//!   [`RateLimiter`]
//!
//! # Example
//!
//! ```no_run
//! use ripper_core::download::{BasicDownloadable, HttpClient, download_to};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let file = BasicDownloadable::new(HttpClient::new(), "https://cdn.example.com/a.flac", "flac");
//! let bytes = download_to(&file, Path::new("./01. Song.flac")).await?;
//! println!("Downloaded {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod basic;
mod constants;
mod deezer;
mod downloadable;
mod error;
mod hls;
mod http;
pub mod rate_limiter;
mod retry;

pub use basic::BasicDownloadable;
pub use deezer::{DeezerDownloadable, encrypted_file_url};
pub use downloadable::{Downloadable, download_to};
pub use error::DownloadError;
pub use hls::HlsDownloadable;
pub use http::{BROWSER_USER_AGENT, HttpClient, header_content_length, send_checked, stream_body};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
