//! Input parsing: provider URLs and free text containing them.
//!
//! # Example
//!
//! ```
//! use ripper_core::parser::{ParsedUrl, parse_reference_url};
//! use ripper_core::{MediaType, Provider, Reference};
//!
//! let parsed = parse_reference_url("https://www.deezer.com/en/album/302127").unwrap();
//! assert_eq!(
//!     parsed,
//!     ParsedUrl::Reference(Reference::new(Provider::Deezer, MediaType::Album, "302127"))
//! );
//! ```

mod error;
mod url;

pub use error::{MAX_URL_LENGTH, ParseError};
pub use url::{ParsedUrl, extract_urls, parse_reference_url};
