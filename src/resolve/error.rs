//! Resolution error types.

use thiserror::Error;

use crate::client::ClientError;
use crate::media::{MetadataError, Reference};

/// Errors that turn a reference (or one child of a composite) into a
/// `Failed` resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The provider call itself failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The provider answered but the response could not be mapped.
    #[error("cannot map metadata for {reference}: {source}")]
    Metadata {
        reference: Reference,
        #[source]
        source: MetadataError,
    },

    /// The provider's worker pool was closed mid-resolution.
    #[error("worker pool closed before {reference} could be resolved")]
    PoolClosed { reference: Reference },
}

impl ResolveError {
    /// Creates a metadata mapping error for `reference`.
    pub fn metadata(reference: &Reference, source: MetadataError) -> Self {
        Self::Metadata {
            reference: reference.clone(),
            source,
        }
    }

    /// Returns true if this failure ends the provider's run.
    #[must_use]
    pub fn is_fatal_for_provider(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_fatal_for_provider())
    }

    /// Returns true if the item itself is at fault, i.e. retrying later
    /// with the same credentials will not help.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Client(e) => !e.is_fatal_for_provider() && !e.is_transient(),
            Self::Metadata { .. } => true,
            Self::PoolClosed { .. } => false,
        }
    }
}
