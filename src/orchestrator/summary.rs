//! Per-item outcomes and the run summary.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::client::ClientError;
use crate::download::{DownloadError, FailureType, classify_error};
use crate::media::{MediaType, MetadataError, Provider, Reference, SkipReason};
use crate::resolve::ResolveError;
use crate::rip::RipError;

/// Why an item failed, coarse enough to count and report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MissingCredentials,
    Authentication,
    NonStreamable,
    TransientNetwork,
    Resolution,
    Postprocess,
    Io,
}

impl FailureReason {
    #[must_use]
    pub fn from_client(error: &ClientError) -> Self {
        match error {
            ClientError::MissingCredentials { .. } => Self::MissingCredentials,
            e if e.is_fatal_for_provider() => Self::Authentication,
            ClientError::NonStreamable { .. } => Self::NonStreamable,
            e if e.is_transient() => Self::TransientNetwork,
            _ => Self::Resolution,
        }
    }

    #[must_use]
    pub fn from_resolve(error: &ResolveError) -> Self {
        match error {
            ResolveError::Client(e) => Self::from_client(e),
            ResolveError::Metadata {
                source: MetadataError::NotStreamable { .. },
                ..
            } => Self::NonStreamable,
            ResolveError::Metadata { .. } => Self::Resolution,
            // The pool is only closed when the provider's session died.
            ResolveError::PoolClosed { .. } => Self::Authentication,
        }
    }

    #[must_use]
    pub fn from_rip(error: &RipError) -> Self {
        match error {
            RipError::Client(e) => Self::from_client(e),
            RipError::Download(DownloadError::Io { .. }) | RipError::Directory { .. } => Self::Io,
            RipError::Download(e) => match classify_error(e) {
                FailureType::Transient | FailureType::RateLimited => Self::TransientNetwork,
                FailureType::Permanent | FailureType::NeedsAuth => Self::NonStreamable,
            },
            RipError::Postprocess(_) | RipError::InvalidTransition { .. } => Self::Postprocess,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingCredentials => "missing credentials",
            Self::Authentication => "authentication error",
            Self::NonStreamable => "not streamable",
            Self::TransientNetwork => "network error",
            Self::Resolution => "resolution error",
            Self::Postprocess => "postprocess error",
            Self::Io => "io error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded { path: PathBuf },
    Skipped(SkipReason),
    Failed { reason: FailureReason, message: String },
}

/// Outcome for one leaf (or one composite that failed as a whole).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub provider: Provider,
    pub media_type: MediaType,
    pub id: String,
    pub status: ItemStatus,
    /// (submission index, leaf index) for stable ordering.
    pub(crate) position: (usize, usize),
}

impl ItemOutcome {
    pub(crate) fn new(reference: &Reference, status: ItemStatus, position: (usize, usize)) -> Self {
        Self {
            provider: reference.provider,
            media_type: reference.media_type,
            id: reference.id.clone(),
            status,
            position,
        }
    }

    pub(crate) fn failed(
        reference: &Reference,
        reason: FailureReason,
        message: impl Into<String>,
        position: (usize, usize),
    ) -> Self {
        Self::new(
            reference,
            ItemStatus::Failed {
                reason,
                message: message.into(),
            },
            position,
        )
    }

    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::new(self.provider, self.media_type, self.id.clone())
    }
}

/// Every outcome of one `submit`, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    outcomes: Vec<ItemOutcome>,
}

impl RunSummary {
    /// Sorts `outcomes` by submission position.
    #[must_use]
    pub fn new(mut outcomes: Vec<ItemOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.position);
        Self { outcomes }
    }

    #[must_use]
    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Succeeded { .. }))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Skipped(_)))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Failed outcomes with their reason and message.
    pub fn failures(&self) -> impl Iterator<Item = (&ItemOutcome, FailureReason, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            ItemStatus::Failed { reason, message } => Some((o, *reason, message.as_str())),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reference(id: &str) -> Reference {
        Reference::new(Provider::Qobuz, MediaType::Track, id)
    }

    #[test]
    fn test_summary_sorts_and_counts() {
        let summary = RunSummary::new(vec![
            ItemOutcome::failed(&reference("c"), FailureReason::NonStreamable, "geo", (1, 0)),
            ItemOutcome::new(
                &reference("a"),
                ItemStatus::Succeeded {
                    path: PathBuf::from("/m/a.flac"),
                },
                (0, 0),
            ),
            ItemOutcome::new(
                &reference("b"),
                ItemStatus::Skipped(SkipReason::AlreadyDownloaded),
                (0, 1),
            ),
        ]);

        let ids: Vec<&str> = summary.outcomes().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(summary.has_failures());
        assert_eq!(summary.to_string(), "1 succeeded, 1 skipped, 1 failed");

        let (outcome, reason, message) = summary.failures().next().unwrap();
        assert_eq!(outcome.id, "c");
        assert_eq!(reason, FailureReason::NonStreamable);
        assert_eq!(message, "geo");
    }

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            FailureReason::from_client(&ClientError::missing_credentials(Provider::Tidal, "x")),
            FailureReason::MissingCredentials
        );
        assert_eq!(
            FailureReason::from_client(&ClientError::InvalidAppSecret {
                provider: Provider::Qobuz
            }),
            FailureReason::Authentication
        );
        assert_eq!(
            FailureReason::from_client(&ClientError::api(Provider::Qobuz, 502, "bad gateway")),
            FailureReason::TransientNetwork
        );
        assert_eq!(
            FailureReason::from_rip(&RipError::from(DownloadError::timeout("https://cdn/x"))),
            FailureReason::TransientNetwork
        );
        assert_eq!(
            FailureReason::from_resolve(&ResolveError::metadata(
                &reference("t"),
                MetadataError::NotStreamable {
                    provider: Provider::Qobuz,
                    id: "t".into()
                }
            )),
            FailureReason::NonStreamable
        );
    }
}
