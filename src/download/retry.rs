//! Backoff policy for track downloads that fail transiently.
//!
//! A failed attempt is first classified into a [`FailureType`] by
//! [`classify_error`]. [`RetryPolicy::should_retry`] then decides whether the
//! rip gets another attempt and how long it sleeps before asking the provider
//! for a fresh URL.
//!
//! ```
//! use ripper_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::with_max_attempts(3);
//! let error = DownloadError::http_status("https://cdn.example.com/track.flac", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => println!("attempt {attempt} in {delay:?}"),
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Attempts per track, the first one included.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const MAX_JITTER_MS: u64 = 500;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Connection trouble, timeouts and server errors.
    Transient,
    /// The item or request itself is bad; another attempt gets the same answer.
    Permanent,
    /// The session is no longer accepted.
    NeedsAuth,
    /// The CDN or API asked us to slow down.
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `attempt`.
    Retry { delay: Duration, attempt: u32 },
    DoNotRetry { reason: String },
}

/// Exponential backoff with jitter:
/// `min(base * multiplier^(attempt-1), max) + rand(0..=500ms)`.
///
/// With the defaults a track gets three attempts, sleeping about 1s and then
/// 2s between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_MULTIPLIER,
        )
    }
}

impl RetryPolicy {
    /// `max_attempts` below one is raised to one.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier,
        }
    }

    /// Default delays with `downloads.max_retries` attempts.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_MULTIPLIER,
        )
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what follows failed attempt number `attempt` (1-based).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        let reason = match failure_type {
            FailureType::Permanent => Some("permanent failure".to_string()),
            FailureType::NeedsAuth => Some("session rejected, needs a new login".to_string()),
            FailureType::Transient | FailureType::RateLimited if attempt >= self.max_attempts => {
                Some(format!("{} attempts exhausted", self.max_attempts))
            }
            FailureType::Transient | FailureType::RateLimited => None,
        };
        if let Some(reason) = reason {
            return RetryDecision::DoNotRetry { reason };
        }

        let delay = self.backoff(attempt) + jitter();
        debug!(attempt, delay_ms = delay.as_millis(), "will retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff before the attempt after `attempt`, without jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS))
}

/// Classifies a failed transfer.
///
/// Every retry renegotiates the stream URL, so an expired signed URL
/// (typically a 403 or 410 from the CDN) is not worth a second try with the
/// same track: the provider hands out the same restriction again.
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => match *status {
            401 => FailureType::NeedsAuth,
            429 => FailureType::RateLimited,
            408 | 425 | 500..=599 => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        DownloadError::Timeout { .. } => FailureType::Transient,
        // A request that could not even be built fails the same way every time.
        DownloadError::Network { source, .. } if source.is_builder() => FailureType::Permanent,
        DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::NonStreamable { .. }
        | DownloadError::Decrypt { .. } => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0)
    }

    // ==================== Backoff Tests ====================

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = fast();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(60), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_survives_overflowing_exponent() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1), Duration::from_secs(9), 10.0);
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(9));
    }

    #[test]
    fn test_retry_delay_includes_bounded_jitter() {
        for _ in 0..50 {
            let RetryDecision::Retry { delay, attempt } =
                fast().should_retry(FailureType::Transient, 2)
            else {
                panic!("expected a retry");
            };
            assert_eq!(attempt, 3);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_max_attempts_floor_and_default() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_MAX_RETRIES);
    }

    // ==================== Decision Tests ====================

    #[test]
    fn test_transient_retries_until_exhausted() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        let RetryDecision::DoNotRetry { reason } = policy.should_retry(FailureType::Transient, 3)
        else {
            panic!("expected to give up");
        };
        assert!(reason.contains("exhausted"));
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy::with_max_attempts(1);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_permanent_and_auth_never_retry() {
        let policy = fast();
        for failure in [FailureType::Permanent, FailureType::NeedsAuth] {
            assert!(matches!(
                policy.should_retry(failure, 1),
                RetryDecision::DoNotRetry { .. }
            ));
        }
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (401, FailureType::NeedsAuth),
            (403, FailureType::Permanent),
            (404, FailureType::Permanent),
            (408, FailureType::Transient),
            (410, FailureType::Permanent),
            (429, FailureType::RateLimited),
            (451, FailureType::Permanent),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
            (599, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = DownloadError::http_status("https://cdn.example.com/a.flac", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_local_and_item_errors() {
        assert_eq!(
            classify_error(&DownloadError::timeout("https://cdn.example.com")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::non_streamable("File not found.")),
            FailureType::Permanent
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            classify_error(&DownloadError::io("/music/a.flac", io)),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_classify_unbuildable_request_is_permanent() {
        let source = reqwest::Client::new().get("not a url").build().unwrap_err();
        let error = DownloadError::network("not a url", source);
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }
}
