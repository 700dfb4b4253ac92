//! `requests_per_minute` enforcement for provider APIs.
//!
//! [`RateLimiter`] keeps, per provider, the instants of the grants made in the
//! last window. A request goes through while fewer than `limit` grants are in
//! the window; otherwise the caller sleeps until the oldest one ages out.
//! Qobuz waiting on its budget never holds up a Deezer request.
//!
//! ```
//! use std::sync::Arc;
//! use ripper_core::download::RateLimiter;
//! use ripper_core::Provider;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new([(Provider::Qobuz, 60)]));
//!
//! limiter.acquire(Provider::Qobuz).await;
//! limiter.acquire(Provider::Deezer).await;
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::media::Provider;

/// Rolling window the per-minute limits apply to.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Total wait per provider past which every further delay is logged at warn.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Sliding-window limiter shared (behind an `Arc`) by every client of a run.
#[derive(Debug)]
pub struct RateLimiter {
    /// Requests allowed per window, for providers that are limited at all.
    limits: HashMap<Provider, u32>,

    window: Duration,

    /// Entries are cloned out so no shard lock is held across an await.
    providers: DashMap<Provider, Arc<ProviderWindow>>,
}

#[derive(Debug, Default)]
struct ProviderWindow {
    log: Mutex<GrantLog>,

    /// Milliseconds this provider has spent waiting so far.
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct GrantLog {
    /// Grant times inside the current window, oldest first.
    grants: VecDeque<Instant>,
    /// Server-mandated pause (Retry-After) in effect until this instant.
    blocked_until: Option<Instant>,
}

impl GrantLog {
    /// Records a grant and returns `None`, or returns how long to wait.
    fn try_grant(&mut self, now: Instant, limit: u32, window: Duration) -> Option<Duration> {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Some(until - now);
            }
            self.blocked_until = None;
        }

        while let Some(&oldest) = self.grants.front() {
            if now.duration_since(oldest) >= window {
                self.grants.pop_front();
            } else {
                break;
            }
        }

        if self.grants.len() < limit as usize {
            self.grants.push_back(now);
            return None;
        }

        Some(self.grants.front().map_or(Duration::ZERO, |oldest| {
            window.saturating_sub(now.duration_since(*oldest))
        }))
    }
}

impl ProviderWindow {
    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter with requests-per-minute limits per provider.
    ///
    /// Providers that are absent, or whose limit is zero, are not limited.
    #[must_use]
    pub fn new(limits: impl IntoIterator<Item = (Provider, u32)>) -> Self {
        Self::with_window(limits, RATE_WINDOW)
    }

    /// Creates a limiter over a custom window length.
    #[must_use]
    #[instrument(skip(limits), fields(window_ms = window.as_millis()))]
    pub fn with_window(limits: impl IntoIterator<Item = (Provider, u32)>, window: Duration) -> Self {
        let limits: HashMap<Provider, u32> =
            limits.into_iter().filter(|(_, limit)| *limit > 0).collect();
        debug!(limited = limits.len(), "creating rate limiter");
        Self {
            limits,
            window,
            providers: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new([])
    }

    /// Returns whether no provider is limited.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.limits.is_empty()
    }

    /// Returns the per-window limit for `provider`, if it is limited.
    #[must_use]
    pub fn limit(&self, provider: Provider) -> Option<u32> {
        self.limits.get(&provider).copied()
    }

    fn state(&self, provider: Provider) -> Arc<ProviderWindow> {
        self.providers
            .entry(provider)
            .or_insert_with(|| Arc::new(ProviderWindow::default()))
            .clone()
    }

    /// Waits until `provider` may receive another request, then records it.
    ///
    /// Blocks (asynchronously) rather than failing.
    #[instrument(skip(self))]
    pub async fn acquire(&self, provider: Provider) {
        let Some(limit) = self.limit(provider) else {
            self.wait_blocked(provider).await;
            return;
        };

        let state = self.state(provider);

        loop {
            let wait = {
                let mut log = state.log.lock().await;
                log.try_grant(Instant::now(), limit, self.window)
            };
            let Some(delay) = wait else {
                return;
            };

            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                provider = %provider,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    provider = %provider,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider lowering requests_per_minute"
                );
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Pauses `provider` after it answered 429 with a `Retry-After`.
    ///
    /// Applies to unlimited providers too.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, provider: Provider, delay: Duration) {
        let state = self.state(provider);
        let until = Instant::now() + delay;
        {
            let mut log = state.log.lock().await;
            if log.blocked_until.is_none_or(|current| current < until) {
                log.blocked_until = Some(until);
            }
        }
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            provider = %provider,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                provider = %provider,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - provider may be under heavy load"
            );
        }
    }

    /// Server-mandated pause applied even to unlimited providers.
    async fn wait_blocked(&self, provider: Provider) {
        let Some(state) = self.providers.get(&provider).map(|s| s.clone()) else {
            return;
        };
        let until = state.log.lock().await.blocked_until;
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }
    }
}

/// Reads a `Retry-After` header, either delta-seconds or an HTTP-date.
///
/// A date in the past means "now". Values beyond an hour are clamped so a
/// misbehaving API cannot stall the whole run.
///
/// ```
/// use std::time::Duration;
/// use ripper_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    let delay = match value.parse::<u64>() {
        Ok(seconds) => Duration::from_secs(seconds),
        Err(_) => {
            let Ok(at) = httpdate::parse_http_date(value) else {
                debug!(value, "ignoring unparseable Retry-After");
                return None;
            };
            at.duration_since(std::time::SystemTime::now())
                .unwrap_or(Duration::ZERO)
        }
    };
    if delay > MAX_RETRY_AFTER {
        warn!(requested_secs = delay.as_secs(), "clamping Retry-After to one hour");
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}
