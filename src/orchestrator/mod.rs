//! Run orchestration: per-provider login, resolution, scheduling and the
//! run summary.
//!
//! # Overview
//!
//! [`Orchestrator::submit`] groups references by provider and drives each
//! provider independently:
//!
//! 1. Log in. A failure fails every reference of that provider.
//! 2. Resolve each reference into leaves (see [`crate::resolve`]). With
//!    concurrency on, all of a provider's references resolve together;
//!    otherwise one after another.
//! 3. Acquire a [`WorkerPool`] permit, then spawn a [`Rip`] per leaf. The
//!    permit is taken before spawning, so a pool of one runs leaves in
//!    submission order.
//! 4. A rip that dies on an authentication error cancels every leaf of the
//!    provider that has not started yet.
//!
//! Outcomes are sorted by submission position, so the summary is the same
//! whatever the completion order.

mod pool;
mod summary;

pub use pool::{PoolPermit, WorkerPool};
pub use summary::{FailureReason, ItemOutcome, ItemStatus, RunSummary};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientCapability, ClientError, build_clients};
use crate::config::Config;
use crate::download::{HttpClient, RateLimiter, RetryPolicy};
use crate::ledger::Ledger;
use crate::media::{
    MediaType, Provider, Reference, Resolution, ResolvedMedia, SkipReason, Track,
};
use crate::resolve::Resolver;
use crate::rip::{ArtworkCache, PassthroughTagger, Rip, RipContext, TagConverter};

const CANCELLED_MESSAGE: &str = "cancelled after an authentication failure";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no client is configured for {provider}")]
    NoClient { provider: Provider },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Drives a run across every provider.
pub struct Orchestrator {
    config: Config,
    clients: HashMap<Provider, Arc<dyn ClientCapability>>,
    ledger: Arc<Ledger>,
    tagger: Arc<dyn TagConverter>,
    http: HttpClient,
    retry: Option<RetryPolicy>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.clients.keys().copied().collect();
        providers.sort();
        f.debug_struct("Orchestrator")
            .field("providers", &providers)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator over explicit clients.
    #[must_use]
    pub fn new(
        config: Config,
        clients: HashMap<Provider, Arc<dyn ClientCapability>>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            config,
            clients,
            ledger,
            tagger: Arc::new(PassthroughTagger),
            http: HttpClient::new(),
            retry: None,
        }
    }

    /// Orchestrator with production clients sharing one rate limiter built
    /// from each provider's `requests_per_minute`.
    #[must_use]
    pub fn from_config(config: Config, ledger: Arc<Ledger>) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            Provider::ALL.map(|p| (p, config.limits(p).requests_per_minute)),
        ));
        let clients = build_clients(&config, &limiter);
        Self::new(config, clients, ledger)
    }

    #[must_use]
    pub fn with_tagger(mut self, tagger: Arc<dyn TagConverter>) -> Self {
        self.tagger = tagger;
        self
    }

    /// Overrides the retry policy derived from `downloads.max_retries`.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    fn client(&self, provider: Provider) -> Result<&Arc<dyn ClientCapability>, OrchestratorError> {
        self.clients
            .get(&provider)
            .ok_or(OrchestratorError::NoClient { provider })
    }

    /// Raw search results; logs in first.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoClient`] for an unconfigured provider,
    /// or the client's login or search error.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        provider: Provider,
        media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, OrchestratorError> {
        let client = self.client(provider)?;
        client.login().await?;
        Ok(client.search(media_type, query, limit).await?)
    }

    /// Turns a provider page URL (a SoundCloud permalink) into a reference;
    /// logs in first.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoClient`] for an unconfigured provider,
    /// or the client's login or lookup error.
    #[instrument(skip(self))]
    pub async fn resolve_url(
        &self,
        provider: Provider,
        url: &str,
    ) -> Result<Reference, OrchestratorError> {
        let client = self.client(provider)?;
        client.login().await?;
        Ok(client.resolve_url(url).await?)
    }

    /// Resolves and downloads every reference. One item's failure never
    /// aborts the run.
    #[instrument(skip(self, references), fields(count = references.len()))]
    pub async fn submit(&self, references: Vec<Reference>) -> RunSummary {
        let mut by_provider: BTreeMap<Provider, Vec<(usize, Reference)>> = BTreeMap::new();
        for (index, reference) in references.into_iter().enumerate() {
            by_provider
                .entry(reference.provider)
                .or_default()
                .push((index, reference));
        }

        // Dropped at the end of the run, taking embed-only covers with it.
        let artwork = Arc::new(ArtworkCache::new(self.http.clone(), self.config.artwork.clone()));
        let runs = by_provider
            .into_iter()
            .map(|(provider, items)| self.run_provider(provider, items, &artwork));
        let outcomes: Vec<ItemOutcome> = join_all(runs).await.into_iter().flatten().collect();

        let summary = RunSummary::new(outcomes);
        info!(
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "run finished"
        );
        summary
    }

    #[instrument(skip(self, items, artwork), fields(provider = %provider, count = items.len()))]
    async fn run_provider(
        &self,
        provider: Provider,
        items: Vec<(usize, Reference)>,
        artwork: &Arc<ArtworkCache>,
    ) -> Vec<ItemOutcome> {
        let client = match self.client(provider) {
            Ok(client) => Arc::clone(client),
            Err(e) => {
                warn!(error = %e, "skipping provider");
                return fail_all(&items, FailureReason::MissingCredentials, &e.to_string());
            }
        };

        if let Err(e) = client.login().await {
            warn!(error = %e, "login failed");
            return fail_all(&items, FailureReason::from_client(&e), &e.to_string());
        }

        let limits = self.config.limits(provider);
        let pool = WorkerPool::new(limits.concurrency, limits.max_connections);
        debug!(pool = ?pool.size(), "provider session ready");

        let resolver = Resolver::new(Arc::clone(&client), Arc::clone(&self.ledger), pool.clone())
            .with_bypass_ledger(self.config.downloads.bypass_ledger);
        let mut ctx = RipContext::new(client, Arc::clone(&self.ledger), &self.config)
            .with_tagger(Arc::clone(&self.tagger))
            .with_artwork(Arc::clone(artwork));
        if let Some(retry) = &self.retry {
            ctx = ctx.with_retry_policy(retry.clone());
        }

        let mut scheduler = Scheduler {
            ctx,
            pool,
            cancelled: Arc::new(AtomicBool::new(false)),
            seen: HashSet::new(),
            outcomes: Vec::new(),
            tasks: Vec::new(),
        };

        if limits.concurrency {
            // Every reference resolves at once; leaves queue on the pool after.
            let resolved = join_all(
                items
                    .iter()
                    .map(|(_, reference)| resolver.resolve(reference)),
            )
            .await;
            for ((index, _), resolution) in items.iter().zip(resolved) {
                self.schedule(&mut scheduler, *index, resolution.into_leaves())
                    .await;
            }
        } else {
            for (index, reference) in items {
                if scheduler.cancelled.load(Ordering::SeqCst) {
                    scheduler.outcomes.push(ItemOutcome::failed(
                        &reference,
                        FailureReason::Authentication,
                        CANCELLED_MESSAGE,
                        (index, 0),
                    ));
                    continue;
                }
                let leaves = resolver.resolve(&reference).await.into_leaves();
                self.schedule(&mut scheduler, index, leaves).await;
            }
        }

        let Scheduler {
            mut outcomes,
            tasks,
            ..
        } = scheduler;
        let (meta, handles): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .map(|(position, reference, handle)| ((position, reference), handle))
            .unzip();
        for ((position, reference), joined) in meta.into_iter().zip(join_all(handles).await) {
            outcomes.push(joined.unwrap_or_else(|e| {
                warn!(reference = %reference, error = %e, "rip task aborted");
                ItemOutcome::failed(
                    &reference,
                    FailureReason::Postprocess,
                    format!("rip task aborted: {e}"),
                    position,
                )
            }));
        }
        outcomes
    }

    /// Reports skipped and failed leaves of submission `index` and spawns a
    /// rip for each resolved track once the pool has a slot for it.
    async fn schedule(&self, scheduler: &mut Scheduler, index: usize, leaves: Vec<Resolution>) {
        for (leaf, resolution) in leaves.into_iter().enumerate() {
            let position = (index, leaf);
            match resolution {
                Resolution::Skipped { reference, reason } => {
                    info!(reference = %reference, reason = %reason, "skipped");
                    scheduler.outcomes.push(ItemOutcome::new(
                        &reference,
                        ItemStatus::Skipped(reason),
                        position,
                    ));
                }
                Resolution::Failed { reference, error } => {
                    if error.is_fatal_for_provider() {
                        cancel(&scheduler.cancelled, &scheduler.pool);
                    } else if error.is_permanent() {
                        self.record_failure(&reference, &error.to_string()).await;
                    }
                    scheduler.outcomes.push(ItemOutcome::failed(
                        &reference,
                        FailureReason::from_resolve(&error),
                        error.to_string(),
                        position,
                    ));
                }
                Resolution::Resolved(ResolvedMedia::Track(track)) => {
                    scheduler.spawn(track, position).await;
                }
                // `into_leaves` flattens composites.
                Resolution::Resolved(other) => {
                    debug!(media_type = %other.media_type(), "ignoring non-leaf node");
                }
            }
        }
    }

    async fn record_failure(&self, reference: &Reference, reason: &str) {
        if let Err(e) = self
            .ledger
            .record_failure(reference.provider, reference.media_type, &reference.id, reason)
            .await
        {
            warn!(reference = %reference, error = %e, "could not record failure");
        }
    }
}

type Position = (usize, usize);

/// Per-provider scheduling state while leaves are handed to the pool.
struct Scheduler {
    ctx: RipContext,
    pool: WorkerPool,
    cancelled: Arc<AtomicBool>,
    seen: HashSet<String>,
    outcomes: Vec<ItemOutcome>,
    tasks: Vec<(Position, Reference, JoinHandle<ItemOutcome>)>,
}

impl Scheduler {
    async fn spawn(&mut self, track: Track, position: Position) {
        let reference = track.reference();
        if !self.seen.insert(track.meta.id.clone()) {
            debug!(reference = %reference, "duplicate in run");
            self.outcomes.push(ItemOutcome::new(
                &reference,
                ItemStatus::Skipped(SkipReason::DuplicateInRun),
                position,
            ));
            return;
        }
        let Ok(permit) = self.pool.acquire().await else {
            self.outcomes.push(ItemOutcome::failed(
                &reference,
                FailureReason::Authentication,
                CANCELLED_MESSAGE,
                position,
            ));
            return;
        };

        let ctx = self.ctx.clone();
        let cancelled = Arc::clone(&self.cancelled);
        let pool = self.pool.clone();
        let task_reference = reference.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            if cancelled.load(Ordering::SeqCst) {
                return ItemOutcome::failed(
                    &task_reference,
                    FailureReason::Authentication,
                    CANCELLED_MESSAGE,
                    position,
                );
            }
            let mut rip = Rip::new(track);
            match rip.run(&ctx).await {
                Ok(path) => {
                    ItemOutcome::new(&task_reference, ItemStatus::Succeeded { path }, position)
                }
                Err(error) => {
                    if error.is_fatal_for_provider() {
                        cancel(&cancelled, &pool);
                    }
                    ItemOutcome::failed(
                        &task_reference,
                        FailureReason::from_rip(&error),
                        error.to_string(),
                        position,
                    )
                }
            }
        });
        self.tasks.push((position, reference, handle));
    }
}

fn cancel(cancelled: &AtomicBool, pool: &WorkerPool) {
    if !cancelled.swap(true, Ordering::SeqCst) {
        warn!("authentication failed mid-run, cancelling pending work");
    }
    pool.close();
}

fn fail_all(items: &[(usize, Reference)], reason: FailureReason, message: &str) -> Vec<ItemOutcome> {
    items
        .iter()
        .map(|(index, reference)| ItemOutcome::failed(reference, reason, message, (*index, 0)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::download::Downloadable;

    struct Unreachable(Provider);

    #[async_trait]
    impl ClientCapability for Unreachable {
        fn provider(&self) -> Provider {
            self.0
        }

        async fn login(&self) -> Result<(), ClientError> {
            Err(ClientError::missing_credentials(self.0, "no token"))
        }

        async fn get_metadata(&self, _id: &str, _media_type: MediaType) -> Result<Value, ClientError> {
            unreachable!("metadata after failed login")
        }

        async fn search(
            &self,
            _media_type: MediaType,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<Value>, ClientError> {
            unreachable!("search after failed login")
        }

        async fn get_downloadable(
            &self,
            _id: &str,
            _quality: u8,
        ) -> Result<Box<dyn Downloadable>, ClientError> {
            unreachable!("download after failed login")
        }
    }

    fn orchestrator(clients: Vec<Arc<dyn ClientCapability>>) -> Orchestrator {
        let clients = clients.into_iter().map(|c| (c.provider(), c)).collect();
        Orchestrator::new(Config::default(), clients, Arc::new(Ledger::disabled()))
    }

    #[tokio::test]
    async fn test_missing_client_fails_its_references() {
        let orchestrator = orchestrator(Vec::new());
        let summary = orchestrator
            .submit(vec![Reference::new(Provider::Tidal, MediaType::Track, "1")])
            .await;
        assert_eq!(summary.failed(), 1);
        let (_, reason, message) = summary.failures().next().unwrap();
        assert_eq!(reason, FailureReason::MissingCredentials);
        assert!(message.contains("tidal"));
    }

    #[tokio::test]
    async fn test_login_failure_fails_every_reference_of_provider() {
        let orchestrator = orchestrator(vec![Arc::new(Unreachable(Provider::Deezer))]);
        let summary = orchestrator
            .submit(vec![
                Reference::new(Provider::Deezer, MediaType::Track, "1"),
                Reference::new(Provider::Deezer, MediaType::Album, "2"),
            ])
            .await;
        assert_eq!(summary.failed(), 2);
        assert!(
            summary
                .failures()
                .all(|(_, reason, _)| reason == FailureReason::MissingCredentials)
        );
        assert_eq!(summary.outcomes()[0].id, "1");
        assert_eq!(summary.outcomes()[1].media_type, MediaType::Album);
    }

    #[tokio::test]
    async fn test_search_requires_login() {
        let orchestrator = orchestrator(vec![Arc::new(Unreachable(Provider::Qobuz))]);
        let err = orchestrator
            .search(Provider::Qobuz, MediaType::Album, "miles", 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Client(ClientError::MissingCredentials { .. })
        ));
        assert!(matches!(
            orchestrator
                .search(Provider::Tidal, MediaType::Album, "miles", 5)
                .await
                .unwrap_err(),
            OrchestratorError::NoClient {
                provider: Provider::Tidal
            }
        ));
    }

    #[test]
    fn test_from_config_builds_every_provider() {
        let orchestrator = Orchestrator::from_config(Config::default(), Arc::new(Ledger::disabled()));
        for provider in Provider::ALL {
            assert!(orchestrator.client(provider).is_ok());
        }
    }
}
