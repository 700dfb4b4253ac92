//! Shared fixtures for integration tests: a scripted provider client whose
//! downloads are served from memory and instrumented.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ripper_core::download::{DownloadError, Downloadable};
use ripper_core::{ClientCapability, ClientError, Config, MediaType, Provider};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Counters shared by a client and every downloadable it hands out.
#[derive(Debug, Default)]
pub struct Tally {
    pub metadata_calls: AtomicUsize,
    pub downloads: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
}

impl Tally {
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Highest number of downloads that were running at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Track ids in the order their downloads started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().expect("tally lock").clone()
    }

    /// `metadata <id>` and `finished <id>` entries in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("tally lock").clone()
    }

    fn event(&self, event: String) {
        self.events.lock().expect("tally lock").push(event);
    }
}

/// Client serving canned Qobuz-shaped metadata.
#[derive(Debug)]
pub struct MockClient {
    provider: Provider,
    metadata: HashMap<(MediaType, String), Value>,
    login_error: Option<String>,
    expired_for: Option<String>,
    download_delay: Duration,
    pub tally: Arc<Tally>,
}

impl MockClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            metadata: HashMap::new(),
            login_error: None,
            expired_for: None,
            download_delay: Duration::from_millis(5),
            tally: Arc::new(Tally::default()),
        }
    }

    pub fn with(mut self, media_type: MediaType, id: &str, resp: Value) -> Self {
        self.metadata.insert((media_type, id.to_string()), resp);
        self
    }

    /// Album with `count` tracks `{album}-01`, `{album}-02`, ...
    pub fn with_album(mut self, album: &str, count: usize) -> Self {
        let ids: Vec<String> = (1..=count).map(|n| format!("{album}-{n:02}")).collect();
        for (n, id) in ids.iter().enumerate() {
            self = self.with(MediaType::Track, id, track_json(id, n + 1));
        }
        self.with(MediaType::Album, album, album_json(album, &ids))
    }

    pub fn with_track(self, id: &str) -> Self {
        self.with(MediaType::Track, id, track_json(id, 1))
    }

    pub fn failing_login(mut self, message: &str) -> Self {
        self.login_error = Some(message.to_string());
        self
    }

    /// The session is rejected when a stream for `id` is requested.
    pub fn expiring_at(mut self, id: &str) -> Self {
        self.expired_for = Some(id.to_string());
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn into_arc(self) -> (Arc<dyn ClientCapability>, Arc<Tally>) {
        let tally = Arc::clone(&self.tally);
        (Arc::new(self), tally)
    }
}

#[async_trait]
impl ClientCapability for MockClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn login(&self) -> Result<(), ClientError> {
        match &self.login_error {
            Some(message) => Err(ClientError::authentication(self.provider, message.clone())),
            None => Ok(()),
        }
    }

    async fn get_metadata(&self, id: &str, media_type: MediaType) -> Result<Value, ClientError> {
        self.tally.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.tally.event(format!("metadata {id}"));
        self.metadata
            .get(&(media_type, id.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                provider: self.provider,
                media_type,
                id: id.to_string(),
            })
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError> {
        Ok(vec![json!({"query": query, "limit": limit, "items": []})])
    }

    async fn get_downloadable(
        &self,
        id: &str,
        _quality: u8,
    ) -> Result<Box<dyn Downloadable>, ClientError> {
        if self.expired_for.as_deref() == Some(id) {
            return Err(ClientError::authentication(self.provider, "session expired"));
        }
        Ok(Box::new(MemoryDownloadable {
            id: id.to_string(),
            delay: self.download_delay,
            tally: Arc::clone(&self.tally),
        }))
    }
}

/// Writes a few bytes after a short delay while tracking concurrency.
#[derive(Debug)]
pub struct MemoryDownloadable {
    id: String,
    delay: Duration,
    tally: Arc<Tally>,
}

#[async_trait]
impl Downloadable for MemoryDownloadable {
    fn extension(&self) -> &str {
        "flac"
    }

    async fn size(&self) -> Result<Option<u64>, DownloadError> {
        Ok(Some(self.id.len() as u64))
    }

    async fn fetch(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, DownloadError> {
        let tally = &self.tally;
        tally.started.lock().expect("tally lock").push(self.id.clone());
        let now = tally.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        tally.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let written = sink.write_all(self.id.as_bytes()).await;

        tally.in_flight.fetch_sub(1, Ordering::SeqCst);
        tally.downloads.fetch_add(1, Ordering::SeqCst);
        tally.event(format!("finished {}", self.id));
        written.map_err(|e| DownloadError::io(std::path::Path::new(&self.id), e))?;
        Ok(self.id.len() as u64)
    }
}

pub fn album_json(id: &str, track_ids: &[String]) -> Value {
    json!({
        "id": id,
        "title": format!("Album {id}"),
        "artist": {"name": "Band"},
        "release_date_original": "2019-05-01",
        "tracks_count": track_ids.len(),
        "tracks": {"items": track_ids.iter().map(|t| json!({"id": t})).collect::<Vec<_>>()},
    })
}

pub fn track_json(id: &str, number: usize) -> Value {
    json!({
        "id": id,
        "title": format!("Song {id}"),
        "performer": {"name": "Band"},
        "track_number": number,
        "album": {"id": format!("single-{id}"), "title": format!("Single {id}"), "artist": {"name": "Band"}},
    })
}

/// Default config rooted in a fresh temp folder, with fast retries.
pub fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.downloads.folder = dir.path().join("music");
    config.downloads.max_retries = 1;
    config.artwork.embed = false;
    config.artwork.save = false;
    config
}
