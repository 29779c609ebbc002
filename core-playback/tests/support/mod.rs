//! Shared fakes for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{DownloadResolver, FixedClock, RemoteProgress, RemoteProgressStore, SettingsStore};
use chrono::{TimeZone, Utc};
use core_playback::{
    AudioBackend, AudioResourceArbiter, BackendEvent, BackendEventKind, BackendProgress,
    EngineDeps, EngineState, Episode, EpisodeMetadataCache, LoadRequest, PlayOutcome,
    PlaybackConfig, PlaybackEngine, PlaybackError, Result,
};
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

// ============================================================================
// Fake audio backend
// ============================================================================

#[derive(Default)]
struct BackendInner {
    loads: Vec<LoadRequest>,
    calls: Vec<&'static str>,
    rates: Vec<f32>,
    seeks: Vec<f64>,
    position: f64,
    duration: Option<f64>,
    outcome: Option<PlayOutcome>,
    fail_next_load: bool,
}

/// Scriptable backend: records calls, reports a test-controlled position and
/// lets the test emit events.
pub struct FakeBackend {
    inner: Mutex<BackendInner>,
    events: broadcast::Sender<BackendEvent>,
    gate: Mutex<Option<Arc<Notify>>>,
    seek_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(BackendInner::default()),
            events,
            gate: Mutex::new(None),
            seek_gate: Mutex::new(None),
        }
    }

    /// Make every following load wait until the returned gate is notified.
    pub fn block_loads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Make the next seek wait until [`release_seeks`](Self::release_seeks).
    pub fn block_seeks(&self) {
        *self.seek_gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release_seeks(&self) {
        if let Some(gate) = self.seek_gate.lock().take() {
            gate.notify_one();
        }
    }

    pub fn fail_next_load(&self) {
        self.inner.lock().fail_next_load = true;
    }

    pub fn set_play_outcome(&self, outcome: PlayOutcome) {
        self.inner.lock().outcome = Some(outcome);
    }

    pub fn set_position(&self, position: f64, duration: Option<f64>) {
        let mut inner = self.inner.lock();
        inner.position = position;
        inner.duration = duration;
    }

    pub fn emit(&self, generation: u64, kind: BackendEventKind) {
        let _ = self.events.send(BackendEvent { generation, kind });
    }

    pub fn loads(&self) -> Vec<LoadRequest> {
        self.inner.lock().loads.clone()
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        self.inner.lock().loads.iter().map(|l| l.episode.id.clone()).collect()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().calls.clone()
    }

    pub fn rates(&self) -> Vec<f32> {
        self.inner.lock().rates.clone()
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn load(&self, request: LoadRequest) -> Result<()> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock();
        inner.calls.push("load");
        if std::mem::take(&mut inner.fail_next_load) {
            return Err(PlaybackError::Backend("source unreachable".into()));
        }
        inner.position = request.resume_at;
        inner.duration = request.episode.duration;
        inner.loads.push(request);
        Ok(())
    }

    async fn play(&self) -> Result<PlayOutcome> {
        let mut inner = self.inner.lock();
        inner.calls.push("play");
        Ok(inner.outcome.unwrap_or(PlayOutcome::Started))
    }

    async fn pause(&self) -> Result<()> {
        self.inner.lock().calls.push("pause");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.lock().calls.push("stop");
        Ok(())
    }

    async fn seek(&self, position: f64) -> Result<()> {
        let gate = self.seek_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock();
        inner.calls.push("seek");
        inner.seeks.push(position);
        inner.position = position;
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push("set_rate");
        inner.rates.push(rate);
        Ok(())
    }

    async fn progress(&self) -> Result<BackendProgress> {
        let inner = self.inner.lock();
        Ok(BackendProgress {
            position: inner.position,
            duration: inner.duration,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ============================================================================
// Fake stores
// ============================================================================

#[derive(Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, RemoteProgress>>,
    upserts: Mutex<Vec<RemoteProgress>>,
    failing: Mutex<bool>,
}

impl MemoryProgressStore {
    pub fn seed(&self, progress: RemoteProgress) {
        self.records
            .lock()
            .insert(progress.episode_id.clone(), progress);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn get(&self, episode_id: &str) -> Option<RemoteProgress> {
        self.records.lock().get(episode_id).cloned()
    }

    pub fn upserts(&self) -> Vec<RemoteProgress> {
        self.upserts.lock().clone()
    }
}

#[async_trait]
impl RemoteProgressStore for MemoryProgressStore {
    async fn upsert(&self, _user_id: &str, progress: RemoteProgress) -> BridgeResult<()> {
        if *self.failing.lock() {
            return Err(BridgeError::OperationFailed("offline".into()));
        }
        self.upserts.lock().push(progress.clone());
        self.records
            .lock()
            .insert(progress.episode_id.clone(), progress);
        Ok(())
    }

    async fn fetch(&self, _user_id: &str, episode_id: &str) -> BridgeResult<Option<RemoteProgress>> {
        if *self.failing.lock() {
            return Err(BridgeError::OperationFailed("offline".into()));
        }
        Ok(self.get(episode_id))
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.set_string(key, if value { "true" } else { "false" }).await
    }

    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.raw(key).and_then(|v| v.parse().ok()))
    }

    async fn set_f64(&self, key: &str, value: f64) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_f64(&self, key: &str) -> BridgeResult<Option<f64>> {
        Ok(self.raw(key).and_then(|v| v.parse().ok()))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.contains(key))
    }
}

/// Maps episode ids to local files.
#[derive(Default)]
pub struct StaticDownloads {
    paths: Mutex<HashMap<String, PathBuf>>,
}

impl StaticDownloads {
    pub fn add(&self, episode_id: &str, path: &str) {
        self.paths
            .lock()
            .insert(episode_id.to_string(), PathBuf::from(path));
    }
}

#[async_trait]
impl DownloadResolver for StaticDownloads {
    async fn downloaded_path(&self, episode_id: &str) -> BridgeResult<Option<PathBuf>> {
        Ok(self.paths.lock().get(episode_id).cloned())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const PLACEHOLDER: &str = "/assets/placeholder.png";

pub struct Harness {
    pub engine: PlaybackEngine,
    pub backend: Arc<FakeBackend>,
    pub arbiter: Arc<AudioResourceArbiter>,
    pub progress: Arc<MemoryProgressStore>,
    pub settings: Arc<MemorySettings>,
    pub downloads: Arc<StaticDownloads>,
    pub cache: Arc<EpisodeMetadataCache>,
    pub events: EventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Arc::new(MemorySettings::default()), true)
    }

    pub fn with_settings(settings: Arc<MemorySettings>, auto_advance: bool) -> Self {
        Self::build(settings, auto_advance, PlaybackConfig::default())
    }

    pub fn with_config(config: PlaybackConfig) -> Self {
        Self::build(Arc::new(MemorySettings::default()), true, config)
    }

    fn build(settings: Arc<MemorySettings>, auto_advance: bool, config: PlaybackConfig) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let arbiter = Arc::new(AudioResourceArbiter::new());
        let progress = Arc::new(MemoryProgressStore::default());
        let downloads = Arc::new(StaticDownloads::default());
        let cache = Arc::new(EpisodeMetadataCache::new(64));
        let events = EventBus::new(256);

        let engine = PlaybackEngine::spawn(
            config,
            EngineDeps {
                user_id: "user-1".to_string(),
                backend: backend.clone(),
                arbiter: arbiter.clone(),
                cache: cache.clone(),
                progress_store: progress.clone(),
                settings: settings.clone(),
                image_cache: None,
                download_resolver: Some(downloads.clone()),
                clock: Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 5, 1, 7, 0, 0).unwrap())),
                placeholder_artwork: PathBuf::from(PLACEHOLDER),
                events: events.clone(),
                auto_advance,
            },
        )
        .expect("engine spawns");

        Self {
            engine,
            backend,
            arbiter,
            progress,
            settings,
            downloads,
            cache,
            events,
        }
    }

    /// Wait until the engine state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&EngineState) -> bool) -> EngineState {
        let mut rx = self.engine.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(predicate))
            .await
            .expect("state reached in time")
            .expect("engine alive");
        state.clone()
    }
}

pub fn episode(id: &str, duration: f64) -> Episode {
    Episode::new(id, "pod-1", format!("Episode {id}"), format!("https://cdn.test/{id}.mp3"))
        .with_duration(duration)
        .with_podcast_title("Test Podcast")
}

pub fn remote(episode_id: &str, position: f64, duration: f64, played: bool) -> RemoteProgress {
    RemoteProgress {
        episode_id: episode_id.to_string(),
        position,
        duration: Some(duration),
        played,
        last_played_at: Utc.with_ymd_and_hms(2026, 4, 30, 21, 0, 0).unwrap(),
        speed: 1.0,
    }
}
