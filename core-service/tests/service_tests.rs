//! Bootstrap wiring tests for CoreService.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AudioElementDriver, DriverEvent, LifecycleChangeStream, LifecycleObserver, LifecycleState,
    RemoteProgress, RemoteProgressStore, SessionTrack, SettingsStore,
};
use core_playback::PlaybackStatus;
use core_service::{AudioOutput, AudioOwner, CoreConfig, CoreService, Episode, PlaybackConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

// ============================================================================
// Fakes
// ============================================================================

struct FakeElement {
    current_time: Mutex<f64>,
    sources: AtomicUsize,
    events: broadcast::Sender<DriverEvent>,
}

impl FakeElement {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            current_time: Mutex::new(0.0),
            sources: AtomicUsize::new(0),
            events,
        })
    }

    fn set_time(&self, position: f64) {
        *self.current_time.lock().unwrap() = position;
    }

    fn source_count(&self) -> usize {
        self.sources.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioElementDriver for FakeElement {
    async fn set_source(&self, _url: &str) -> BridgeResult<()> {
        self.sources.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn clear_source(&self) -> BridgeResult<()> {
        Ok(())
    }
    async fn play(&self) -> BridgeResult<()> {
        Ok(())
    }
    async fn pause(&self) -> BridgeResult<()> {
        Ok(())
    }
    async fn set_current_time(&self, position: f64) -> BridgeResult<()> {
        self.set_time(position);
        Ok(())
    }
    async fn set_playback_rate(&self, _rate: f32) -> BridgeResult<()> {
        Ok(())
    }
    async fn current_time(&self) -> BridgeResult<f64> {
        Ok(*self.current_time.lock().unwrap())
    }
    async fn duration(&self) -> BridgeResult<Option<f64>> {
        Ok(Some(300.0))
    }
    async fn set_media_metadata(&self, _track: SessionTrack) -> BridgeResult<()> {
        Ok(())
    }
    fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
struct MemoryProgress {
    rows: Mutex<HashMap<String, RemoteProgress>>,
}

impl MemoryProgress {
    fn position_of(&self, episode_id: &str) -> Option<f64> {
        self.rows.lock().unwrap().get(episode_id).map(|p| p.position)
    }
}

#[async_trait]
impl RemoteProgressStore for MemoryProgress {
    async fn upsert(&self, _user_id: &str, progress: RemoteProgress) -> BridgeResult<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(progress.episode_id.clone(), progress);
        Ok(())
    }

    async fn fetch(&self, _user_id: &str, episode_id: &str) -> BridgeResult<Option<RemoteProgress>> {
        Ok(self.rows.lock().unwrap().get(episode_id).cloned())
    }
}

#[derive(Default)]
struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    fn put(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.put(key, value);
        Ok(())
    }
    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.get(key))
    }
    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.put(key, &value.to_string());
        Ok(())
    }
    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.get(key).and_then(|v| v.parse().ok()))
    }
    async fn set_f64(&self, key: &str, value: f64) -> BridgeResult<()> {
        self.put(key, &value.to_string());
        Ok(())
    }
    async fn get_f64(&self, key: &str) -> BridgeResult<Option<f64>> {
        Ok(self.get(key).and_then(|v| v.parse().ok()))
    }
    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.get(key).is_some())
    }
}

struct FakeLifecycle {
    state: watch::Sender<LifecycleState>,
}

impl FakeLifecycle {
    fn new() -> Arc<Self> {
        let (state, _) = watch::channel(LifecycleState::Foreground);
        Arc::new(Self { state })
    }

    fn set(&self, state: LifecycleState) {
        self.state.send_replace(state);
    }
}

struct FakeLifecycleStream(watch::Receiver<LifecycleState>);

#[async_trait]
impl LifecycleChangeStream for FakeLifecycleStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.0.changed().await.ok()?;
        Some(*self.0.borrow_and_update())
    }
}

#[async_trait]
impl LifecycleObserver for FakeLifecycle {
    async fn get_state(&self) -> BridgeResult<LifecycleState> {
        Ok(*self.state.borrow())
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn LifecycleChangeStream>> {
        Ok(Box::new(FakeLifecycleStream(self.state.subscribe())))
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Host {
    element: Arc<FakeElement>,
    progress: Arc<MemoryProgress>,
    settings: Arc<MemorySettings>,
    lifecycle: Arc<FakeLifecycle>,
}

impl Host {
    fn new() -> Self {
        Self {
            element: FakeElement::new(),
            progress: Arc::new(MemoryProgress::default()),
            settings: Arc::new(MemorySettings::default()),
            lifecycle: FakeLifecycle::new(),
        }
    }

    /// Same storage, fresh player: what a relaunch looks like.
    fn relaunch(&self) -> Self {
        Self {
            element: FakeElement::new(),
            progress: self.progress.clone(),
            settings: self.settings.clone(),
            lifecycle: FakeLifecycle::new(),
        }
    }

    fn config(&self, restore: bool) -> CoreConfig {
        CoreConfig::builder()
            .user_id("usr_1")
            .audio_output(AudioOutput::AudioElement(self.element.clone()))
            .progress_store(self.progress.clone())
            .settings_store(self.settings.clone())
            .lifecycle_observer(self.lifecycle.clone())
            .placeholder_artwork("/assets/placeholder.png")
            .restore_session(restore)
            .build()
            .unwrap()
    }

    async fn start(&self) -> CoreService {
        CoreService::bootstrap(self.config(true), PlaybackConfig::default())
            .await
            .unwrap()
    }
}

fn episode(id: &str) -> Episode {
    Episode::new(id, "pod-1", format!("Episode {id}"), format!("https://cdn.test/{id}.mp3"))
        .with_duration(300.0)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_bootstrap_without_snapshot_is_idle() {
    let host = Host::new();
    let core = host.start().await;

    let state = core.engine().state();
    assert_eq!(state.status, PlaybackStatus::Idle);
    assert!(state.episode.is_none());
    assert!(state.auto_advance);
    assert_eq!(core.arbiter().active_owner(), AudioOwner::None);

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stored_auto_advance_preference_wins_over_default() {
    let host = Host::new();
    host.settings.put("playback.auto_advance", "false");

    let core = host.start().await;
    assert!(!core.engine().state().auto_advance);

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_relaunch_restores_paused_without_touching_player() {
    let host = Host::new();
    let core = host.start().await;
    core.engine().play_episode(episode("ep-1"), None).await.unwrap();
    host.element.set_time(42.0);
    core.shutdown().await.unwrap();

    let relaunched = host.relaunch();
    let core = relaunched.start().await;

    let state = core.engine().state();
    assert_eq!(state.status, PlaybackStatus::Paused);
    assert_eq!(state.episode_id(), Some("ep-1"));
    assert_eq!(state.position, 42.0);
    assert_eq!(relaunched.element.source_count(), 0);

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restore_disabled_starts_idle() {
    let host = Host::new();
    let core = host.start().await;
    core.engine().play_episode(episode("ep-1"), None).await.unwrap();
    core.shutdown().await.unwrap();

    let relaunched = host.relaunch();
    let core = CoreService::bootstrap(relaunched.config(false), PlaybackConfig::default())
        .await
        .unwrap();

    assert_eq!(core.engine().state().status, PlaybackStatus::Idle);
    assert!(relaunched.settings.get("playback.session_snapshot").is_some());

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leaving_foreground_flushes_progress() {
    let host = Host::new();
    let core = host.start().await;
    core.engine().play_episode(episode("ep-1"), None).await.unwrap();

    host.element.set_time(87.0);
    host.lifecycle.set(LifecycleState::Background);

    let progress = host.progress.clone();
    eventually(|| progress.position_of("ep-1") == Some(87.0)).await;

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropping_service_without_shutdown_syncs_progress() {
    let host = Host::new();
    let core = host.start().await;
    core.engine().play_episode(episode("ep-1"), None).await.unwrap();
    host.element.set_time(33.0);

    drop(core);

    let progress = host.progress.clone();
    eventually(|| progress.position_of("ep-1") == Some(33.0)).await;
    let settings = host.settings.clone();
    eventually(|| {
        settings
            .get("playback.session_snapshot")
            .is_some_and(|raw| raw.contains("\"position\":33"))
    })
    .await;
}

#[tokio::test]
async fn test_shared_arbiter_pauses_engine_on_takeover() {
    let host = Host::new();
    let core = host.start().await;
    core.engine().play_episode(episode("ep-1"), None).await.unwrap();
    assert_eq!(core.arbiter().active_owner(), AudioOwner::Podcast);

    core.arbiter().claim(AudioOwner::Other);

    let mut state = core.engine().subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.status == PlaybackStatus::Paused),
    )
    .await
    .unwrap()
    .unwrap();

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engine_rejects_commands_after_shutdown() {
    let host = Host::new();
    let core = host.start().await;
    core.shutdown().await.unwrap();

    assert!(core.engine().play_episode(episode("ep-1"), None).await.is_err());
}
