//! # Playback Engine
//!
//! The state machine behind the player UI. A cloneable [`PlaybackEngine`]
//! handle sends commands over an mpsc channel to a single actor task, which
//! owns all mutable state and is the only thing that talks to the
//! [`AudioBackend`]. UI code observes the engine through a `watch` channel of
//! [`EngineState`] and through `PlaybackEvent`s on the shared event bus.
//!
//! ## Ordering
//!
//! - Commands are processed one at a time; a suspended load finishes before
//!   the next command is looked at.
//! - `play_episode` while a load is already resolving is dropped with
//!   [`PlaybackError::LoadInProgress`], never queued behind it.
//! - Each load bumps a generation counter. Backend events and timers that
//!   belong to an older generation are ignored, which also absorbs duplicate
//!   end-of-track events.
//! - Backend events are only interpreted while podcast playback owns the
//!   audio output and no destructive transition (stop, reset, load) is running.

use crate::arbiter::{AudioOwner, AudioResourceArbiter, RemoteCommandHandler};
use crate::backend::{AudioBackend, BackendEvent, BackendEventKind, BackendState, LoadRequest, PlayOutcome};
use crate::config::PlaybackConfig;
use crate::context::PlaybackContext;
use crate::error::{PlaybackError, Result};
use crate::metadata_cache::EpisodeMetadataCache;
use crate::models::{clamp_position, normalize_duration, Episode, PlaybackStatus, ProgressRecord};
use crate::progress::{to_millis, ProgressTracker, SnapshotDebounce};
use crate::resolver::MediaResolver;
use crate::restore::{PersistedSnapshot, SessionStore};
use async_trait::async_trait;
use bridge_traits::{Clock, DownloadResolver, ImageCache, RemoteProgressStore, SettingsStore};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, ProgressEvent};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 3.0;

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub status: PlaybackStatus,
    pub episode: Option<Episode>,
    pub context: Option<PlaybackContext>,
    /// Seconds.
    pub position: f64,
    pub duration: Option<f64>,
    pub speed: f32,
    /// The current episode has been marked played during this load.
    pub played: bool,
    pub auto_advance: bool,
    /// Current load generation.
    pub generation: u64,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            episode: None,
            context: None,
            position: 0.0,
            duration: None,
            speed: 1.0,
            played: false,
            auto_advance: true,
            generation: 0,
        }
    }
}

impl EngineState {
    pub fn episode_id(&self) -> Option<&str> {
        self.episode.as_ref().map(|e| e.id.as_str())
    }

    pub fn progress_record(&self) -> Option<ProgressRecord> {
        self.episode.as_ref().map(|e| {
            ProgressRecord::new(e.id.clone(), self.position, self.duration, self.played, self.speed)
        })
    }
}

/// Collaborators injected into the engine at construction.
pub struct EngineDeps {
    pub user_id: String,
    pub backend: Arc<dyn AudioBackend>,
    pub arbiter: Arc<AudioResourceArbiter>,
    pub cache: Arc<EpisodeMetadataCache>,
    pub progress_store: Arc<dyn RemoteProgressStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub image_cache: Option<Arc<dyn ImageCache>>,
    pub download_resolver: Option<Arc<dyn DownloadResolver>>,
    pub clock: Arc<dyn Clock>,
    pub placeholder_artwork: PathBuf,
    pub events: EventBus,
    /// Initial auto-advance preference.
    pub auto_advance: bool,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    PlayEpisode {
        episode: Episode,
        context: Option<PlaybackContext>,
        reply: Reply<()>,
    },
    Pause(Reply<()>),
    Resume(Reply<()>),
    Seek { position: f64, reply: Reply<()> },
    SeekBy { delta: f64, reply: Reply<()> },
    SetSpeed { speed: f32, reply: Reply<()> },
    Stop(Reply<()>),
    SkipNext(Reply<()>),
    SkipPrevious(Reply<()>),
    SetAutoAdvance { enabled: bool, reply: Reply<()> },
    RestoreSession(Reply<bool>),
    Flush(Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

async fn send_request<T>(
    commands: &mpsc::Sender<Command>,
    make: impl FnOnce(Reply<T>) -> Command,
) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(make(tx))
        .await
        .map_err(|_| PlaybackError::EngineClosed)?;
    rx.await.map_err(|_| PlaybackError::EngineClosed)?
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to the playback engine actor.
#[derive(Clone)]
pub struct PlaybackEngine {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<EngineState>,
    loading: Arc<AtomicBool>,
}

impl PlaybackEngine {
    /// Validate `config`, spawn the engine actor and register its remote
    /// command handlers with the arbiter. Must be called inside a Tokio runtime.
    pub fn spawn(config: PlaybackConfig, deps: EngineDeps) -> Result<Self> {
        config.validate()?;

        let (commands, rx) = mpsc::channel(config.command_buffer);
        let initial = EngineState {
            auto_advance: deps.auto_advance,
            ..EngineState::default()
        };
        let (state_tx, state) = watch::channel(initial.clone());
        let loading = Arc::new(AtomicBool::new(false));

        deps.arbiter.register_handlers(
            AudioOwner::Podcast,
            Arc::new(EngineRemoteHandler {
                commands: commands.downgrade(),
            }),
        );

        let actor = EngineActor::new(config, deps, initial, state_tx, loading.clone());
        tokio::spawn(actor.run(rx));

        Ok(Self {
            commands,
            state,
            loading,
        })
    }

    /// Load `episode` and start playing it.
    ///
    /// Context rules: an explicit `context` replaces the current one; without
    /// one, an existing context is kept as is, otherwise a single-episode
    /// context is created. Resolves once the load has finished.
    pub async fn play_episode(
        &self,
        episode: Episode,
        context: Option<PlaybackContext>,
    ) -> Result<()> {
        // Hold a channel slot before taking the latch, so a caller dropped
        // while waiting for capacity never leaves the latch set.
        let permit = self
            .commands
            .reserve()
            .await
            .map_err(|_| PlaybackError::EngineClosed)?;
        if self.loading.swap(true, Ordering::SeqCst) {
            debug!(episode_id = %episode.id, "Load already in progress, dropping play request");
            return Err(PlaybackError::LoadInProgress);
        }

        let (reply, rx) = oneshot::channel();
        permit.send(Command::PlayEpisode {
            episode,
            context,
            reply,
        });
        let result = rx.await.unwrap_or(Err(PlaybackError::EngineClosed));
        if matches!(result, Err(PlaybackError::EngineClosed)) {
            self.loading.store(false, Ordering::SeqCst);
        }
        result
    }

    pub async fn pause(&self) -> Result<()> {
        send_request(&self.commands, Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        send_request(&self.commands, Command::Resume).await
    }

    /// Seek to `position` seconds, clamped to the episode duration.
    pub async fn seek(&self, position: f64) -> Result<()> {
        send_request(&self.commands, |reply| Command::Seek { position, reply }).await
    }

    /// Seek relative to the current position.
    pub async fn seek_by(&self, delta: f64) -> Result<()> {
        send_request(&self.commands, |reply| Command::SeekBy { delta, reply }).await
    }

    /// Change playback speed (0.5x to 3.0x).
    pub async fn set_speed(&self, speed: f32) -> Result<()> {
        send_request(&self.commands, |reply| Command::SetSpeed { speed, reply }).await
    }

    /// Stop playback, clear the current episode and context, and delete the session snapshot.
    pub async fn stop(&self) -> Result<()> {
        send_request(&self.commands, Command::Stop).await
    }

    pub async fn skip_next(&self) -> Result<()> {
        send_request(&self.commands, Command::SkipNext).await
    }

    /// Previous episode in the context; at the first episode, restart it.
    pub async fn skip_previous(&self) -> Result<()> {
        send_request(&self.commands, Command::SkipPrevious).await
    }

    pub async fn set_auto_advance(&self, enabled: bool) -> Result<()> {
        send_request(&self.commands, |reply| Command::SetAutoAdvance { enabled, reply }).await
    }

    /// Restore the last saved session as paused, without touching the audio output.
    ///
    /// Returns `true` if a session was restored.
    pub async fn restore_session(&self) -> Result<bool> {
        send_request(&self.commands, Command::RestoreSession).await
    }

    /// Persist the current progress locally and remotely, waiting for the remote write.
    pub async fn flush(&self) -> Result<()> {
        send_request(&self.commands, Command::Flush).await
    }

    /// Flush and stop the engine actor.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .await
            .map_err(|_| PlaybackError::EngineClosed)?;
        rx.await.map_err(|_| PlaybackError::EngineClosed)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}

/// Lock-screen and headset commands routed by the arbiter.
struct EngineRemoteHandler {
    commands: mpsc::WeakSender<Command>,
}

impl EngineRemoteHandler {
    async fn forward(&self, action: &'static str, make: impl FnOnce(Reply<()>) -> Command) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        if let Err(e) = send_request(&commands, make).await {
            debug!(action, error = %e, "Remote command not applied");
        }
    }
}

#[async_trait]
impl RemoteCommandHandler for EngineRemoteHandler {
    async fn on_play(&self) {
        self.forward("play", Command::Resume).await;
    }

    async fn on_pause(&self) {
        self.forward("pause", Command::Pause).await;
    }

    async fn on_stop(&self) {
        self.forward("stop", Command::Stop).await;
    }
}

// ============================================================================
// Actor
// ============================================================================

struct EngineActor {
    config: PlaybackConfig,
    backend: Arc<dyn AudioBackend>,
    arbiter: Arc<AudioResourceArbiter>,
    tracker: ProgressTracker,
    session: SessionStore,
    resolver: MediaResolver,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: EngineState,
    state_tx: watch::Sender<EngineState>,
    loading: Arc<AtomicBool>,
    /// The backend holds the current episode. False after a restore or after
    /// another consumer took the output.
    backend_loaded: bool,
    /// Audio genuinely started for the current generation.
    started: bool,
    ended_generation: Option<u64>,
    snapshot: SnapshotDebounce,
    ticker: Option<Interval>,
    syncer: Option<Interval>,
}

impl EngineActor {
    fn new(
        config: PlaybackConfig,
        deps: EngineDeps,
        state: EngineState,
        state_tx: watch::Sender<EngineState>,
        loading: Arc<AtomicBool>,
    ) -> Self {
        let tracker = ProgressTracker::new(
            deps.user_id,
            deps.cache,
            deps.progress_store,
            deps.clock.clone(),
            &config,
            deps.events.clone(),
        );
        let snapshot = SnapshotDebounce::new(config.snapshot_debounce);

        Self {
            backend: deps.backend,
            arbiter: deps.arbiter,
            tracker,
            session: SessionStore::new(deps.settings),
            resolver: MediaResolver::new(
                deps.image_cache,
                deps.download_resolver,
                deps.placeholder_artwork,
            ),
            clock: deps.clock,
            events: deps.events,
            state,
            state_tx,
            loading,
            backend_loaded: false,
            started: false,
            ended_generation: None,
            snapshot,
            ticker: None,
            syncer: None,
            config,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut backend_events = self.backend.subscribe();
        let mut backend_open = true;
        let mut owner = self.arbiter.subscribe();
        let mut owner_open = true;
        info!(backend = self.backend.name(), "Playback engine started");

        loop {
            let snapshot_deadline = self.snapshot.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = backend_events.recv(), if backend_open => match event {
                    Ok(event) => self.handle_backend_event(event).await,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Backend events lagged"),
                    Err(RecvError::Closed) => backend_open = false,
                },
                changed = owner.changed(), if owner_open => match changed {
                    Ok(()) => {
                        let current = *owner.borrow_and_update();
                        self.handle_owner_change(current).await;
                    }
                    Err(_) => owner_open = false,
                },
                _ = next_tick(self.ticker.as_mut()) => self.on_tick().await,
                _ = next_tick(self.syncer.as_mut()) => self.on_sync_interval(),
                _ = sleep_until(snapshot_deadline) => self.write_snapshot().await,
            }
        }

        info!("Playback engine stopped");
    }

    /// Returns `false` once the actor should exit.
    async fn handle_command(&mut self, command: Command) -> bool {
        self.reconcile_ownership().await;
        match command {
            Command::PlayEpisode {
                episode,
                context,
                reply,
            } => {
                let result = self.play_episode(episode, context).await;
                self.loading.store(false, Ordering::SeqCst);
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume().await);
            }
            Command::Seek { position, reply } => {
                let _ = reply.send(self.seek(position).await);
            }
            Command::SeekBy { delta, reply } => {
                let _ = reply.send(self.seek_by(delta).await);
            }
            Command::SetSpeed { speed, reply } => {
                let _ = reply.send(self.set_speed(speed).await);
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
            Command::SkipNext(reply) => {
                let _ = reply.send(self.skip(true).await);
            }
            Command::SkipPrevious(reply) => {
                let _ = reply.send(self.skip(false).await);
            }
            Command::SetAutoAdvance { enabled, reply } => {
                let _ = reply.send(self.set_auto_advance(enabled).await);
            }
            Command::RestoreSession(reply) => {
                let _ = reply.send(self.restore_session().await);
            }
            Command::Flush(reply) => {
                self.flush().await;
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn play_episode(
        &mut self,
        episode: Episode,
        context: Option<PlaybackContext>,
    ) -> Result<()> {
        let context = match context {
            Some(explicit) if explicit.current().id == episode.id => explicit,
            Some(explicit) => explicit.focused_on(&episode.id),
            None => self
                .state
                .context
                .clone()
                .unwrap_or_else(|| PlaybackContext::single(episode.clone())),
        };
        self.load_and_play(episode, context, None).await
    }

    async fn load_and_play(
        &mut self,
        episode: Episode,
        context: PlaybackContext,
        resume_at: Option<f64>,
    ) -> Result<()> {
        self.loading.store(true, Ordering::SeqCst);
        let result = self.load_and_play_inner(episode, context, resume_at).await;
        self.loading.store(false, Ordering::SeqCst);
        result
    }

    #[instrument(skip(self, episode, context), fields(episode_id = %episode.id))]
    async fn load_and_play_inner(
        &mut self,
        episode: Episode,
        context: PlaybackContext,
        resume_at: Option<f64>,
    ) -> Result<()> {
        if self.state.episode_id().is_some_and(|id| id != episode.id) {
            // After end-of-track the backend position is no longer meaningful.
            if self.ended_generation != Some(self.state.generation) {
                self.capture_position().await;
            }
            if let Some(record) = self.state.progress_record() {
                self.tracker.sync(&record);
            }
        }

        let previous = self.state.clone();
        let generation = self.state.generation.wrapping_add(1);
        self.stop_timers();
        self.started = false;
        self.arbiter.claim(AudioOwner::Podcast);

        self.state.generation = generation;
        self.state.status = PlaybackStatus::Loading;
        self.state.episode = Some(episode.clone());
        self.state.context = Some(context);
        self.publish();
        self.emit(PlaybackEvent::Loading {
            episode_id: episode.id.clone(),
            generation,
        });

        let progress = self.tracker.load_progress(&episode).await;
        let duration = normalize_duration(episode.duration).or(progress.duration);
        let resume_at = clamp_position(resume_at.unwrap_or(progress.position), duration);
        let source = self.resolver.source_for(&episode).await;
        let artwork = self.resolver.artwork_for(&episode).await;

        self.arbiter.set_transition_guard(true);
        let loaded = self
            .backend
            .load(LoadRequest {
                generation,
                episode: episode.clone(),
                source,
                artwork,
                resume_at,
                speed: self.state.speed,
            })
            .await;
        self.arbiter.set_transition_guard(false);

        if let Err(e) = loaded {
            error!(error = %e, "Failed to load episode");
            // The backend may already have dropped the previous track.
            self.backend_loaded = false;
            self.state = EngineState {
                status: if previous.episode.is_some() {
                    PlaybackStatus::Paused
                } else {
                    PlaybackStatus::Idle
                },
                generation,
                ..previous
            };
            self.publish();
            self.emit(PlaybackEvent::Error {
                episode_id: Some(episode.id.clone()),
                message: e.to_string(),
                recoverable: true,
            });
            return Err(PlaybackError::LoadFailed {
                episode_id: episode.id,
                message: e.to_string(),
            });
        }

        self.backend_loaded = true;
        self.ended_generation = None;
        self.state.position = resume_at;
        self.state.duration = duration;
        self.state.played = progress.played;
        self.snapshot.touch();
        self.start_playback(true).await
    }

    async fn start_playback(&mut self, fresh_load: bool) -> Result<()> {
        let Some(episode) = self.state.episode.clone() else {
            return Err(PlaybackError::NoEpisodeLoaded);
        };

        match self.backend.play().await {
            Ok(PlayOutcome::Started) => {
                self.state.status = PlaybackStatus::Playing;
                self.started = true;
                self.start_timers();
                self.publish();
                let position_ms = to_millis(self.state.position);
                if fresh_load {
                    info!(episode_id = %episode.id, position_ms, "Playback started");
                    self.emit(PlaybackEvent::Started {
                        episode_id: episode.id,
                        title: episode.title,
                        position_ms,
                    });
                } else {
                    self.emit(PlaybackEvent::Resumed {
                        episode_id: episode.id,
                        position_ms,
                    });
                }
                Ok(())
            }
            Ok(PlayOutcome::AwaitingGesture) => {
                self.state.status = PlaybackStatus::AwaitingGesture;
                self.publish();
                self.emit(PlaybackEvent::AwaitingGesture {
                    episode_id: episode.id,
                });
                Ok(())
            }
            Err(e) => {
                warn!(episode_id = %episode.id, error = %e, "Backend refused to play");
                self.state.status = PlaybackStatus::Paused;
                self.publish();
                self.emit(PlaybackEvent::Error {
                    episode_id: Some(episode.id),
                    message: e.to_string(),
                    recoverable: true,
                });
                Err(e)
            }
        }
    }

    async fn pause(&mut self) -> Result<()> {
        let Some(episode_id) = self.state.episode_id().map(str::to_string) else {
            return Err(PlaybackError::NoEpisodeLoaded);
        };
        if !matches!(
            self.state.status,
            PlaybackStatus::Playing | PlaybackStatus::AwaitingGesture
        ) {
            return Ok(());
        }

        if self.owns_output() {
            self.capture_position().await;
            self.backend.pause().await?;
        }

        self.state.status = PlaybackStatus::Paused;
        self.stop_timers();
        self.publish();
        self.emit(PlaybackEvent::Paused {
            episode_id,
            position_ms: to_millis(self.state.position),
        });
        self.persist_now().await;
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        let Some(episode) = self.state.episode.clone() else {
            return Err(PlaybackError::NoEpisodeLoaded);
        };
        if self.state.status == PlaybackStatus::Playing {
            return Ok(());
        }

        self.arbiter.claim(AudioOwner::Podcast);
        if !self.backend_loaded {
            debug!(episode_id = %episode.id, position = self.state.position, "Reloading episode into backend");
            let context = self
                .state
                .context
                .clone()
                .unwrap_or_else(|| PlaybackContext::single(episode.clone()));
            let position = self.state.position;
            return self.load_and_play(episode, context, Some(position)).await;
        }
        self.start_playback(false).await
    }

    async fn seek(&mut self, position: f64) -> Result<()> {
        if !position.is_finite() || position < 0.0 {
            return Err(PlaybackError::InvalidPosition(position));
        }
        if self.state.episode.is_none() {
            return Err(PlaybackError::NoEpisodeLoaded);
        }

        let target = clamp_position(position, self.state.duration);
        if self.owns_output() {
            self.backend.seek(target).await?;
        }
        self.state.position = target;
        if let Some(record) = self.state.progress_record() {
            self.tracker.record_position(&record);
        }
        self.snapshot.touch_position();
        self.publish();
        Ok(())
    }

    async fn seek_by(&mut self, delta: f64) -> Result<()> {
        if !delta.is_finite() {
            return Err(PlaybackError::InvalidPosition(delta));
        }
        if self.state.status == PlaybackStatus::Playing {
            self.capture_position().await;
        }
        let target = (self.state.position + delta).max(0.0);
        self.seek(target).await
    }

    async fn set_speed(&mut self, speed: f32) -> Result<()> {
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(PlaybackError::InvalidSpeed(speed));
        }
        if self.owns_output() {
            self.backend.set_rate(speed).await?;
        }
        self.state.speed = speed;
        if self.state.episode.is_some() {
            self.snapshot.touch();
        }
        self.publish();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&mut self) -> Result<()> {
        let Some(episode_id) = self.state.episode_id().map(str::to_string) else {
            return Ok(());
        };

        self.capture_position().await;
        if let Some(record) = self.state.progress_record() {
            self.tracker.sync(&record);
        }
        self.release_backend().await;
        self.reset_to_idle();
        self.clear_snapshot().await;
        self.emit(PlaybackEvent::Stopped {
            episode_id: Some(episode_id),
        });
        Ok(())
    }

    async fn skip(&mut self, forward: bool) -> Result<()> {
        let Some(context) = self.state.context.clone() else {
            return Err(PlaybackError::NoEpisodeLoaded);
        };
        let target = if forward {
            context.next_index()
        } else {
            context.previous_index()
        };

        match target {
            Some(index) => self.advance_to(&context, index).await,
            None if forward => {
                debug!("Already at the last episode of the context");
                Ok(())
            }
            None => self.seek(0.0).await,
        }
    }

    async fn advance_to(&mut self, context: &PlaybackContext, index: usize) -> Result<()> {
        let Some(next_context) = context.with_index(index) else {
            return Err(PlaybackError::Internal(format!(
                "context index {index} out of range"
            )));
        };
        let next = next_context.current().clone();
        let from = self.state.episode_id().map(str::to_string);

        self.load_and_play(next.clone(), next_context, None).await?;
        if let Some(from_episode_id) = from {
            self.emit(PlaybackEvent::Advanced {
                from_episode_id,
                to_episode_id: next.id,
                index,
            });
        }
        Ok(())
    }

    async fn set_auto_advance(&mut self, enabled: bool) -> Result<()> {
        self.state.auto_advance = enabled;
        self.publish();
        if let Err(e) = self.session.set_auto_advance(enabled).await {
            warn!(error = %e, "Auto-advance preference not persisted");
        }
        Ok(())
    }

    async fn restore_session(&mut self) -> Result<bool> {
        if self.state.episode.is_some() {
            debug!("Episode already loaded, skipping session restore");
            return Ok(false);
        }
        let Some(snapshot) = self.session.load().await? else {
            return Ok(false);
        };

        let PersistedSnapshot {
            episode,
            position,
            context,
            speed,
            ..
        } = snapshot;
        let context = if context.contains(&episode.id) {
            context.focused_on(&episode.id)
        } else {
            PlaybackContext::single(episode.clone())
        };

        self.state.status = PlaybackStatus::Paused;
        self.state.duration = normalize_duration(episode.duration);
        self.state.position = clamp_position(position, self.state.duration);
        self.state.speed = if (MIN_SPEED..=MAX_SPEED).contains(&speed) {
            speed
        } else {
            1.0
        };
        self.state.played = false;
        self.state.episode = Some(episode.clone());
        self.state.context = Some(context);
        self.backend_loaded = false;
        self.started = false;

        if let Some(record) = self.state.progress_record() {
            self.tracker.record_position(&record);
        }
        self.publish();
        info!(episode_id = %episode.id, position = self.state.position, "Session restored");
        self.emit(PlaybackEvent::Restored {
            episode_id: episode.id,
            position_ms: to_millis(self.state.position),
        });
        Ok(true)
    }

    async fn flush(&mut self) {
        if self.state.status == PlaybackStatus::Playing {
            self.capture_position().await;
        }
        self.persist_now().await;
        self.tracker.flush().await;
    }

    async fn shutdown(&mut self) {
        self.flush().await;
        self.stop_timers();
        self.tracker.shutdown().await;
        self.arbiter.unregister_handlers(AudioOwner::Podcast);
    }

    // ------------------------------------------------------------------
    // Backend and ownership events
    // ------------------------------------------------------------------

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        if event.generation != self.state.generation {
            trace!(event_generation = event.generation, current = self.state.generation, "Dropping stale backend event");
            return;
        }
        if !self.arbiter.should_process(AudioOwner::Podcast) {
            trace!(kind = ?event.kind, "Ignoring backend event while not owning the output");
            return;
        }

        match event.kind {
            BackendEventKind::StateChanged(BackendState::Playing) => {
                if self.state.status != PlaybackStatus::Playing && self.backend_loaded {
                    self.state.status = PlaybackStatus::Playing;
                    self.started = true;
                    self.start_timers();
                    self.publish();
                }
            }
            BackendEventKind::StateChanged(BackendState::Paused | BackendState::Stopped) => {
                if self.state.status == PlaybackStatus::Playing {
                    debug!("Backend paused outside the engine");
                    self.capture_position().await;
                    self.state.status = PlaybackStatus::Paused;
                    self.stop_timers();
                    self.publish();
                    if let Some(episode_id) = self.state.episode_id().map(str::to_string) {
                        self.emit(PlaybackEvent::Paused {
                            episode_id,
                            position_ms: to_millis(self.state.position),
                        });
                    }
                    self.persist_now().await;
                }
            }
            BackendEventKind::TrackEnded => self.on_track_ended().await,
            BackendEventKind::Failed(message) => {
                error!(%message, "Backend reported a playback failure");
                self.state.status = PlaybackStatus::Paused;
                self.stop_timers();
                self.publish();
                self.emit(PlaybackEvent::Error {
                    episode_id: self.state.episode_id().map(str::to_string),
                    message,
                    recoverable: true,
                });
            }
        }
    }

    async fn on_track_ended(&mut self) {
        let generation = self.state.generation;
        if self.ended_generation == Some(generation) {
            debug!(generation, "Duplicate end-of-track event ignored");
            return;
        }
        let Some(episode) = self.state.episode.clone() else {
            return;
        };
        self.ended_generation = Some(generation);
        self.loading.store(true, Ordering::SeqCst);

        let final_position = self.state.duration.unwrap_or(self.state.position);
        self.state.position = final_position;
        let record = ProgressRecord::new(
            episode.id.clone(),
            final_position,
            self.state.duration,
            true,
            self.state.speed,
        );
        self.tracker.mark_played(&record, generation);
        self.state.played = true;
        self.emit(PlaybackEvent::Completed {
            episode_id: episode.id.clone(),
        });

        let next = match &self.state.context {
            Some(context) if self.state.auto_advance => {
                context.next_index().map(|index| (context.clone(), index))
            }
            _ => None,
        };

        match next {
            Some((context, index)) => {
                info!(from = %episode.id, index, "Auto-advancing");
                if let Err(e) = self.advance_to(&context, index).await {
                    warn!(error = %e, "Auto-advance failed");
                }
            }
            None => self.finish_context().await,
        }
        self.loading.store(false, Ordering::SeqCst);
    }

    /// Nothing follows the finished episode: go idle and forget the session.
    async fn finish_context(&mut self) {
        let episode_id = self.state.episode_id().map(str::to_string);
        let source_id = self
            .state
            .context
            .as_ref()
            .and_then(|c| c.source_id().map(str::to_string));

        self.release_backend().await;
        self.reset_to_idle();
        self.clear_snapshot().await;
        info!(?source_id, "Playback context finished");
        self.emit(PlaybackEvent::ContextExhausted { source_id });
        self.emit(PlaybackEvent::Stopped { episode_id });
    }

    /// Apply an ownership loss the owner branch has not seen yet. A command
    /// can win the `select!` against a pending owner notification.
    async fn reconcile_ownership(&mut self) {
        let owner = self.arbiter.active_owner();
        if owner == AudioOwner::Podcast {
            return;
        }
        let active = matches!(
            self.state.status,
            PlaybackStatus::Playing | PlaybackStatus::AwaitingGesture | PlaybackStatus::Loading
        );
        if self.backend_loaded || active {
            self.handle_owner_change(owner).await;
        }
    }

    async fn handle_owner_change(&mut self, owner: AudioOwner) {
        if owner == AudioOwner::Podcast {
            return;
        }

        // The other consumer is free to replace whatever the backend holds.
        self.backend_loaded = false;
        if matches!(
            self.state.status,
            PlaybackStatus::Playing | PlaybackStatus::AwaitingGesture | PlaybackStatus::Loading
        ) {
            info!(owner = %owner, "Audio output taken over, pausing podcast playback");
            self.state.status = PlaybackStatus::Paused;
            self.stop_timers();
            self.publish();
            if let Some(episode_id) = self.state.episode_id().map(str::to_string) {
                self.emit(PlaybackEvent::Paused {
                    episode_id,
                    position_ms: to_millis(self.state.position),
                });
            }
            self.persist_now().await;
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn on_tick(&mut self) {
        if self.state.status != PlaybackStatus::Playing || !self.owns_output() {
            return;
        }
        if !self.capture_position().await {
            return;
        }
        let Some(record) = self.state.progress_record() else {
            return;
        };
        if self
            .tracker
            .check_near_end(&record, self.state.generation, self.started)
        {
            self.state.played = true;
            self.publish();
        }
        self.snapshot.touch_position();
    }

    fn on_sync_interval(&mut self) {
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        if let Some(record) = self.state.progress_record() {
            self.tracker.sync(&record);
        }
    }

    async fn write_snapshot(&mut self) {
        self.snapshot.cancel();
        let (Some(episode), Some(context)) = (&self.state.episode, &self.state.context) else {
            return;
        };

        let snapshot = PersistedSnapshot::new(
            episode.clone(),
            self.state.position,
            context.clone(),
            self.state.speed,
            self.clock.now(),
        );
        match self.session.save(&snapshot).await {
            Ok(()) => {
                let _ = self.events.emit(CoreEvent::Progress(ProgressEvent::SnapshotSaved {
                    episode_id: snapshot.episode.id,
                }));
            }
            Err(e) => warn!(error = %e, "Session snapshot not saved"),
        }
    }

    async fn clear_snapshot(&mut self) {
        self.snapshot.cancel();
        if let Err(e) = self.session.clear().await {
            warn!(error = %e, "Session snapshot not cleared");
        }
    }

    fn start_timers(&mut self) {
        let tick = self.config.cache_tick;
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let every = self.config.remote_sync_interval;
        let mut syncer = interval_at(Instant::now() + every, every);
        syncer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.ticker = Some(ticker);
        self.syncer = Some(syncer);
    }

    fn stop_timers(&mut self) {
        self.ticker = None;
        self.syncer = None;
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn owns_output(&self) -> bool {
        self.backend_loaded && self.arbiter.is_active(AudioOwner::Podcast)
    }

    /// Refresh position and duration from the backend and write them to the
    /// metadata cache. Returns `false` if the backend could not be read.
    async fn capture_position(&mut self) -> bool {
        if !self.owns_output() || self.state.episode.is_none() {
            return false;
        }
        let progress = match self.backend.progress().await {
            Ok(progress) => progress,
            Err(e) => {
                debug!(error = %e, "Backend position unavailable");
                return false;
            }
        };

        let duration = progress.duration.or(self.state.duration);
        self.state.duration = duration;
        self.state.position = clamp_position(progress.position, duration);
        if let Some(record) = self.state.progress_record() {
            self.tracker.record_position(&record);
        }
        self.publish();
        true
    }

    /// Write progress remotely (queued) and the snapshot locally, now.
    async fn persist_now(&mut self) {
        if let Some(record) = self.state.progress_record() {
            self.tracker.sync(&record);
        }
        self.write_snapshot().await;
    }

    async fn release_backend(&mut self) {
        if !self.owns_output() {
            return;
        }
        self.arbiter.set_transition_guard(true);
        let stopped = self.backend.stop().await;
        self.arbiter.set_transition_guard(false);
        if let Err(e) = stopped {
            warn!(error = %e, "Backend did not stop cleanly");
        }
    }

    /// Forget the current episode and context; speed and preferences survive.
    fn reset_to_idle(&mut self) {
        self.state = EngineState {
            speed: self.state.speed,
            auto_advance: self.state.auto_advance,
            generation: self.state.generation.wrapping_add(1),
            ..EngineState::default()
        };
        self.backend_loaded = false;
        self.started = false;
        self.stop_timers();
        self.snapshot.cancel();
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.emit(CoreEvent::Playback(event));
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle_at_normal_speed() {
        let state = EngineState::default();
        assert_eq!(state.status, PlaybackStatus::Idle);
        assert_eq!(state.speed, 1.0);
        assert!(state.auto_advance);
        assert!(state.progress_record().is_none());
    }

    #[test]
    fn test_progress_record_from_state() {
        let state = EngineState {
            episode: Some(Episode::new("e1", "p", "t", "u").with_duration(100.0)),
            position: 150.0,
            duration: Some(100.0),
            ..EngineState::default()
        };
        let record = state.progress_record().unwrap();
        assert_eq!(record.position, 100.0);
        assert_eq!(state.episode_id(), Some("e1"));
    }
}
