//! # Progress Tracker
//!
//! Where listening progress goes, at three speeds:
//!
//! 1. **Metadata cache**: every position tick (1 s). Cheap, in-memory.
//! 2. **Session snapshot**: debounced (2 s) by the engine, see [`SnapshotDebounce`].
//! 3. **Remote store**: every 15 s while playing, plus pause, episode switch,
//!    app backgrounding and teardown. Writes go through a single sync worker
//!    that retries with bounded exponential backoff and coalesces per episode.
//!
//! It also owns the two "played" rules: the near-end threshold and the
//! replay reset applied when a finished episode is loaded again.

use crate::config::PlaybackConfig;
use crate::metadata_cache::EpisodeMetadataCache;
use crate::models::{Episode, ProgressRecord};
use bridge_traits::{Clock, RemoteProgressStore};
use core_runtime::events::{CoreEvent, EventBus, ProgressEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Whether `remaining` seconds is close enough to the end to count as played.
pub fn is_near_end(record: &ProgressRecord, threshold_secs: f64) -> bool {
    match record.remaining() {
        Some(remaining) => remaining <= threshold_secs,
        None => false,
    }
}

pub(crate) fn to_millis(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

// ============================================================================
// Snapshot debounce
// ============================================================================

/// Deadline bookkeeping for the debounced session snapshot.
///
/// Episode, context and speed changes push the deadline out. Position ticks
/// only arm it when nothing is pending: ticks arrive faster than the debounce
/// window, so letting them reset it would postpone the snapshot for as long as
/// audio keeps playing.
#[derive(Debug, Clone)]
pub struct SnapshotDebounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl SnapshotDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// A state change: restart the quiet period.
    pub fn touch(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    /// A position change: start a quiet period unless one is already running.
    pub fn touch_position(&mut self) {
        if self.deadline.is_none() {
            self.touch();
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }
}

// ============================================================================
// Tracker
// ============================================================================

pub struct ProgressTracker {
    user_id: String,
    cache: Arc<EpisodeMetadataCache>,
    store: Arc<dyn RemoteProgressStore>,
    near_end_threshold: f64,
    events: EventBus,
    /// `(episode_id, generation)` already marked played.
    marked: Option<(String, u64)>,
    sync: Option<SyncHandle>,
}

impl ProgressTracker {
    /// Create the tracker and spawn its sync worker. Requires a Tokio runtime.
    pub fn new(
        user_id: impl Into<String>,
        cache: Arc<EpisodeMetadataCache>,
        store: Arc<dyn RemoteProgressStore>,
        clock: Arc<dyn Clock>,
        config: &PlaybackConfig,
        events: EventBus,
    ) -> Self {
        let user_id = user_id.into();
        let sync = SyncHandle::spawn(SyncWorker {
            user_id: user_id.clone(),
            store: store.clone(),
            clock,
            config: config.clone(),
            events: events.clone(),
            pending: VecDeque::new(),
            waiters: Vec::new(),
            closed: false,
        });

        Self {
            user_id,
            cache,
            store,
            near_end_threshold: config.near_end_threshold_secs,
            events,
            marked: None,
            sync: Some(sync),
        }
    }

    pub fn cache(&self) -> &Arc<EpisodeMetadataCache> {
        &self.cache
    }

    /// Resume point for `episode`, applying the replay reset.
    ///
    /// A remote record flagged played comes back as position 0, not played, and
    /// that reset is written to the cache immediately and queued for the remote
    /// store ahead of any later write. Remote failures fall back to the cache.
    #[instrument(skip(self, episode), fields(episode_id = %episode.id))]
    pub async fn load_progress(&self, episode: &Episode) -> ProgressRecord {
        let remote = match self.store.fetch(&self.user_id, &episode.id).await {
            Ok(remote) => remote.map(|r| ProgressRecord::from_remote(&r)),
            Err(e) => {
                warn!(error = %e, "Remote progress unavailable, using cached progress");
                None
            }
        };

        let known = remote.or_else(|| {
            self.cache.get(&episode.id).map(|m| {
                ProgressRecord::new(episode.id.clone(), m.position, m.duration, m.played, 1.0)
            })
        });

        let Some(mut record) = known else {
            return ProgressRecord::new(episode.id.clone(), 0.0, episode.duration, false, 1.0);
        };
        if record.duration.is_none() {
            record = ProgressRecord::new(
                record.episode_id,
                record.position,
                episode.duration,
                record.played,
                record.speed,
            );
        }

        if record.played {
            info!("Episode already played, restarting from the beginning");
            record = ProgressRecord::new(episode.id.clone(), 0.0, record.duration, false, record.speed);
            self.cache.record(&record);
            self.enqueue(record.clone());
            let _ = self.events.emit(CoreEvent::Progress(ProgressEvent::ReplayReset {
                episode_id: episode.id.clone(),
            }));
        } else {
            self.cache.record(&record);
        }
        record
    }

    /// Position tick: write through to the metadata cache.
    pub fn record_position(&self, record: &ProgressRecord) {
        self.cache
            .update_position(&record.episode_id, record.position, record.duration);
    }

    /// Mark `record` played once per load generation.
    ///
    /// Returns `true` if this call did the marking.
    pub fn mark_played(&mut self, record: &ProgressRecord, generation: u64) -> bool {
        if self
            .marked
            .as_ref()
            .is_some_and(|(id, gen)| *id == record.episode_id && *gen == generation)
        {
            return false;
        }
        self.marked = Some((record.episode_id.clone(), generation));

        let played = ProgressRecord {
            played: true,
            ..record.clone()
        };
        self.cache.record(&played);
        self.enqueue(played);
        debug!(episode_id = %record.episode_id, generation, "Episode marked played");
        let _ = self.events.emit(CoreEvent::Progress(ProgressEvent::MarkedPlayed {
            episode_id: record.episode_id.clone(),
        }));
        true
    }

    /// Near-end rule: marks `record` played when it is within the threshold of
    /// the end, but only after audio genuinely started this session.
    pub fn check_near_end(&mut self, record: &ProgressRecord, generation: u64, started: bool) -> bool {
        if !started || record.played || !is_near_end(record, self.near_end_threshold) {
            return false;
        }
        self.mark_played(record, generation)
    }

    /// Queue a remote upsert.
    pub fn sync(&self, record: &ProgressRecord) {
        self.enqueue(record.clone());
    }

    /// Wait until every queued upsert has been attempted.
    pub async fn flush(&self) {
        if let Some(sync) = &self.sync {
            sync.flush().await;
        }
    }

    /// Drain the sync worker and stop it.
    pub async fn shutdown(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.shutdown().await;
        }
    }

    fn enqueue(&self, record: ProgressRecord) {
        match &self.sync {
            Some(sync) => sync.enqueue(record),
            None => warn!(episode_id = %record.episode_id, "Progress tracker shut down, dropping sync"),
        }
    }
}

// ============================================================================
// Sync worker
// ============================================================================

enum SyncMessage {
    Upsert(ProgressRecord),
    Flush(oneshot::Sender<()>),
}

struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncMessage>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    fn spawn(worker: SyncWorker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(worker.run(rx));
        Self { tx, task }
    }

    fn enqueue(&self, record: ProgressRecord) {
        if self.tx.send(SyncMessage::Upsert(record)).is_err() {
            warn!("Progress sync worker is gone");
        }
    }

    async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SyncMessage::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Progress sync worker ended abnormally");
        }
    }
}

struct SyncWorker {
    user_id: String,
    store: Arc<dyn RemoteProgressStore>,
    clock: Arc<dyn Clock>,
    config: PlaybackConfig,
    events: EventBus,
    pending: VecDeque<ProgressRecord>,
    waiters: Vec<oneshot::Sender<()>>,
    closed: bool,
}

impl SyncWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncMessage>) {
        loop {
            if self.pending.is_empty() {
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(());
                }
                if self.closed {
                    break;
                }
                match rx.recv().await {
                    Some(message) => self.accept(message),
                    None => self.closed = true,
                }
                continue;
            }

            while let Ok(message) = rx.try_recv() {
                self.accept(message);
            }
            if let Some(record) = self.pending.pop_front() {
                self.upsert_with_retry(record, &mut rx).await;
            }
        }
        debug!("Progress sync worker stopped");
    }

    /// A newer record for an episode replaces the queued one in place.
    fn accept(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Upsert(record) => {
                match self
                    .pending
                    .iter_mut()
                    .find(|p| p.episode_id == record.episode_id)
                {
                    Some(slot) => *slot = record,
                    None => self.pending.push_back(record),
                }
            }
            SyncMessage::Flush(waiter) => self.waiters.push(waiter),
        }
    }

    async fn upsert_with_retry(
        &mut self,
        record: ProgressRecord,
        rx: &mut mpsc::UnboundedReceiver<SyncMessage>,
    ) {
        let max_attempts = self.config.sync_max_attempts;
        for attempt in 1..=max_attempts {
            let remote = record.to_remote(self.clock.now());
            match self.store.upsert(&self.user_id, remote).await {
                Ok(()) => {
                    debug!(episode_id = %record.episode_id, attempt, "Progress synced");
                    let _ = self.events.emit(CoreEvent::Progress(ProgressEvent::Synced {
                        episode_id: record.episode_id.clone(),
                        position_ms: to_millis(record.position),
                    }));
                    return;
                }
                Err(e) if attempt == max_attempts => {
                    warn!(
                        episode_id = %record.episode_id,
                        attempts = attempt,
                        error = %e,
                        "Giving up on progress sync until the next interval"
                    );
                    let _ = self.events.emit(CoreEvent::Progress(ProgressEvent::SyncFailed {
                        episode_id: record.episode_id.clone(),
                        attempts: attempt,
                        message: e.to_string(),
                    }));
                    return;
                }
                Err(e) => {
                    let delay = self.config.backoff_for(attempt);
                    debug!(
                        episode_id = %record.episode_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Progress sync failed, retrying"
                    );
                    self.wait(delay, rx).await;
                    if self.pending.iter().any(|p| p.episode_id == record.episode_id) {
                        debug!(episode_id = %record.episode_id, "Retry superseded by newer progress");
                        return;
                    }
                }
            }
        }
    }

    /// Sleep for `delay` while still accepting messages.
    async fn wait(&mut self, delay: Duration, rx: &mut mpsc::UnboundedReceiver<SyncMessage>) {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return,
                message = rx.recv(), if !self.closed => match message {
                    Some(message) => self.accept(message),
                    None => self.closed = true,
                },
            }
        }
    }
}
