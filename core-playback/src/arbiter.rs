//! # Audio Resource Arbiter
//!
//! One physical audio output, two independent consumers: podcast playback and
//! a second audio feature (devotional audio, "rosary"). The arbiter does not
//! lock the output. It records which consumer currently *owns* it so each
//! consumer can ignore backend events that are not about its own audio.
//!
//! - [`claim`](AudioResourceArbiter::claim) always succeeds; last claim wins.
//! - Listeners are notified through a `tokio::sync::watch` channel at the
//!   moment of the claim. A consumer that loses ownership reconciles its own
//!   displayed state to "not playing".
//! - Remote-control commands (lock screen, headset buttons) are routed only to
//!   the active owner's registered [`RemoteCommandHandler`].
//! - The transition guard marks a destructive backend operation in progress
//!   (stop + reset + reload) during which nobody should interpret backend state.

use async_trait::async_trait;
use core_runtime::events::{CoreEvent, EventBus, OwnershipEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Logical consumer of the audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioOwner {
    None,
    Podcast,
    /// Any other audio feature sharing the output.
    Other,
}

impl AudioOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioOwner::None => "none",
            AudioOwner::Podcast => "podcast",
            AudioOwner::Other => "other",
        }
    }
}

impl fmt::Display for AudioOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands arriving from a host remote-control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Play,
    Pause,
    Stop,
}

/// Per-owner handlers for remote-control commands.
#[async_trait]
pub trait RemoteCommandHandler: Send + Sync {
    async fn on_play(&self);
    async fn on_pause(&self);
    async fn on_stop(&self);
}

/// Exclusive-ownership bookkeeping for the shared audio output.
pub struct AudioResourceArbiter {
    owner: watch::Sender<AudioOwner>,
    transition_guard: AtomicBool,
    handlers: RwLock<HashMap<AudioOwner, Arc<dyn RemoteCommandHandler>>>,
    events: Option<EventBus>,
}

impl AudioResourceArbiter {
    pub fn new() -> Self {
        let (owner, _) = watch::channel(AudioOwner::None);
        Self {
            owner,
            transition_guard: AtomicBool::new(false),
            handlers: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Publish ownership changes on `events` as well.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Make `owner` the active consumer. Never fails and never negotiates.
    pub fn claim(&self, owner: AudioOwner) {
        let previous = self.owner.send_replace(owner);
        if previous == owner {
            trace!(owner = %owner, "Ownership re-claimed");
            return;
        }

        debug!(previous = %previous, current = %owner, "Audio output claimed");
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Ownership(OwnershipEvent::Claimed {
                previous: previous.to_string(),
                current: owner.to_string(),
            }));
        }
    }

    pub fn active_owner(&self) -> AudioOwner {
        *self.owner.borrow()
    }

    pub fn is_active(&self, owner: AudioOwner) -> bool {
        self.active_owner() == owner
    }

    /// Watch ownership changes. The receiver sees the current owner immediately.
    pub fn subscribe(&self) -> watch::Receiver<AudioOwner> {
        self.owner.subscribe()
    }

    /// Register (or replace) the remote-control handlers for `owner`.
    pub fn register_handlers(&self, owner: AudioOwner, handler: Arc<dyn RemoteCommandHandler>) {
        self.handlers.write().insert(owner, handler);
    }

    pub fn unregister_handlers(&self, owner: AudioOwner) {
        self.handlers.write().remove(&owner);
    }

    /// Route a remote-control command to the active owner.
    ///
    /// Returns `false` when nobody owns the output or the owner registered no handlers.
    pub async fn dispatch(&self, command: RemoteCommand) -> bool {
        let owner = self.active_owner();
        let handler = self.handlers.read().get(&owner).cloned();
        let Some(handler) = handler else {
            debug!(owner = %owner, ?command, "Remote command dropped: no handler");
            return false;
        };

        debug!(owner = %owner, ?command, "Dispatching remote command");
        match command {
            RemoteCommand::Play => handler.on_play().await,
            RemoteCommand::Pause => handler.on_pause().await,
            RemoteCommand::Stop => handler.on_stop().await,
        }
        true
    }

    pub fn set_transition_guard(&self, active: bool) {
        self.transition_guard.store(active, Ordering::SeqCst);
    }

    pub fn is_transition_guarded(&self) -> bool {
        self.transition_guard.load(Ordering::SeqCst)
    }

    /// Whether `owner` may treat a backend event as its own right now.
    pub fn should_process(&self, owner: AudioOwner) -> bool {
        self.is_active(owner) && !self.is_transition_guarded()
    }
}

impl Default for AudioResourceArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AudioResourceArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioResourceArbiter")
            .field("owner", &self.active_owner())
            .field("transition_guard", &self.is_transition_guarded())
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}
