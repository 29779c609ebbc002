//! # Event Bus System
//!
//! Broadcasts what the playback core is doing to anyone who cares: UI layers,
//! analytics, the host's now-playing surface. Built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain, wrapped by [`CoreEvent`]
//! - **EventBus**: central broadcast channel for publishing events
//! - **EventStream**: wrapper for consuming events with filtering
//!
//! ```text
//! ┌────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ PlaybackEngine ├────────>│           ├────────────>│ UI binding │
//! └────────────────┘         │ EventBus  │             └────────────┘
//! ┌────────────────┐  emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ProgressTracker ├────────>│  channel) ├────────────>│ Analytics  │
//! └────────────────┘         │           │             └────────────┘
//! ┌────────────────┐  emit   │           │
//! │    Arbiter     ├────────>│           │
//! └────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, ProgressEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Progress(ProgressEvent::MarkedPlayed {
//!         episode_id: "ep-7".to_string(),
//!     }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert_eq!(received.description(), "Episode marked played");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n` events.
//!   Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: all senders have been dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error; publishers in this workspace
//! ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// What is sounding and why it changed
    Playback(PlaybackEvent),
    /// Listening progress bookkeeping
    Progress(ProgressEvent),
    /// Audio output ownership changes
    Ownership(OwnershipEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Progress(e) => e.description(),
            CoreEvent::Ownership(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Progress(ProgressEvent::SyncFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::AwaitingGesture { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::ContextExhausted { .. }) => EventSeverity::Info,
            CoreEvent::Progress(ProgressEvent::MarkedPlayed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Transitions of the podcast playback engine.
///
/// Positions are reported in whole milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A new episode is being loaded into the backend.
    Loading {
        episode_id: String,
        /// Load generation; later generations supersede earlier ones.
        generation: u64,
    },
    /// Playback started on a freshly loaded episode.
    Started {
        episode_id: String,
        title: String,
        position_ms: u64,
    },
    Paused {
        episode_id: String,
        position_ms: u64,
    },
    Resumed {
        episode_id: String,
        position_ms: u64,
    },
    /// The host refused to start audio without a user gesture.
    AwaitingGesture { episode_id: String },
    /// Playback stopped and the engine is idle.
    Stopped { episode_id: Option<String> },
    /// Episode reached its end.
    Completed { episode_id: String },
    /// Moved to another episode within the current context.
    Advanced {
        from_episode_id: String,
        to_episode_id: String,
        index: usize,
    },
    /// The last episode of a context finished and nothing follows.
    ContextExhausted { source_id: Option<String> },
    /// A saved session was restored without starting audio.
    Restored {
        episode_id: String,
        position_ms: u64,
    },
    Error {
        episode_id: Option<String>,
        message: String,
        /// Whether playback can be retried.
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Loading { .. } => "Episode loading",
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::AwaitingGesture { .. } => "Waiting for user gesture",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::Completed { .. } => "Episode completed",
            PlaybackEvent::Advanced { .. } => "Advanced to next episode",
            PlaybackEvent::ContextExhausted { .. } => "Playback context exhausted",
            PlaybackEvent::Restored { .. } => "Session restored",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Progress Events
// ============================================================================

/// Progress persistence outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    /// Episode flagged as played (ended or near-end threshold).
    MarkedPlayed { episode_id: String },
    /// A previously played episode was reset to the beginning for replay.
    ReplayReset { episode_id: String },
    /// Progress reached the remote store.
    Synced {
        episode_id: String,
        position_ms: u64,
    },
    /// Remote sync gave up after its retry budget.
    SyncFailed {
        episode_id: String,
        attempts: u32,
        message: String,
    },
    /// Local session snapshot written.
    SnapshotSaved { episode_id: String },
}

impl ProgressEvent {
    fn description(&self) -> &str {
        match self {
            ProgressEvent::MarkedPlayed { .. } => "Episode marked played",
            ProgressEvent::ReplayReset { .. } => "Played episode reset for replay",
            ProgressEvent::Synced { .. } => "Progress synced",
            ProgressEvent::SyncFailed { .. } => "Progress sync failed",
            ProgressEvent::SnapshotSaved { .. } => "Session snapshot saved",
        }
    }
}

// ============================================================================
// Ownership Events
// ============================================================================

/// Audio output ownership changes published by the arbiter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum OwnershipEvent {
    Claimed { previous: String, current: String },
}

impl OwnershipEvent {
    fn description(&self) -> &str {
        match self {
            OwnershipEvent::Claimed { .. } => "Audio output claimed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, CoreEvent, PlaybackEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.emit(CoreEvent::Playback(PlaybackEvent::Completed {
///     episode_id: "ep-1".to_string(),
/// })).ok();
///
/// assert!(subscriber.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::default();
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::{EventBus, CoreEvent, PlaybackEvent};
    ///
    /// let event_bus = EventBus::new(100);
    /// let event = CoreEvent::Playback(PlaybackEvent::Stopped { episode_id: None });
    ///
    /// match event_bus.emit(event) {
    ///     Ok(n) => println!("Event sent to {} subscribers", n),
    ///     Err(_) => println!("No active subscribers"),
    /// }
    /// ```
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use core_runtime::events::EventBus;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let event_bus = EventBus::new(100);
    /// let mut subscriber = event_bus.subscribe();
    ///
    /// tokio::spawn(async move {
    ///     while let Ok(event) = subscriber.recv().await {
    ///         println!("Received: {:?}", event);
    ///     }
    /// });
    /// # }
    /// ```
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
///
/// This provides a more ergonomic API for consuming events with optional filtering
/// by event type or severity.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let stream = EventStream::new(event_bus.subscribe());
///
/// // Only progress events
/// let mut progress = stream.filter(|event| {
///     matches!(event, CoreEvent::Progress(_))
/// });
/// # }
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::{EventBus, EventStream, CoreEvent};
    ///
    /// let event_bus = EventBus::new(100);
    /// let stream = EventStream::new(event_bus.subscribe());
    ///
    /// let ownership = stream.filter(|event| {
    ///     matches!(event, CoreEvent::Ownership(_))
    /// });
    /// ```
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// This will skip events that don't match the filter and return the next matching event.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            // If no filter, return immediately
            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            // Apply filter
            if filter(&event) {
                return Ok(event);
            }

            // Event didn't match filter, continue to next event
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    // If no filter, return immediately
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    // Apply filter
                    if filter(&event) {
                        return Some(Ok(event));
                    }

                    // Event didn't match filter, continue
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: &str) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::Completed {
            episode_id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(completed("ep-1")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Ownership(OwnershipEvent::Claimed {
            previous: "none".to_string(),
            current: "podcast".to_string(),
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Progress(_)));

        bus.emit(completed("ep-1")).ok();
        let progress = CoreEvent::Progress(ProgressEvent::Synced {
            episode_id: "ep-1".to_string(),
            position_ms: 120_000,
        });
        bus.emit(progress.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), progress);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(completed(&format!("ep-{}", i))).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let error = CoreEvent::Playback(PlaybackEvent::Error {
            episode_id: None,
            message: "load failed".to_string(),
            recoverable: true,
        });
        assert_eq!(error.severity(), EventSeverity::Error);

        let failed_sync = CoreEvent::Progress(ProgressEvent::SyncFailed {
            episode_id: "ep-1".to_string(),
            attempts: 3,
            message: "timeout".to_string(),
        });
        assert_eq!(failed_sync.severity(), EventSeverity::Warning);

        assert_eq!(completed("ep-1").severity(), EventSeverity::Debug);
        assert!(EventSeverity::Error > EventSeverity::Info);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Playback(PlaybackEvent::Advanced {
            from_episode_id: "ep-2".to_string(),
            to_episode_id: "ep-3".to_string(),
            index: 3,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Playback");
        assert_eq!(json["payload"]["event"], "Advanced");
        assert_eq!(json["payload"]["index"], 3);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let h1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(completed(&format!("a-{}", i))).ok();
            }
        });
        let h2 = tokio::spawn(async move {
            for i in 0..10 {
                bus2.emit(completed(&format!("b-{}", i))).ok();
            }
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
