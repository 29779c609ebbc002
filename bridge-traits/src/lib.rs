//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the podcast playback core and the
//! platform-specific pieces it coordinates but does not own: the audio output
//! itself, the durable progress store, local key-value storage, the artwork
//! cache and the download manager.
//!
//! ## Traits
//!
//! ### Audio Output
//! - [`MediaSessionDriver`](playback::MediaSessionDriver) - Queue-based native player with lock-screen integration
//! - [`AudioElementDriver`](playback::AudioElementDriver) - Single-track streaming element (web-style)
//!
//! ### Persistence
//! - [`RemoteProgressStore`](progress::RemoteProgressStore) - Durable per-user listening progress
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences and the session snapshot slot
//!
//! ### Collaborators
//! - [`ImageCache`](storage::ImageCache) - Remote artwork URL to local file
//! - [`DownloadResolver`](storage::DownloadResolver) - Locally downloaded episode audio
//! - [`LifecycleObserver`](background::LifecycleObserver) - App foreground/background transitions
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Audio Output |
//! |----------|---------------------|--------------|
//! | Desktop  | `bridge-desktop`    | host supplied |
//! | iOS      | TBD                 | `MediaSessionDriver` |
//! | Android  | TBD                 | `MediaSessionDriver` |
//! | Web      | TBD                 | `AudioElementDriver` |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report host policy refusals (autoplay blocking) as [`BridgeError::NotAllowed`]
//! - Include error context (e.g., file paths, HTTP status)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so the engine actor and its
//! background workers can share them through `Arc`.

pub mod background;
pub mod error;
pub mod playback;
pub mod progress;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use playback::{AudioElementDriver, DriverEvent, MediaSessionDriver, SessionTrack};
pub use progress::{RemoteProgress, RemoteProgressStore};
pub use storage::{DownloadResolver, ImageCache, SettingsStore};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
