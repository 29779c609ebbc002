//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `SqliteSettingsStore`: `SettingsStore` over a SQLite key-value table
//! - `HttpProgressStore`: `RemoteProgressStore` against a JSON progress API using `reqwest`
//! - `DiskImageCache`: `ImageCache` that downloads artwork into the platform cache directory
//! - `DirectoryDownloadResolver`: `DownloadResolver` over a downloads folder
//! - `DesktopLifecycleObserver`: `LifecycleObserver` driven by the host window events
//!
//! Audio output is not provided here. Desktop hosts supply a
//! `MediaSessionDriver` or `AudioElementDriver` backed by their own player.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HttpProgressStore, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let settings = SqliteSettingsStore::new("settings.db".into()).await?;
//!     let progress = HttpProgressStore::new("https://api.example.com/v1")?;
//!     // Hand both to the core configuration
//!     Ok(())
//! }
//! ```

mod artwork;
mod downloads;
mod lifecycle;
mod progress;
mod settings;

pub use artwork::DiskImageCache;
pub use downloads::DirectoryDownloadResolver;
pub use lifecycle::{DesktopLifecycleChangeStream, DesktopLifecycleObserver};
pub use progress::HttpProgressStore;
pub use settings::SqliteSettingsStore;
