//! # Session Restore
//!
//! Single-slot snapshot of "what was playing" so a relaunch can put the UI
//! back where the listener left it, paused, without touching the audio
//! output. Stored as JSON in the host [`SettingsStore`]; the auto-advance
//! preference lives next to it.

use crate::context::PlaybackContext;
use crate::error::{PlaybackError, Result};
use crate::models::{clamp_position, Episode};
use bridge_traits::SettingsStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SNAPSHOT_KEY: &str = "playback.session_snapshot";
pub const AUTO_ADVANCE_KEY: &str = "playback.auto_advance";

/// What was playing at the last snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub episode: Episode,
    /// Seconds.
    pub position: f64,
    pub context: PlaybackContext,
    pub speed: f32,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSnapshot {
    pub fn new(
        episode: Episode,
        position: f64,
        context: PlaybackContext,
        speed: f32,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let position = clamp_position(position, episode.duration);
        Self {
            episode,
            position,
            context,
            speed,
            saved_at,
        }
    }
}

pub struct SessionStore {
    settings: Arc<dyn SettingsStore>,
}

impl SessionStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// Overwrite the slot.
    pub async fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.settings
            .set_string(SNAPSHOT_KEY, &json)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        debug!(episode_id = %snapshot.episode.id, position = snapshot.position, "Session snapshot saved");
        Ok(())
    }

    /// Read the slot. A corrupt snapshot is discarded and reported as absent.
    pub async fn load(&self) -> Result<Option<PersistedSnapshot>> {
        let raw = self
            .settings
            .get_string(SNAPSHOT_KEY)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<PersistedSnapshot>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session snapshot");
                self.clear().await?;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.settings
            .delete(SNAPSHOT_KEY)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))
    }

    /// Stored auto-advance preference, if the user ever set one.
    pub async fn auto_advance(&self) -> Result<Option<bool>> {
        self.settings
            .get_bool(AUTO_ADVANCE_KEY)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))
    }

    pub async fn set_auto_advance(&self, enabled: bool) -> Result<()> {
        self.settings
            .set_bool(AUTO_ADVANCE_KEY, enabled)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemorySettings {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl SettingsStore for MemorySettings {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            self.values.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.values.lock().get(key).cloned())
        }
        async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
            self.set_string(key, &value.to_string()).await
        }
        async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
            Ok(self.values.lock().get(key).and_then(|v| v.parse().ok()))
        }
        async fn set_f64(&self, key: &str, value: f64) -> BridgeResult<()> {
            self.set_string(key, &value.to_string()).await
        }
        async fn get_f64(&self, key: &str) -> BridgeResult<Option<f64>> {
            Ok(self.values.lock().get(key).and_then(|v| v.parse().ok()))
        }
        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.values.lock().remove(key);
            Ok(())
        }
        async fn has_key(&self, key: &str) -> BridgeResult<bool> {
            Ok(self.values.lock().contains_key(key))
        }
    }

    fn snapshot() -> PersistedSnapshot {
        let episodes: Vec<Episode> = (0..3)
            .map(|i| {
                Episode::new(format!("e{i}"), "pod", format!("E{i}"), format!("https://cdn.test/{i}.mp3"))
                    .with_duration(600.0)
            })
            .collect();
        let context = PlaybackContext::new(ContextKind::Playlist, episodes.clone(), Some("pl".into()))
            .unwrap()
            .focused_on("e1");
        PersistedSnapshot::new(
            episodes[1].clone(),
            321.5,
            context,
            1.25,
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_save_then_load_restores_equivalent_snapshot() {
        let store = SessionStore::new(Arc::new(MemorySettings::default()));
        let saved = snapshot();

        store.save(&saved).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded, saved);
        assert_eq!(loaded.context.current_index(), 1);
    }

    #[tokio::test]
    async fn test_single_slot_overwritten() {
        let store = SessionStore::new(Arc::new(MemorySettings::default()));
        let mut first = snapshot();
        store.save(&first).await.unwrap();

        first.position = 10.0;
        store.save(&first).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap().position, 10.0);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_discarded() {
        let settings = Arc::new(MemorySettings::default());
        settings.set_string(SNAPSHOT_KEY, "{not json").await.unwrap();
        let store = SessionStore::new(settings.clone());

        assert!(store.load().await.unwrap().is_none());
        assert!(!settings.has_key(SNAPSHOT_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_and_missing() {
        let store = SessionStore::new(Arc::new(MemorySettings::default()));
        assert!(store.load().await.unwrap().is_none());

        store.save(&snapshot()).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auto_advance_preference() {
        let store = SessionStore::new(Arc::new(MemorySettings::default()));
        assert_eq!(store.auto_advance().await.unwrap(), None);

        store.set_auto_advance(false).await.unwrap();
        assert_eq!(store.auto_advance().await.unwrap(), Some(false));
    }

    #[test]
    fn test_position_clamped_on_construction() {
        let mut s = snapshot();
        s = PersistedSnapshot::new(s.episode, 9_999.0, s.context, s.speed, s.saved_at);
        assert_eq!(s.position, 600.0);
    }
}
