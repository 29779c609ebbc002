//! Domain types shared by the playback components.

use bridge_traits::RemoteProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A podcast episode as handed to the engine by the UI layer.
///
/// Immutable once loaded; the engine refers to it by `id` everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub podcast_id: String,
    pub title: String,
    /// Remote media URL. A downloaded copy takes precedence at load time.
    pub audio_url: String,
    /// Seconds; unknown until the feed or the backend reports it.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub podcast_title: Option<String>,
}

impl Episode {
    pub fn new(
        id: impl Into<String>,
        podcast_id: impl Into<String>,
        title: impl Into<String>,
        audio_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            podcast_id: podcast_id.into(),
            title: title.into(),
            audio_url: audio_url.into(),
            duration: None,
            artwork_url: None,
            podcast_title: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = normalize_duration(Some(seconds));
        self
    }

    pub fn with_artwork(mut self, url: impl Into<String>) -> Self {
        self.artwork_url = Some(url.into());
        self
    }

    pub fn with_podcast_title(mut self, title: impl Into<String>) -> Self {
        self.podcast_title = Some(title.into());
        self
    }
}

/// Engine-visible playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackStatus {
    /// Nothing loaded.
    #[default]
    Idle,
    /// An episode is being loaded into the backend.
    Loading,
    Playing,
    /// Loaded and paused, including a restored session that has not touched the backend yet.
    Paused,
    /// The host refused to start audio; the next user tap should call `resume`.
    AwaitingGesture,
}

impl PlaybackStatus {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackStatus::Playing)
    }
}

/// Treat non-finite and non-positive durations as unknown.
///
/// Some hosts report `0` or `NaN` until metadata has been parsed.
pub fn normalize_duration(duration: Option<f64>) -> Option<f64> {
    duration.filter(|d| d.is_finite() && *d > 0.0)
}

/// Clamp a position into `[0, duration]`, or `[0, ∞)` when the duration is unknown.
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    if !position.is_finite() || position < 0.0 {
        return 0.0;
    }
    match normalize_duration(duration) {
        Some(d) => position.min(d),
        None => position,
    }
}

/// Listening progress for one episode.
///
/// Constructed through [`ProgressRecord::new`], which enforces
/// `0 <= position <= duration` whenever the duration is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub episode_id: String,
    pub position: f64,
    pub duration: Option<f64>,
    pub played: bool,
    pub speed: f32,
}

impl ProgressRecord {
    pub fn new(
        episode_id: impl Into<String>,
        position: f64,
        duration: Option<f64>,
        played: bool,
        speed: f32,
    ) -> Self {
        let duration = normalize_duration(duration);
        Self {
            episode_id: episode_id.into(),
            position: clamp_position(position, duration),
            duration,
            played,
            speed,
        }
    }

    /// Fraction listened, when the duration is known.
    pub fn fraction(&self) -> Option<f64> {
        self.duration.map(|d| (self.position / d).clamp(0.0, 1.0))
    }

    /// Seconds left, when the duration is known.
    pub fn remaining(&self) -> Option<f64> {
        self.duration.map(|d| (d - self.position).max(0.0))
    }

    pub fn to_remote(&self, at: DateTime<Utc>) -> RemoteProgress {
        RemoteProgress {
            episode_id: self.episode_id.clone(),
            position: self.position,
            duration: self.duration,
            played: self.played,
            last_played_at: at,
            speed: self.speed,
        }
    }

    pub fn from_remote(remote: &RemoteProgress) -> Self {
        Self::new(
            remote.episode_id.clone(),
            remote.position,
            remote.duration,
            remote.played,
            remote.speed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_record_clamps_into_bounds() {
        let over = ProgressRecord::new("ep", 410.0, Some(300.0), false, 1.0);
        assert_eq!(over.position, 300.0);

        let negative = ProgressRecord::new("ep", -3.0, Some(300.0), false, 1.0);
        assert_eq!(negative.position, 0.0);

        let nan = ProgressRecord::new("ep", f64::NAN, Some(300.0), false, 1.0);
        assert_eq!(nan.position, 0.0);
    }

    #[test]
    fn test_unknown_duration_only_clamps_below() {
        let record = ProgressRecord::new("ep", 9_999.0, None, false, 1.0);
        assert_eq!(record.position, 9_999.0);
        assert_eq!(record.fraction(), None);

        let zero = ProgressRecord::new("ep", 12.0, Some(0.0), false, 1.0);
        assert_eq!(zero.duration, None);
        assert_eq!(zero.position, 12.0);
    }

    #[test]
    fn test_fraction_and_remaining() {
        let record = ProgressRecord::new("ep", 75.0, Some(300.0), false, 1.0);
        assert_eq!(record.fraction(), Some(0.25));
        assert_eq!(record.remaining(), Some(225.0));
    }

    #[test]
    fn test_episode_deserializes_without_optional_fields() {
        let json = r#"{"id":"ep-1","podcast_id":"pod-1","title":"Pilot","audio_url":"https://x/1.mp3"}"#;
        let episode: Episode = serde_json::from_str(json).unwrap();
        assert_eq!(episode, Episode::new("ep-1", "pod-1", "Pilot", "https://x/1.mp3"));
    }
}
