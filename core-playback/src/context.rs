//! # Playback Context
//!
//! The ordered list an episode was started from (a queue, a playlist, a
//! podcast feed) plus a cursor into it. Auto-advance walks the cursor.
//!
//! A context is an immutable value: moving the cursor produces a new context,
//! and the engine swaps whole contexts rather than editing one in place.

use crate::error::{PlaybackError, Result};
use crate::models::Episode;
use serde::{Deserialize, Serialize};

/// Where a context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Created implicitly for a lone episode.
    Single,
    Queue,
    Playlist,
    PodcastFeed,
}

/// Ordered episodes with a current index.
///
/// Invariant: `episodes` is non-empty and `current_index < episodes.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContext")]
pub struct PlaybackContext {
    kind: ContextKind,
    episodes: Vec<Episode>,
    current_index: usize,
    source_id: Option<String>,
}

#[derive(Deserialize)]
struct RawContext {
    kind: ContextKind,
    episodes: Vec<Episode>,
    current_index: usize,
    #[serde(default)]
    source_id: Option<String>,
}

impl TryFrom<RawContext> for PlaybackContext {
    type Error = String;

    fn try_from(raw: RawContext) -> std::result::Result<Self, Self::Error> {
        if raw.episodes.is_empty() {
            return Err("playback context has no episodes".to_string());
        }
        if raw.current_index >= raw.episodes.len() {
            return Err(format!(
                "current_index {} out of bounds for {} episodes",
                raw.current_index,
                raw.episodes.len()
            ));
        }
        Ok(Self {
            kind: raw.kind,
            episodes: raw.episodes,
            current_index: raw.current_index,
            source_id: raw.source_id,
        })
    }
}

impl PlaybackContext {
    /// Build a context positioned at its first episode.
    pub fn new(
        kind: ContextKind,
        episodes: Vec<Episode>,
        source_id: Option<String>,
    ) -> Result<Self> {
        if episodes.is_empty() {
            return Err(PlaybackError::EmptyContext);
        }
        Ok(Self {
            kind,
            episodes,
            current_index: 0,
            source_id,
        })
    }

    /// Implicit one-element context.
    pub fn single(episode: Episode) -> Self {
        Self {
            kind: ContextKind::Single,
            episodes: vec![episode],
            current_index: 0,
            source_id: None,
        }
    }

    /// Point the cursor at `episode_id`. Unknown ids fall back to index 0.
    pub fn focused_on(mut self, episode_id: &str) -> Self {
        self.current_index = self.position_of(episode_id).unwrap_or(0);
        self
    }

    /// Copy of this context with the cursor at `index`, if in range.
    pub fn with_index(&self, index: usize) -> Option<Self> {
        (index < self.episodes.len()).then(|| Self {
            current_index: index,
            ..self.clone()
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn current(&self) -> &Episode {
        &self.episodes[self.current_index]
    }

    pub fn get(&self, index: usize) -> Option<&Episode> {
        self.episodes.get(index)
    }

    pub fn position_of(&self, episode_id: &str) -> Option<usize> {
        self.episodes.iter().position(|e| e.id == episode_id)
    }

    pub fn contains(&self, episode_id: &str) -> bool {
        self.position_of(episode_id).is_some()
    }

    /// Index auto-advance would move to, or `None` at the end of the list.
    pub fn next_index(&self) -> Option<usize> {
        let next = self.current_index + 1;
        (next < self.episodes.len()).then_some(next)
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.current_index.checked_sub(1)
    }

    pub fn is_last(&self) -> bool {
        self.next_index().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episodes(n: usize) -> Vec<Episode> {
        (0..n)
            .map(|i| Episode::new(format!("e{i}"), "pod", format!("Episode {i}"), format!("https://cdn.test/e{i}.mp3")))
            .collect()
    }

    #[test]
    fn test_empty_context_rejected() {
        let err = PlaybackContext::new(ContextKind::Queue, vec![], None).unwrap_err();
        assert!(matches!(err, PlaybackError::EmptyContext));
    }

    #[test]
    fn test_focus_by_id_and_fallback() {
        let ctx = PlaybackContext::new(ContextKind::Playlist, episodes(5), Some("pl-1".into())).unwrap();

        assert_eq!(ctx.clone().focused_on("e3").current_index(), 3);
        assert_eq!(ctx.focused_on("missing").current_index(), 0);
    }

    #[test]
    fn test_next_index_walks_to_end() {
        let ctx = PlaybackContext::new(ContextKind::Queue, episodes(3), None).unwrap();
        assert_eq!(ctx.next_index(), Some(1));

        let last = ctx.with_index(2).unwrap();
        assert_eq!(last.next_index(), None);
        assert!(last.is_last());
        assert_eq!(last.current().id, "e2");
        // original untouched
        assert_eq!(ctx.current_index(), 0);
    }

    #[test]
    fn test_with_index_out_of_range() {
        let ctx = PlaybackContext::single(episodes(1).remove(0));
        assert!(ctx.with_index(1).is_none());
        assert_eq!(ctx.previous_index(), None);
        assert_eq!(ctx.kind(), ContextKind::Single);
    }

    #[test]
    fn test_deserialize_rejects_bad_index() {
        let ctx = PlaybackContext::new(ContextKind::PodcastFeed, episodes(2), Some("feed".into())).unwrap();
        let mut value = serde_json::to_value(&ctx).unwrap();
        value["current_index"] = serde_json::json!(7);

        assert!(serde_json::from_value::<PlaybackContext>(value).is_err());
    }

    #[test]
    fn test_serde_round_trip_preserves_cursor() {
        let ctx = PlaybackContext::new(ContextKind::PodcastFeed, episodes(4), Some("feed".into()))
            .unwrap()
            .focused_on("e2");
        let json = serde_json::to_string(&ctx).unwrap();
        let back: PlaybackContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
        assert_eq!(back.source_id(), Some("feed"));
    }
}
