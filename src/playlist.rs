use crate::clip::{Clip, Priority};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full set of clips as held by the playlist store. Order in the file is
/// irrelevant; the scheduler derives play order from priority metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub clips: Vec<Clip>,
    /// Top-level keys owned by producers, preserved on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Playlist {
    pub fn new(clips: Vec<Clip>) -> Self {
        Playlist {
            clips,
            extra: Map::new(),
        }
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    /// Append a clip. Ids must be unique within the playlist.
    pub fn add_clip(&mut self, clip: Clip) -> Result<()> {
        if self.find(&clip.id).is_some() {
            return Err(Error::DuplicateClip(clip.id));
        }
        self.clips.push(clip);
        Ok(())
    }

    pub fn count_tier(&self, priority: Priority) -> usize {
        self.clips.iter().filter(|c| c.priority == priority).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(id: &str, priority: Priority) -> Clip {
        Clip::new(id, format!("{}.mp4", id), priority)
    }

    #[test]
    fn new_playlist_is_empty() {
        let pl = Playlist::default();
        assert!(pl.is_empty());
        assert_eq!(pl.clip_count(), 0);
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let mut pl = Playlist::default();
        pl.add_clip(clip("a", Priority::Normal)).unwrap();
        let err = pl.add_clip(clip("a", Priority::Breaking)).unwrap_err();
        assert!(matches!(err, Error::DuplicateClip(id) if id == "a"));
        assert_eq!(pl.clip_count(), 1);
    }

    #[test]
    fn count_tier_reads_parsed_priority() {
        let pl: Playlist = serde_json::from_str(
            r#"{"clips":[
                {"id":"a","path":"a.mp4","priority":"breaking"},
                {"id":"b","path":"b.mp4","priority":"urgent"},
                {"id":"c","path":"c.mp4"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(pl.count_tier(Priority::Breaking), 1);
        assert_eq!(pl.count_tier(Priority::Filler), 2);
        assert!(pl.find("b").is_some());
    }

    #[test]
    fn top_level_fields_are_preserved() {
        let json = r#"{"clips":[],"channel":"news","version":3}"#;
        let pl: Playlist = serde_json::from_str(json).unwrap();
        let out = serde_json::to_value(&pl).unwrap();
        assert_eq!(out["channel"], "news");
        assert_eq!(out["version"], 3);
    }
}
