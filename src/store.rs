//! Playlist store: the JSON file external producers append clips to.
//!
//! The store is the single source of truth. The scheduler re-reads it before
//! every decision and never caches a copy across steps.
//!
//! Writes here are plain read-modify-write with no locking. A producer that
//! adds a clip between our read and our rewrite loses its update. This is
//! accepted: the file is a continuously re-polled queue, and the window is
//! kept to a single read immediately followed by the write.

use crate::clip::{Clip, Priority};
use crate::error::{Error, Result};
use crate::json_file::{read_json, write_json_atomic};
use crate::playlist::Playlist;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PlaylistStore {
    path: PathBuf,
}

impl PlaylistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PlaylistStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative clip paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Load the playlist. A missing file is an empty playlist; unreadable or
    /// malformed content is an error the caller treats as "nothing to do yet".
    pub fn load(&self) -> Result<Playlist> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Rewrite the whole store from the typed model.
    pub fn save(&self, playlist: &Playlist) -> Result<()> {
        write_json_atomic(&self.path, playlist)
    }

    /// Remove every breaking clip from the store. Returns the number removed.
    /// Nothing is written when there is nothing to remove.
    pub fn prune_breaking(&self) -> Result<usize> {
        let Some((mut doc, _)) = self.read_document()? else {
            return Ok(0);
        };
        let Some(clips) = doc.get_mut("clips").and_then(Value::as_array_mut) else {
            return Ok(0);
        };
        let before = clips.len();
        clips.retain(|entry| tier_of(entry) != Priority::Breaking);
        let removed = before - clips.len();
        if removed > 0 {
            write_json_atomic(&self.path, &doc)?;
        }
        Ok(removed)
    }

    /// Producer side: append a clip to the store.
    pub fn add_clip(&self, clip: Clip) -> Result<()> {
        let (mut doc, mut playlist) = self.read_document()?.unwrap_or_default();
        let entry = serde_json::to_value(&clip).map_err(|source| Error::Parse {
            path: self.path.clone(),
            source,
        })?;
        playlist.add_clip(clip)?;

        let mut clips = match doc.remove("clips") {
            Some(Value::Array(list)) => list,
            _ => Vec::new(),
        };
        clips.push(entry);
        doc.insert("clips".to_string(), Value::Array(clips));
        write_json_atomic(&self.path, &doc)
    }

    /// Producer side: remove a clip by id. Every entry carrying that id goes.
    pub fn remove_clip(&self, id: &str) -> Result<Clip> {
        let (mut doc, playlist) = self.read_document()?.unwrap_or_default();
        let clip = playlist
            .find(id)
            .cloned()
            .ok_or_else(|| Error::ClipNotFound(id.to_string()))?;
        if let Some(clips) = doc.get_mut("clips").and_then(Value::as_array_mut) {
            clips.retain(|entry| entry.get("id").and_then(Value::as_str) != Some(id));
        }
        write_json_atomic(&self.path, &doc)?;
        Ok(clip)
    }

    /// The store as producers wrote it, alongside its typed reading. Edits
    /// that add or drop whole entries work on the raw document so the values
    /// in every other entry are written back exactly as found.
    fn read_document(&self) -> Result<Option<(Map<String, Value>, Playlist)>> {
        let Some(doc) = read_json::<Map<String, Value>>(&self.path)? else {
            return Ok(None);
        };
        let playlist = serde_json::from_value(Value::Object(doc.clone())).map_err(|source| {
            Error::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(Some((doc, playlist)))
    }
}

fn tier_of(entry: &Value) -> Priority {
    entry
        .get("priority")
        .map(Priority::from_value)
        .unwrap_or_default()
}
