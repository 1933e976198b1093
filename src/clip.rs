use chrono::{DateTime, SecondsFormat, Utc};
use lofty::file::AudioFile;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduling tier of a clip. Closed set; anything unrecognized is `Filler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Pinned,
    Breaking,
    Normal,
    #[default]
    Filler,
}

impl Priority {
    /// Map a free-form tag onto a tier (case-insensitive). Unknown tags degrade to `Filler`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "pinned" => Priority::Pinned,
            "breaking" => Priority::Breaking,
            "normal" => Priority::Normal,
            _ => Priority::Filler,
        }
    }

    /// Tier of a raw JSON `priority` value. Non-strings are `Filler`.
    pub fn from_value(raw: &Value) -> Self {
        raw.as_str().map(Priority::from_tag).unwrap_or_default()
    }

    /// Strict parse for operator input, where a typo should be an error
    /// rather than a silent demotion to filler.
    pub fn from_str_loose(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "pinned" | "pin" => Ok(Priority::Pinned),
            "breaking" | "break" => Ok(Priority::Breaking),
            "normal" => Ok(Priority::Normal),
            "filler" => Ok(Priority::Filler),
            _ => Err(format!(
                "Unknown priority '{}'. Expected: pinned, breaking, normal, filler",
                s
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Priority::Pinned => "pinned",
            Priority::Breaking => "breaking",
            Priority::Normal => "normal",
            Priority::Filler => "filler",
        })
    }
}

// Never rejects: null, numbers and unknown strings all land in `Filler`.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Priority::from_value(&Value::deserialize(d)?))
    }
}

/// One playable unit in the playlist store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    /// Media file, relative to the playlist-owning directory unless absolute.
    pub path: String,
    #[serde(default)]
    pub priority: Priority,
    /// Explicit ordinal, only meaningful for pinned clips.
    #[serde(
        default,
        deserialize_with = "lenient_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub position: Option<i64>,
    #[serde(
        rename = "addedAt",
        default,
        with = "added_at_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub added_at: Option<DateTime<Utc>>,
    /// Display only. A non-string value reads as absent.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    /// Fields written by producers that the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Clip {
    pub fn new(id: impl Into<String>, path: impl Into<String>, priority: Priority) -> Self {
        Clip {
            id: id.into(),
            path: path.into(),
            priority,
            position: None,
            added_at: None,
            title: None,
            extra: Map::new(),
        }
    }

    /// Resolve the media path against the directory that owns the playlist.
    pub fn resolve(&self, base_dir: &Path) -> PathBuf {
        let path = Path::new(&self.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Title for display, falling back to the id.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

/// Read the container duration of a media file. Used for logging only.
pub fn probe_duration(path: &Path) -> Option<Duration> {
    let tagged = lofty::read_from_path(path).ok()?;
    Some(tagged.properties().duration())
}

/// Format a duration as M:SS.
pub fn duration_display(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let raw = Value::deserialize(d)?;
    Ok(match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// `addedAt` is accepted as RFC 3339 or epoch milliseconds; written back as RFC 3339.
mod added_at_serde {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(t) => s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Value::deserialize(d)?;
        Ok(match raw {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        })
    }
}
