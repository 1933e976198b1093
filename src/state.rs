//! Engine state: the durable cursor that survives restarts.
//!
//! Only the engine writes this file. It is rewritten after every clip attempt
//! and on shutdown, and is safe for other processes to read at any time.

use crate::clip::Priority;
use crate::error::Result;
use crate::json_file::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineState {
    /// Cleared to request (and record) shutdown.
    pub running: bool,
    pub current_clip_id: Option<String>,
    pub current_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tier: Option<Priority>,
    /// Completed passes since the very first start.
    pub loop_count: u64,
    /// First-ever start. Set once, never overwritten by a restart.
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pass_completed_at: Option<DateTime<Utc>>,
    pub clips_played: u64,
    pub errors: u64,
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState {
            running: true,
            current_clip_id: None,
            current_index: None,
            current_tier: None,
            loop_count: 0,
            started_at: None,
            last_pass_completed_at: None,
            clips_played: 0,
            errors: 0,
        }
    }
}

/// Reads and writes [`EngineState`]. Writes are serialized so the shutdown
/// path and the scheduler thread never interleave.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read whatever was last persisted, without defaults for a fresh start.
    pub fn read(&self) -> Result<Option<EngineState>> {
        read_json(&self.path)
    }

    /// Defaults overlaid with the persisted state. A missing or corrupt file
    /// yields defaults. `running` is forced on and `startedAt` is filled only
    /// if it was never recorded.
    pub fn load_merged(&self) -> EngineState {
        let mut state = match self.read() {
            Ok(Some(persisted)) => persisted,
            Ok(None) => EngineState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable engine state");
                EngineState::default()
            }
        };
        state.running = true;
        state.started_at.get_or_insert_with(Utc::now);
        state
    }

    pub fn save(&self, state: &EngineState) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        write_json_atomic(&self.path, state)
    }

    /// Persist `running = false` on top of the latest saved state.
    pub fn mark_stopped(&self) -> Result<EngineState> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut state = match self.read() {
            Ok(Some(s)) => s,
            _ => EngineState::default(),
        };
        state.running = false;
        write_json_atomic(&self.path, &state)?;
        Ok(state)
    }
}
