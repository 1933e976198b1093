use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long to wait before re-reading an empty or unreadable playlist store.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Length of the filler delivered between clips.
pub const TRANSITION: Duration = Duration::from_secs(1);

const APP_DIR: &str = "clipflow";

/// Runtime configuration for the scheduling engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination the delivery adapter pushes to (e.g. an RTMP URL). Opaque here.
    pub sink_url: String,
    pub playlist_path: PathBuf,
    pub state_path: PathBuf,
    /// Scratch space the engine must be able to create at startup.
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub transition: Duration,
    pub ffmpeg_bin: String,
    /// Allow the same breaking clip to pre-empt more than one step per pass.
    /// Off by default, so a breaking clip substitutes once. Setting it gives
    /// the re-select-every-later-step behavior instead.
    pub repeat_breaking: bool,
    /// Transition filler frame size, WIDTHxHEIGHT.
    pub video_size: String,
    pub frame_rate: u32,
}

impl Config {
    /// Configuration rooted in the platform data directory.
    pub fn with_sink(sink_url: impl Into<String>) -> Self {
        let root = default_root();
        Config {
            sink_url: sink_url.into(),
            playlist_path: root.join("playlist.json"),
            state_path: root.join("engine_state.json"),
            work_dir: root.join("work"),
            poll_interval: POLL_INTERVAL,
            transition: TRANSITION,
            ffmpeg_bin: "ffmpeg".to_string(),
            repeat_breaking: false,
            video_size: "1280x720".to_string(),
            frame_rate: 30,
        }
    }

    /// Create every local directory the engine needs. Failure here is the one
    /// fatal startup condition.
    pub fn prepare(&self) -> Result<()> {
        create_dir(&self.work_dir)?;
        for file in [&self.playlist_path, &self.state_path] {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                create_dir(parent)?;
            }
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::WorkDir {
        path: path.to_path_buf(),
        source,
    })
}

/// `<data dir>/clipflow`, or `./clipflow` when the platform has no data dir.
pub fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
