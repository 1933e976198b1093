//! Clip delivery adapter. Pushes one clip (or a short transition filler) to
//! the live sink and reports how it went.
//!
//! Delivery is blocking: the call returns when the external encoder exits,
//! which for a real-time push takes roughly as long as the clip itself.

use crate::config::Config;
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The external operation ran and failed, or could not be launched.
    Failed(String),
    /// Nothing was attempted (e.g. the media file is missing).
    Skipped(String),
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Delivered => write!(f, "delivered"),
            Delivery::Failed(reason) => write!(f, "failed: {}", reason),
            Delivery::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// Anything that can push clips to the output, one at a time.
pub trait ClipSink {
    /// Deliver one media file. Must not panic on a bad path.
    fn deliver(&self, path: &Path) -> Delivery;

    /// Deliver the fixed-length filler played between clips.
    fn deliver_transition(&self) -> Delivery;
}

/// Delivers through an `ffmpeg` child process streaming FLV to `sink_url`.
#[derive(Debug, Clone)]
pub struct FfmpegSink {
    pub ffmpeg_bin: String,
    pub sink_url: String,
    pub transition: Duration,
    pub video_size: String,
    pub frame_rate: u32,
}

impl FfmpegSink {
    pub fn from_config(config: &Config) -> Self {
        FfmpegSink {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            sink_url: config.sink_url.clone(),
            transition: config.transition,
            video_size: config.video_size.clone(),
            frame_rate: config.frame_rate,
        }
    }

    fn run(&self, args: &[String]) -> Delivery {
        let status = Command::new(&self.ffmpeg_bin)
            .args(args)
            .stdin(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Delivery::Delivered,
            Ok(s) => Delivery::Failed(format!(
                "{} exited with status {}",
                self.ffmpeg_bin,
                s.code().unwrap_or(-1)
            )),
            Err(e) => Delivery::Failed(format!("Failed to launch {}: {}", self.ffmpeg_bin, e)),
        }
    }
}

impl ClipSink for FfmpegSink {
    fn deliver(&self, path: &Path) -> Delivery {
        if !path.is_file() {
            return Delivery::Skipped(format!("file not found: {}", path.display()));
        }
        let args = build_clip_args(&path.to_string_lossy(), &self.sink_url, self.frame_rate);
        self.run(&args)
    }

    fn deliver_transition(&self) -> Delivery {
        let args = build_transition_args(
            &self.sink_url,
            self.transition,
            &self.video_size,
            self.frame_rate,
        );
        self.run(&args)
    }
}

// ── ffmpeg argument builders ─────────────────────────────────────────────────

/// Arguments for pushing a pre-rendered clip in real time.
pub fn build_clip_args(input_path: &str, sink_url: &str, frame_rate: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-re".into(),
        "-i".into(),
        input_path.to_string(),
    ];
    push_output_args(&mut args, sink_url, frame_rate);
    args
}

/// Arguments for the transition: black frames and silence for `duration`.
pub fn build_transition_args(
    sink_url: &str,
    duration: Duration,
    video_size: &str,
    frame_rate: u32,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-re".into(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        format!("color=c=black:s={}:r={}", video_size, frame_rate),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        "anullsrc=channel_layout=stereo:sample_rate=44100".into(),
        "-t".into(),
        format!("{:.3}", duration.as_secs_f64()),
    ];
    push_output_args(&mut args, sink_url, frame_rate);
    args
}

fn push_output_args(args: &mut Vec<String>, sink_url: &str, frame_rate: u32) {
    let gop = (frame_rate.max(1) * 2).to_string();
    args.extend(
        [
            "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-g", gop.as_str(), "-c:a",
            "aac", "-b:a", "128k", "-ar", "44100", "-f", "flv", sink_url,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
}
