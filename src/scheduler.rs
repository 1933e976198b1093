//! Scheduler loop. Walks the playlist pass by pass and pushes each clip to
//! the sink.
//!
//! ```text
//! AWAIT_PLAYLIST → BUILD_PASS → PLAY_STEP ×N (clip + transition) → PASS_COMPLETE ─┐
//!       ▲                                                                         │
//!       └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Engine state is threaded through every step by value and persisted at
//! fixed checkpoints: before each delivery, after each clip attempt, and at
//! pass completion. The only shared mutable value is the run flag.

use crate::clip::{duration_display, probe_duration};
use crate::config::Config;
use crate::delivery::ClipSink;
use crate::ordering::{PassPlan, baseline_order, pending_breaking};
use crate::playlist::Playlist;
use crate::state::{EngineState, StateStore};
use crate::store::PlaylistStore;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest uninterrupted sleep while polling, so a stop request is seen promptly.
const WAIT_SLICE: Duration = Duration::from_millis(200);

pub struct Scheduler<S: ClipSink> {
    config: Config,
    store: PlaylistStore,
    states: Arc<StateStore>,
    sink: S,
    running: Arc<AtomicBool>,
}

impl<S: ClipSink> Scheduler<S> {
    pub fn new(config: Config, sink: S, states: Arc<StateStore>, running: Arc<AtomicBool>) -> Self {
        let store = PlaylistStore::new(config.playlist_path.clone());
        Scheduler {
            config,
            store,
            states,
            sink,
            running,
        }
    }

    pub fn store(&self) -> &PlaylistStore {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request shutdown. In-flight deliveries are not interrupted; no new
    /// work starts afterwards.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run passes until stopped. Returns the final state, already persisted.
    pub fn run(&self, mut state: EngineState) -> EngineState {
        info!(
            playlist = %self.store.path().display(),
            sink = %self.config.sink_url,
            loop_count = state.loop_count,
            clips_played = state.clips_played,
            "Scheduler started"
        );
        self.persist(&mut state);

        while self.is_running() {
            let Some(playlist) = self.await_playlist() else {
                break;
            };
            state = self.run_pass(state, &playlist);
        }

        self.persist(&mut state);
        info!(
            loop_count = state.loop_count,
            clips_played = state.clips_played,
            errors = state.errors,
            "Scheduler stopped"
        );
        state
    }

    /// AWAIT_PLAYLIST: block until the store holds at least one clip.
    /// Returns `None` only if a stop is requested while waiting.
    pub fn await_playlist(&self) -> Option<Playlist> {
        let mut idle = IdleReason::default();
        while self.is_running() {
            match self.store.load() {
                Ok(playlist) if !playlist.is_empty() => return Some(playlist),
                Ok(_) => {
                    if idle.enter(Idle::Empty) {
                        info!(
                            path = %self.store.path().display(),
                            retry_secs = self.config.poll_interval.as_secs_f64(),
                            "Playlist empty or missing; waiting"
                        );
                    } else {
                        debug!("Playlist still empty");
                    }
                }
                Err(e) => {
                    idle.enter(Idle::Unreadable);
                    warn!(error = %e, "Playlist unreadable; retrying after poll interval");
                }
            }
            self.wait(self.config.poll_interval);
        }
        None
    }

    /// BUILD_PASS + PLAY_STEP×N + PASS_COMPLETE for one playlist snapshot.
    /// A stop request mid-pass leaves the pass incomplete: no loop increment
    /// and no prune.
    pub fn run_pass(&self, state: EngineState, playlist: &Playlist) -> EngineState {
        let mut plan = self.build_pass(playlist, &state);
        let mut state = state;
        for index in 0..plan.len() {
            if !self.is_running() {
                info!(step = index, of = plan.len(), "Stop requested; abandoning pass");
                return state;
            }
            state = self.play_step(state, &mut plan, index);
        }
        self.complete_pass(state)
    }

    /// BUILD_PASS: fix the base order for this pass.
    pub fn build_pass(&self, playlist: &Playlist, state: &EngineState) -> PassPlan {
        let plan = PassPlan::new(baseline_order(playlist));
        info!(
            pass = state.loop_count + 1,
            clips = plan.len(),
            "Starting pass"
        );
        plan
    }

    /// PLAY_STEP: resolve the clip for `index` (letting a newly arrived breaking
    /// clip pre-empt it, except on the opening step), deliver it, then deliver
    /// a transition. Failures are counted, never propagated.
    pub fn play_step(&self, mut state: EngineState, plan: &mut PassPlan, index: usize) -> EngineState {
        let mut clip = plan.clips[index].clone();

        if index > 0 {
            match self.store.load() {
                Ok(latest) => {
                    if let Some(urgent) =
                        pending_breaking(&latest, plan, self.config.repeat_breaking)
                    {
                        info!(
                            step = index + 1,
                            planned = %clip.id,
                            breaking = %urgent.id,
                            "Breaking clip pre-empts planned clip"
                        );
                        plan.mark_consumed(&urgent.id);
                        clip = urgent;
                    }
                }
                Err(e) => warn!(error = %e, "Playlist reload failed; keeping planned clip"),
            }
        }

        let path = clip.resolve(self.store.base_dir());
        state.current_clip_id = Some(clip.id.clone());
        state.current_index = Some(index);
        state.current_tier = Some(clip.priority);
        self.persist(&mut state);

        let duration = probe_duration(&path).map(duration_display);
        info!(
            pass = state.loop_count + 1,
            step = index + 1,
            of = plan.len(),
            clip = %clip.id,
            title = clip.label(),
            tier = %clip.priority,
            path = %path.display(),
            duration = duration.as_deref().unwrap_or("?"),
            "Delivering clip"
        );

        let outcome = self.sink.deliver(&path);
        state.clips_played += 1;
        if outcome.is_success() {
            debug!(clip = %clip.id, "Clip delivered");
        } else {
            state.errors += 1;
            warn!(clip = %clip.id, tier = %clip.priority, outcome = %outcome, "Clip not delivered; moving on");
        }

        if self.is_running() {
            let transition = self.sink.deliver_transition();
            if !transition.is_success() {
                warn!(outcome = %transition, "Transition delivery failed");
            }
        }

        self.persist(&mut state);
        state
    }

    /// PASS_COMPLETE: count the pass, persist, and drop breaking clips from
    /// the store whether or not they were played.
    pub fn complete_pass(&self, mut state: EngineState) -> EngineState {
        state.loop_count += 1;
        state.current_clip_id = None;
        state.current_index = None;
        state.current_tier = None;
        state.last_pass_completed_at = Some(Utc::now());
        self.persist(&mut state);

        match self.store.prune_breaking() {
            Ok(0) => debug!("No breaking clips to prune"),
            Ok(removed) => info!(removed, "Pruned breaking clips"),
            Err(e) => warn!(error = %e, "Could not prune breaking clips"),
        }
        info!(
            loop_count = state.loop_count,
            clips_played = state.clips_played,
            errors = state.errors,
            "Pass complete"
        );
        state
    }

    /// Save state, recording the current run flag so a concurrent shutdown
    /// is never overwritten with `running = true`.
    fn persist(&self, state: &mut EngineState) {
        state.running = self.is_running();
        if let Err(e) = self.states.save(state) {
            warn!(error = %e, "Failed to persist engine state");
        }
    }

    fn wait(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idle {
    Empty,
    Unreadable,
}

/// Why the scheduler is currently idling, so each change of reason is
/// announced once.
#[derive(Debug, Default)]
struct IdleReason(Option<Idle>);

impl IdleReason {
    /// Record `now`; true when it differs from the previous reason.
    fn enter(&mut self, now: Idle) -> bool {
        self.0.replace(now) != Some(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{Clip, Priority};
    use crate::delivery::Delivery;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Records delivered paths; fails any file named "bad*".
    #[derive(Default)]
    struct RecordingSink {
        clips: RefCell<Vec<PathBuf>>,
        transitions: RefCell<usize>,
    }

    impl ClipSink for RecordingSink {
        fn deliver(&self, path: &Path) -> Delivery {
            self.clips.borrow_mut().push(path.to_path_buf());
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if name.starts_with("bad") {
                Delivery::Failed("encoder exited with status 1".into())
            } else {
                Delivery::Delivered
            }
        }

        fn deliver_transition(&self) -> Delivery {
            *self.transitions.borrow_mut() += 1;
            Delivery::Failed("transition always fails here".into())
        }
    }

    fn setup() -> (Scheduler<RecordingSink>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_sink("rtmp://test");
        config.playlist_path = dir.path().join("playlist.json");
        config.state_path = dir.path().join("state.json");
        config.work_dir = dir.path().join("work");
        config.poll_interval = Duration::from_millis(20);
        let states = Arc::new(StateStore::new(config.state_path.clone()));
        let running = Arc::new(AtomicBool::new(true));
        (
            Scheduler::new(config, RecordingSink::default(), states, running),
            dir,
        )
    }

    fn delivered_names(s: &Scheduler<RecordingSink>) -> Vec<String> {
        s.sink()
            .clips
            .borrow()
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn failed_clip_counts_error_and_continues() {
        let (s, _dir) = setup();
        let pl = Playlist::new(vec![
            Clip::new("a", "bad.mp4", Priority::Normal),
            Clip::new("b", "good.mp4", Priority::Normal),
        ]);
        s.store().save(&pl).unwrap();

        let state = s.run_pass(EngineState::default(), &pl);
        assert_eq!(state.clips_played, 2);
        assert_eq!(state.errors, 1);
        assert_eq!(state.loop_count, 1);
        assert_eq!(delivered_names(&s), vec!["bad", "good"]);
        // Transition failures are logged only.
        assert_eq!(*s.sink().transitions.borrow(), 2);
    }

    #[test]
    fn opening_step_is_never_preempted() {
        let (s, _dir) = setup();
        let base = Playlist::new(vec![
            Clip::new("x", "x.mp4", Priority::Normal),
            Clip::new("y", "y.mp4", Priority::Normal),
        ]);
        let mut plan = s.build_pass(&base, &EngineState::default());

        let mut with_urgent = base.clone();
        with_urgent
            .add_clip(Clip::new("w", "w.mp4", Priority::Breaking))
            .unwrap();
        s.store().save(&with_urgent).unwrap();

        let state = s.play_step(EngineState::default(), &mut plan, 0);
        assert_eq!(state.current_clip_id.as_deref(), Some("x"));
        let state = s.play_step(state, &mut plan, 1);
        assert_eq!(state.current_clip_id.as_deref(), Some("w"));
        assert_eq!(state.current_tier, Some(Priority::Breaking));
        assert_eq!(delivered_names(&s), vec!["x", "w"]);
    }

    #[test]
    fn paths_resolve_against_playlist_directory() {
        let (s, dir) = setup();
        let pl = Playlist::new(vec![Clip::new("a", "clips/a.mp4", Priority::Normal)]);
        s.run_pass(EngineState::default(), &pl);
        assert_eq!(s.sink().clips.borrow()[0], dir.path().join("clips/a.mp4"));
    }

    #[test]
    fn state_is_persisted_after_each_step() {
        let (s, _dir) = setup();
        let pl = Playlist::new(vec![Clip::new("a", "a.mp4", Priority::Pinned)]);
        let mut plan = s.build_pass(&pl, &EngineState::default());
        s.play_step(EngineState::default(), &mut plan, 0);
        let saved = s.states.read().unwrap().unwrap();
        assert_eq!(saved.current_clip_id.as_deref(), Some("a"));
        assert_eq!(saved.current_index, Some(0));
        assert_eq!(saved.clips_played, 1);
    }

    #[test]
    fn stopped_scheduler_does_not_complete_pass() {
        let (s, _dir) = setup();
        let pl = Playlist::new(vec![Clip::new("a", "a.mp4", Priority::Breaking)]);
        s.store().save(&pl).unwrap();
        s.stop();
        let state = s.run_pass(EngineState::default(), &pl);
        assert_eq!(state.loop_count, 0);
        assert!(s.sink().clips.borrow().is_empty());
        assert_eq!(s.store().load().unwrap().clip_count(), 1);
    }

    #[test]
    fn idle_reason_announces_each_change() {
        let mut idle = IdleReason::default();
        assert!(idle.enter(Idle::Empty));
        assert!(!idle.enter(Idle::Empty));
        assert!(idle.enter(Idle::Unreadable));
        assert!(idle.enter(Idle::Empty));
        assert!(!idle.enter(Idle::Empty));
    }

    #[test]
    fn await_playlist_returns_none_once_stopped() {
        let (s, _dir) = setup();
        fs::write(s.store().path(), "{broken").unwrap();
        s.stop();
        assert!(s.await_playlist().is_none());
    }
}
