//! Ordering policy: playlist snapshot → play order.
//!
//! Tiers play as `pinned ++ breaking ++ normal ++ filler`:
//! - pinned: ascending `position` (clips without one go last)
//! - breaking: newest `addedAt` first
//! - normal: oldest `addedAt` first
//! - filler: input order
//!
//! All sorts are stable, so ties keep the order clips appear in the store.
//! A missing `addedAt` counts as the oldest possible time.

use crate::clip::{Clip, Priority};
use crate::playlist::Playlist;
use std::collections::HashSet;

/// Compute the baseline pass order for a playlist snapshot.
pub fn baseline_order(playlist: &Playlist) -> Vec<Clip> {
    let mut pinned = tier(playlist, Priority::Pinned);
    pinned.sort_by_key(|c| (c.position.is_none(), c.position));

    let mut breaking = tier(playlist, Priority::Breaking);
    breaking.sort_by(|a, b| b.added_at.cmp(&a.added_at));

    let mut normal = tier(playlist, Priority::Normal);
    normal.sort_by_key(|c| c.added_at);

    let filler = tier(playlist, Priority::Filler);

    let mut order = Vec::with_capacity(playlist.clip_count());
    order.extend(pinned);
    order.extend(breaking);
    order.extend(normal);
    order.extend(filler);
    order
}

fn tier(playlist: &Playlist, priority: Priority) -> Vec<Clip> {
    playlist
        .clips
        .iter()
        .filter(|c| c.priority == priority)
        .cloned()
        .collect()
}

/// The fixed iteration plan for one pass, plus the breaking clips already
/// substituted into it.
#[derive(Debug, Clone)]
pub struct PassPlan {
    pub clips: Vec<Clip>,
    base_ids: HashSet<String>,
    consumed: HashSet<String>,
}

impl PassPlan {
    pub fn new(clips: Vec<Clip>) -> Self {
        let base_ids = clips.iter().map(|c| c.id.clone()).collect();
        PassPlan {
            clips,
            base_ids,
            consumed: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Whether the clip id was part of the order committed at pass start.
    pub fn in_base(&self, id: &str) -> bool {
        self.base_ids.contains(id)
    }

    pub fn mark_consumed(&mut self, id: &str) {
        self.consumed.insert(id.to_string());
    }

    pub fn is_consumed(&self, id: &str) -> bool {
        self.consumed.contains(id)
    }
}

/// Pick the breaking clip that should pre-empt the current step, if any.
///
/// Candidates are breaking clips in `latest` that were not in the pass's base
/// order. Unless `allow_repeat` is set, clips already substituted earlier in
/// the pass are skipped. The newest candidate wins.
pub fn pending_breaking(latest: &Playlist, plan: &PassPlan, allow_repeat: bool) -> Option<Clip> {
    baseline_order(latest)
        .into_iter()
        .filter(|c| c.priority == Priority::Breaking)
        .filter(|c| !plan.in_base(&c.id))
        .find(|c| allow_repeat || !plan.is_consumed(&c.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single()
    }

    fn clip(id: &str, priority: Priority) -> Clip {
        Clip::new(id, format!("{}.mp4", id), priority)
    }

    fn pinned(id: &str, position: i64) -> Clip {
        let mut c = clip(id, Priority::Pinned);
        c.position = Some(position);
        c
    }

    fn timed(id: &str, priority: Priority, secs: i64) -> Clip {
        let mut c = clip(id, priority);
        c.added_at = at(secs);
        c
    }

    fn ids(clips: &[Clip]) -> Vec<&str> {
        clips.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn pinned_by_position_then_normal_fifo() {
        let pl = Playlist::new(vec![
            pinned("a", 1),
            pinned("b", 0),
            timed("c", Priority::Normal, 10),
            timed("d", Priority::Normal, 0),
        ]);
        assert_eq!(ids(&baseline_order(&pl)), vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn full_tier_concatenation() {
        let pl = Playlist::new(vec![
            clip("f1", Priority::Filler),
            timed("n1", Priority::Normal, 5),
            timed("b_old", Priority::Breaking, 1),
            pinned("p0", 0),
            timed("b_new", Priority::Breaking, 9),
            timed("n0", Priority::Normal, 2),
        ]);
        assert_eq!(
            ids(&baseline_order(&pl)),
            vec!["p0", "b_new", "b_old", "n0", "n1", "f1"]
        );
    }

    #[test]
    fn unrecognized_priority_sorts_with_filler() {
        let pl: Playlist = serde_json::from_str(
            r#"{"clips":[
                {"id":"u","path":"u.mp4","priority":"urgent","position":0},
                {"id":"n","path":"n.mp4","priority":"normal"},
                {"id":"f","path":"f.mp4","priority":"filler"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(ids(&baseline_order(&pl)), vec!["n", "u", "f"]);
    }

    #[test]
    fn filler_keeps_input_order() {
        let pl = Playlist::new(vec![
            clip("z", Priority::Filler),
            clip("a", Priority::Filler),
            clip("m", Priority::Filler),
        ]);
        assert_eq!(ids(&baseline_order(&pl)), vec!["z", "a", "m"]);
    }

    #[test]
    fn pinned_without_position_goes_last_in_tier() {
        let pl = Playlist::new(vec![clip("loose", Priority::Pinned), pinned("p5", 5)]);
        assert_eq!(ids(&baseline_order(&pl)), vec!["p5", "loose"]);
    }

    #[test]
    fn ties_are_stable() {
        let pl = Playlist::new(vec![
            timed("first", Priority::Normal, 3),
            timed("second", Priority::Normal, 3),
        ]);
        assert_eq!(ids(&baseline_order(&pl)), vec!["first", "second"]);
    }

    #[test]
    fn order_is_independent_of_input_permutation() {
        let a = Playlist::new(vec![
            pinned("p1", 1),
            timed("n", Priority::Normal, 1),
            timed("b", Priority::Breaking, 1),
            pinned("p0", 0),
        ]);
        let mut reversed = a.clone();
        reversed.clips.reverse();
        assert_eq!(ids(&baseline_order(&a)), ids(&baseline_order(&reversed)));
    }

    #[test]
    fn pending_breaking_ignores_base_clips() {
        let base = Playlist::new(vec![timed("b0", Priority::Breaking, 0), clip("x", Priority::Normal)]);
        let plan = PassPlan::new(baseline_order(&base));
        assert!(pending_breaking(&base, &plan, false).is_none());

        let mut later = base.clone();
        later.clips.push(timed("w", Priority::Breaking, 50));
        later.clips.push(timed("v", Priority::Breaking, 40));
        let picked = pending_breaking(&later, &plan, false).unwrap();
        assert_eq!(picked.id, "w");
    }

    #[test]
    fn consumed_breaking_is_not_reselected_unless_repeat() {
        let base = Playlist::new(vec![clip("x", Priority::Normal)]);
        let mut plan = PassPlan::new(baseline_order(&base));
        let mut later = base.clone();
        later.clips.push(timed("w", Priority::Breaking, 50));

        plan.mark_consumed("w");
        assert!(pending_breaking(&later, &plan, false).is_none());
        assert_eq!(pending_breaking(&later, &plan, true).unwrap().id, "w");
    }
}
