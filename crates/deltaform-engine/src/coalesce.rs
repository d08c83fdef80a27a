//! The event coalescer: time-windowed per-path merging.
//!
//! Candidate deltas (already deduplicated by the differ's hash layer)
//! buffer per path; only the most recent candidate for a path survives
//! a flush. A path flushes when its time window elapses, when it stays
//! quiet for `stability` consecutive ingests, when its buffered count
//! reaches the cap, on explicit flush, or when the session terminates.
//! Flushes preserve first-pending order across paths, so paths sharing
//! a prefix are never reordered.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde_json::Value;

use deltaform_core::config::EngineConfig;
use deltaform_core::events::EventKind;
use deltaform_core::path::Path;

/// A path-scoped candidate event, before sequencing and rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingDelta {
    pub kind: EventKind,
    pub path: Path,
    pub value: Option<Value>,
    pub old_value: Option<Value>,
}

#[derive(Debug)]
struct Slot {
    delta: PendingDelta,
    first_at: Instant,
    order: u64,
    buffered: u32,
    stability: u32,
}

/// Per-session coalescing buffer.
#[derive(Debug)]
pub struct Coalescer {
    enabled: bool,
    window: Duration,
    stability_threshold: u32,
    max_buffered: u32,
    slots: HashMap<Path, Slot>,
    arrivals: u64,
}

impl Coalescer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            enabled: config.coalesce_enabled,
            window: Duration::from_millis(config.coalesce_window_ms),
            stability_threshold: config.coalesce_stability,
            max_buffered: config.coalesce_max_buffered,
            slots: HashMap::new(),
            arrivals: 0,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    /// Offer a candidate. Returns deltas that must be emitted right now
    /// (coalescing disabled, or the path hit its buffered cap).
    pub fn offer(&mut self, delta: PendingDelta) -> Vec<PendingDelta> {
        if !self.enabled {
            return vec![delta];
        }
        let path = delta.path.clone();
        let Some(slot) = self.slots.get_mut(&path) else {
            let order = self.arrivals;
            self.arrivals += 1;
            let _ = self.slots.insert(
                path,
                Slot {
                    delta,
                    first_at: Instant::now(),
                    order,
                    buffered: 1,
                    stability: 0,
                },
            );
            return Vec::new();
        };

        // Added then removed before anyone saw it: cancel out entirely.
        if slot.delta.kind == EventKind::PathAdded && delta.kind == EventKind::PathRemoved {
            let _ = self.slots.remove(&path);
            return Vec::new();
        }

        match (slot.delta.kind, delta.kind) {
            // An unannounced add absorbs subsequent changes.
            (EventKind::PathAdded, EventKind::ValueChanged) => {
                slot.delta.value = delta.value;
                slot.delta.old_value = None;
            }
            _ => slot.delta = delta,
        }
        slot.buffered += 1;
        slot.stability = 0;
        let flush_now = slot.buffered >= self.max_buffered;

        if flush_now {
            let slot = self.slots.remove(&path);
            return slot.map(|s| s.delta).into_iter().collect();
        }
        Vec::new()
    }

    /// Advance stability counters after an ingest: every pending path not
    /// in `touched` was quiet for this ingest. Returns due flushes.
    pub fn tick(&mut self, touched: &HashSet<Path>) -> Vec<PendingDelta> {
        for (path, slot) in self.slots.iter_mut() {
            if !touched.contains(path) {
                slot.stability += 1;
            }
        }
        let threshold = self.stability_threshold;
        let window = self.window;
        self.drain_where(|slot| {
            slot.stability >= threshold || slot.first_at.elapsed() >= window
        })
    }

    /// Flush paths whose time window has elapsed.
    pub fn flush_expired(&mut self) -> Vec<PendingDelta> {
        let window = self.window;
        self.drain_where(|slot| slot.first_at.elapsed() >= window)
    }

    /// Flush everything, in first-pending order.
    pub fn flush_all(&mut self) -> Vec<PendingDelta> {
        self.drain_where(|_| true)
    }

    /// Flush one path.
    pub fn flush_path(&mut self, path: &Path) -> Option<PendingDelta> {
        self.slots.remove(path).map(|slot| slot.delta)
    }

    fn drain_where(&mut self, mut due: impl FnMut(&Slot) -> bool) -> Vec<PendingDelta> {
        let paths: Vec<Path> = self
            .slots
            .iter()
            .filter(|(_, slot)| due(slot))
            .map(|(path, _)| path.clone())
            .collect();
        let mut flushed: Vec<Slot> = paths
            .into_iter()
            .filter_map(|path| self.slots.remove(&path))
            .collect();
        flushed.sort_by_key(|slot| slot.order);
        flushed.into_iter().map(|slot| slot.delta).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltaform_core::path::PathStyle;

    fn config(window_ms: u64, stability: u32, max: u32) -> EngineConfig {
        EngineConfig {
            coalesce_window_ms: window_ms,
            coalesce_stability: stability,
            coalesce_max_buffered: max,
            ..Default::default()
        }
    }

    fn delta(path: &str, kind: EventKind, value: i64) -> PendingDelta {
        PendingDelta {
            kind,
            path: Path::parse(path, PathStyle::Dot).unwrap(),
            value: Some(serde_json::json!(value)),
            old_value: None,
        }
    }

    fn no_touch() -> HashSet<Path> {
        HashSet::new()
    }

    #[test]
    fn disabled_coalescer_passes_through() {
        let mut config = config(100, 3, 10);
        config.coalesce_enabled = false;
        let mut c = Coalescer::new(&config);
        let out = c.offer(delta("a", EventKind::PathAdded, 1));
        assert_eq!(out.len(), 1);
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn latest_candidate_wins_on_flush() {
        let mut c = Coalescer::new(&config(3_600_000, 2, 10));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 1));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 2));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 3));

        let flushed = c.tick(&no_touch());
        assert!(flushed.is_empty());
        let flushed = c.tick(&no_touch());
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].value, Some(serde_json::json!(3)));
    }

    #[test]
    fn stability_counter_resets_on_activity() {
        let mut c = Coalescer::new(&config(3_600_000, 2, 10));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 1));
        assert!(c.tick(&no_touch()).is_empty());

        // The path is touched again: counter resets.
        let _ = c.offer(delta("a", EventKind::ValueChanged, 2));
        let touched: HashSet<Path> = [Path::parse("a", PathStyle::Dot).unwrap()].into();
        assert!(c.tick(&touched).is_empty());
        assert!(c.tick(&no_touch()).is_empty());
        assert_eq!(c.tick(&no_touch()).len(), 1);
    }

    #[test]
    fn buffered_cap_forces_immediate_flush() {
        let mut c = Coalescer::new(&config(3_600_000, 100, 3));
        assert!(c.offer(delta("a", EventKind::ValueChanged, 1)).is_empty());
        assert!(c.offer(delta("a", EventKind::ValueChanged, 2)).is_empty());
        let out = c.offer(delta("a", EventKind::ValueChanged, 3));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Some(serde_json::json!(3)));
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn elapsed_window_flushes() {
        let mut c = Coalescer::new(&config(0, 100, 10));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 1));
        let flushed = c.flush_expired();
        assert_eq!(flushed.len(), 1);
    }

    #[test]
    fn add_then_change_stays_an_add() {
        let mut c = Coalescer::new(&config(3_600_000, 1, 10));
        let _ = c.offer(delta("a", EventKind::PathAdded, 1));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 2));
        let flushed = c.flush_all();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].kind, EventKind::PathAdded);
        assert_eq!(flushed[0].value, Some(serde_json::json!(2)));
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut c = Coalescer::new(&config(3_600_000, 1, 10));
        let _ = c.offer(delta("a", EventKind::PathAdded, 1));
        let _ = c.offer(delta("a", EventKind::PathRemoved, 0));
        assert_eq!(c.pending_count(), 0);
        assert!(c.flush_all().is_empty());
    }

    #[test]
    fn flush_preserves_first_pending_order() {
        let mut c = Coalescer::new(&config(3_600_000, 1, 10));
        let _ = c.offer(delta("b", EventKind::ValueChanged, 1));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 2));
        let _ = c.offer(delta("b.c", EventKind::ValueChanged, 3));
        // Touch b again: order must still follow first-pending.
        let _ = c.offer(delta("b", EventKind::ValueChanged, 4));

        let flushed = c.flush_all();
        let paths: Vec<String> = flushed
            .iter()
            .map(|d| d.path.render(PathStyle::Dot))
            .collect();
        assert_eq!(paths, vec!["b", "a", "b.c"]);
    }

    #[test]
    fn explicit_path_flush() {
        let mut c = Coalescer::new(&config(3_600_000, 100, 10));
        let _ = c.offer(delta("a", EventKind::ValueChanged, 1));
        let _ = c.offer(delta("b", EventKind::ValueChanged, 2));
        let flushed = c.flush_path(&Path::parse("a", PathStyle::Dot).unwrap());
        assert!(flushed.is_some());
        assert_eq!(c.pending_count(), 1);
    }
}
