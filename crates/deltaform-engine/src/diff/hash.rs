//! Per-path content hashing for idempotent emission.
//!
//! The differ consults this state before any op reaches the coalescer:
//! a candidate whose 64-bit content hash matches the stored hash for its
//! path is dropped. The hash is computed over the canonical
//! serialization (compact JSON with insertion-ordered object keys), so
//! key order changes are (deliberately) visible.

use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use deltaform_core::path::Path;
use deltaform_core::value::JsonValue;

use super::ChangeOp;

#[derive(Clone, Copy, Debug)]
struct PathRecord {
    content_hash: u64,
    last_emitted_version: u64,
}

/// Per-session path-level memory.
#[derive(Debug, Default)]
pub struct DiffState {
    records: HashMap<Path, PathRecord>,
    version: u64,
}

impl DiffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths currently tracked.
    pub fn tracked_paths(&self) -> usize {
        self.records.len()
    }

    /// Keep only the ops that are novel for their path; returns the kept
    /// ops and the number deduplicated away.
    pub fn filter_novel(&mut self, ops: Vec<ChangeOp>) -> (Vec<ChangeOp>, u64) {
        let mut kept = Vec::with_capacity(ops.len());
        let mut deduplicated = 0u64;
        for op in ops {
            if self.admit(&op) {
                kept.push(op);
            } else {
                deduplicated += 1;
            }
        }
        (kept, deduplicated)
    }

    fn admit(&mut self, op: &ChangeOp) -> bool {
        match op {
            ChangeOp::Add { path, value } | ChangeOp::Replace {
                path,
                new_value: value,
                ..
            } => {
                let hash = content_hash(value);
                if let Some(record) = self.records.get(path) {
                    if record.content_hash == hash {
                        return false;
                    }
                }
                self.version += 1;
                let _ = self.records.insert(
                    path.clone(),
                    PathRecord {
                        content_hash: hash,
                        last_emitted_version: self.version,
                    },
                );
                true
            }
            ChangeOp::Remove { path, .. } => {
                if self.records.remove(path).is_none() {
                    return false;
                }
                // The whole subtree is gone; forget descendants so a
                // later re-add is not wrongly deduplicated.
                self.records.retain(|p, _| !path.is_prefix_of(p));
                self.version += 1;
                true
            }
        }
    }

    /// Latest emitted version for a path, if any.
    pub fn version_of(&self, path: &Path) -> Option<u64> {
        self.records.get(path).map(|r| r.last_emitted_version)
    }
}

/// Stable 64-bit hash of a value's canonical serialization.
pub fn content_hash(value: &JsonValue) -> u64 {
    xxh3_64(value.canonical_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltaform_core::path::PathStyle;

    fn tree(json: &str) -> JsonValue {
        JsonValue::from_json_str(json).unwrap()
    }

    fn path(p: &str) -> Path {
        Path::parse(p, PathStyle::Dot).unwrap()
    }

    fn add(p: &str, json: &str) -> ChangeOp {
        ChangeOp::Add {
            path: path(p),
            value: tree(json),
        }
    }

    #[test]
    fn repeated_op_is_dropped() {
        let mut state = DiffState::new();
        let (kept, deduped) = state.filter_novel(vec![add("a", "1")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(deduped, 0);

        let (kept, deduped) = state.filter_novel(vec![add("a", "1")]);
        assert!(kept.is_empty());
        assert_eq!(deduped, 1);
    }

    #[test]
    fn changed_content_passes() {
        let mut state = DiffState::new();
        let _ = state.filter_novel(vec![add("a", "1")]);
        let (kept, _) = state.filter_novel(vec![ChangeOp::Replace {
            path: path("a"),
            old_value: tree("1"),
            new_value: tree("2"),
        }]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn remove_of_unknown_path_is_dropped() {
        let mut state = DiffState::new();
        let (kept, deduped) = state.filter_novel(vec![ChangeOp::Remove {
            path: path("ghost"),
            old_value: tree("1"),
        }]);
        assert!(kept.is_empty());
        assert_eq!(deduped, 1);
    }

    #[test]
    fn remove_purges_descendants() {
        let mut state = DiffState::new();
        let _ = state.filter_novel(vec![add("a", r#"{"b": 1}"#), add("a.b", "1")]);
        assert_eq!(state.tracked_paths(), 2);

        let (kept, _) = state.filter_novel(vec![ChangeOp::Remove {
            path: path("a"),
            old_value: tree(r#"{"b": 1}"#),
        }]);
        assert_eq!(kept.len(), 1);
        assert_eq!(state.tracked_paths(), 0);

        // Re-adding the same content after a remove is novel again.
        let (kept, _) = state.filter_novel(vec![add("a.b", "1")]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn hash_sees_key_order() {
        let a = content_hash(&tree(r#"{"x": 1, "y": 2}"#));
        let b = content_hash(&tree(r#"{"y": 2, "x": 1}"#));
        assert_ne!(a, b);
    }

    #[test]
    fn versions_are_monotonic() {
        let mut state = DiffState::new();
        let _ = state.filter_novel(vec![add("a", "1"), add("b", "2")]);
        let va = state.version_of(&path("a")).unwrap();
        let vb = state.version_of(&path("b")).unwrap();
        assert!(vb > va);
    }
}
