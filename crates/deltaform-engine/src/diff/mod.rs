//! The structural differ: JSON-aware minimal edit scripts over paths.
//!
//! Two modes. Conservative emits one `Replace` at the highest differing
//! node. Smart recurses shape-aware: objects diff over the key union in
//! insertion order (old keys first), arrays diff positionally with an
//! LCS similarity gate, mismatched kinds replace at the node. Ops are
//! emitted in canonical scan order, and an `Add`/`Remove` of a subtree
//! subsumes everything beneath it: no op inside an added or removed
//! subtree is ever emitted.

mod hash;

pub use hash::DiffState;

use deltaform_core::config::DiffMode;
use deltaform_core::path::Path;
use deltaform_core::value::JsonValue;

/// Array pairs longer than this skip the LCS similarity gate.
const LCS_THRESHOLD: usize = 32;

/// Below this LCS similarity an array is replaced wholesale instead of
/// emitting per-index churn.
const LCS_MIN_SIMILARITY: f64 = 0.3;

/// One edit in the script.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeOp {
    Add {
        path: Path,
        value: JsonValue,
    },
    Remove {
        path: Path,
        old_value: JsonValue,
    },
    Replace {
        path: Path,
        old_value: JsonValue,
        new_value: JsonValue,
    },
}

impl ChangeOp {
    pub fn path(&self) -> &Path {
        match self {
            Self::Add { path, .. } | Self::Remove { path, .. } | Self::Replace { path, .. } => path,
        }
    }
}

/// Stateless diff over two trees rooted at `root`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralDiffer {
    pub mode: DiffMode,
}

impl StructuralDiffer {
    pub fn new(mode: DiffMode) -> Self {
        Self { mode }
    }

    pub fn diff(&self, old: &JsonValue, new: &JsonValue, root: &Path) -> Vec<ChangeOp> {
        let mut ops = Vec::new();
        match self.mode {
            DiffMode::Conservative => {
                if old != new {
                    ops.push(ChangeOp::Replace {
                        path: root.clone(),
                        old_value: old.clone(),
                        new_value: new.clone(),
                    });
                }
            }
            DiffMode::Smart => walk(old, new, root, &mut ops),
        }
        ops
    }
}

fn walk(old: &JsonValue, new: &JsonValue, path: &Path, ops: &mut Vec<ChangeOp>) {
    if old == new {
        return;
    }
    match (old, new) {
        (JsonValue::Object(old_map), JsonValue::Object(new_map)) => {
            for (key, old_value) in old_map.iter() {
                match new_map.get(key) {
                    Some(new_value) => walk(old_value, new_value, &path.child_key(key), ops),
                    None => ops.push(ChangeOp::Remove {
                        path: path.child_key(key),
                        old_value: old_value.clone(),
                    }),
                }
            }
            for (key, new_value) in new_map.iter() {
                if !old_map.contains_key(key) {
                    ops.push(ChangeOp::Add {
                        path: path.child_key(key),
                        value: new_value.clone(),
                    });
                }
            }
        }
        (JsonValue::Array(old_arr), JsonValue::Array(new_arr)) => {
            let (a, b) = (&old_arr.items, &new_arr.items);
            if a.len() <= LCS_THRESHOLD
                && b.len() <= LCS_THRESHOLD
                && !a.is_empty()
                && !b.is_empty()
            {
                let similarity = lcs_len(a, b) as f64 / a.len().max(b.len()) as f64;
                if similarity < LCS_MIN_SIMILARITY {
                    ops.push(ChangeOp::Replace {
                        path: path.clone(),
                        old_value: old.clone(),
                        new_value: new.clone(),
                    });
                    return;
                }
            }
            let shared = a.len().min(b.len());
            for i in 0..shared {
                walk(&a[i], &b[i], &path.child_index(i), ops);
            }
            for (i, item) in b.iter().enumerate().skip(shared) {
                ops.push(ChangeOp::Add {
                    path: path.child_index(i),
                    value: item.clone(),
                });
            }
            for (i, item) in a.iter().enumerate().skip(shared) {
                ops.push(ChangeOp::Remove {
                    path: path.child_index(i),
                    old_value: item.clone(),
                });
            }
        }
        _ => ops.push(ChangeOp::Replace {
            path: path.clone(),
            old_value: old.clone(),
            new_value: new.clone(),
        }),
    }
}

/// Longest common subsequence length over value equality.
fn lcs_len(a: &[JsonValue], b: &[JsonValue]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltaform_core::path::PathStyle;

    fn tree(json: &str) -> JsonValue {
        JsonValue::from_json_str(json).unwrap()
    }

    fn smart(old: &str, new: &str) -> Vec<ChangeOp> {
        StructuralDiffer::new(DiffMode::Smart).diff(&tree(old), &tree(new), &Path::root())
    }

    fn rendered(ops: &[ChangeOp]) -> Vec<String> {
        ops.iter()
            .map(|op| {
                let tag = match op {
                    ChangeOp::Add { .. } => "add",
                    ChangeOp::Remove { .. } => "remove",
                    ChangeOp::Replace { .. } => "replace",
                };
                format!("{tag} {}", op.path().render(PathStyle::Dot))
            })
            .collect()
    }

    #[test]
    fn equal_trees_produce_nothing() {
        assert!(smart(r#"{"a": 1}"#, r#"{"a": 1}"#).is_empty());
    }

    #[test]
    fn scalar_change_is_replace() {
        let ops = smart(r#"{"a": 1}"#, r#"{"a": 2}"#);
        assert_eq!(rendered(&ops), vec!["replace a"]);
    }

    #[test]
    fn new_key_is_add_of_subtree_only() {
        let ops = smart(r#"{"a": 1}"#, r#"{"a": 1, "b": {"c": [1, 2]}}"#);
        assert_eq!(rendered(&ops), vec!["add b"]);
    }

    #[test]
    fn removed_key_is_remove_of_subtree_only() {
        let ops = smart(r#"{"a": 1, "b": {"c": 1}}"#, r#"{"a": 1}"#);
        assert_eq!(rendered(&ops), vec!["remove b"]);
    }

    #[test]
    fn union_order_old_keys_first() {
        let ops = smart(r#"{"a": 1, "b": 2}"#, r#"{"b": 3, "c": 4}"#);
        assert_eq!(rendered(&ops), vec!["remove a", "replace b", "add c"]);
    }

    #[test]
    fn array_growth_is_per_index_adds() {
        let ops = smart(r#"{"xs": [1]}"#, r#"{"xs": [1, 2, 3]}"#);
        assert_eq!(rendered(&ops), vec!["add xs[1]", "add xs[2]"]);
    }

    #[test]
    fn array_element_change_recurses() {
        let ops = smart(
            r#"{"xs": [{"id": 1}, {"id": 2}]}"#,
            r#"{"xs": [{"id": 1}, {"id": 9}]}"#,
        );
        assert_eq!(rendered(&ops), vec!["replace xs[1].id"]);
    }

    #[test]
    fn dissimilar_arrays_replace_wholesale() {
        let ops = smart(r#"{"xs": [1, 2, 3, 4]}"#, r#"{"xs": [9, 8, 7, 6]}"#);
        assert_eq!(rendered(&ops), vec!["replace xs"]);
    }

    #[test]
    fn kind_mismatch_replaces_node() {
        let ops = smart(r#"{"a": [1, 2]}"#, r#"{"a": {"b": 1}}"#);
        assert_eq!(rendered(&ops), vec!["replace a"]);
    }

    #[test]
    fn conservative_mode_single_replace_at_root() {
        let differ = StructuralDiffer::new(DiffMode::Conservative);
        let ops = differ.diff(
            &tree(r#"{"a": 1, "b": 2}"#),
            &tree(r#"{"a": 1, "b": 3}"#),
            &Path::root(),
        );
        assert_eq!(ops.len(), 1);
        assert!(ops[0].path().is_root());
    }

    #[test]
    fn canonical_scan_order_is_preserved() {
        let ops = smart(
            r#"{"b": {"x": 1, "y": 2}, "a": [1]}"#,
            r#"{"b": {"x": 9, "y": 3}, "a": [1, 2]}"#,
        );
        assert_eq!(
            rendered(&ops),
            vec!["replace b.x", "replace b.y", "add a[1]"]
        );
    }

    #[test]
    fn lcs_similarity() {
        let a: Vec<JsonValue> = (1..=4).map(|i| tree(&i.to_string())).collect();
        let b: Vec<JsonValue> = (3..=6).map(|i| tree(&i.to_string())).collect();
        assert_eq!(lcs_len(&a, &b), 2);
    }
}
