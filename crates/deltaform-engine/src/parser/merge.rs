//! The commit merge rule.
//!
//! The committed tree and a newly parsed tree agree on their shared
//! prefix structure; where the new parse carries a richer value (a
//! longer string, more array elements, more object keys) the new value
//! wins. Paths present in the committed tree but absent from the new
//! parse are retained: a streaming producer never un-emits structure,
//! so absence means "more to come". Removals only happen at finalize,
//! where the last strict parse replaces the tree wholesale.

use deltaform_core::value::JsonValue;

/// Merge `new` into `committed` under the retention rule.
pub(crate) fn merge_trees(committed: &mut JsonValue, new: JsonValue) {
    match (committed, new) {
        (JsonValue::Object(old), JsonValue::Object(new)) => {
            old.closed = new.closed;
            for (key, value) in new.into_entries() {
                match old.get_mut(&key) {
                    Some(slot) => merge_trees(slot, value),
                    None => {
                        let _ = old.insert(key, value);
                    }
                }
            }
        }
        (JsonValue::Array(old), JsonValue::Array(new)) => {
            old.closed = new.closed;
            let mut items = new.items.into_iter();
            for slot in old.items.iter_mut() {
                match items.next() {
                    Some(item) => merge_trees(slot, item),
                    None => break,
                }
            }
            old.items.extend(items);
        }
        (slot, new) => *slot = new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(json: &str) -> JsonValue {
        JsonValue::from_json_str(json).unwrap()
    }

    #[test]
    fn richer_values_win() {
        let mut committed = tree(r#"{"msg": "hel"}"#);
        merge_trees(&mut committed, tree(r#"{"msg": "hello"}"#));
        assert_eq!(committed, tree(r#"{"msg": "hello"}"#));
    }

    #[test]
    fn absent_paths_are_retained() {
        let mut committed = tree(r#"{"a": 1, "b": 2}"#);
        merge_trees(&mut committed, tree(r#"{"a": 9}"#));
        assert_eq!(committed, tree(r#"{"a": 9, "b": 2}"#));
    }

    #[test]
    fn arrays_extend_and_retain() {
        let mut committed = tree(r#"{"xs": [1, 2, 3]}"#);
        merge_trees(&mut committed, tree(r#"{"xs": [1, 9]}"#));
        assert_eq!(committed, tree(r#"{"xs": [1, 9, 3]}"#));

        let mut committed = tree(r#"{"xs": [1]}"#);
        merge_trees(&mut committed, tree(r#"{"xs": [1, 2, 3]}"#));
        assert_eq!(committed, tree(r#"{"xs": [1, 2, 3]}"#));
    }

    #[test]
    fn kind_change_replaces() {
        let mut committed = tree(r#"{"a": 1}"#);
        merge_trees(&mut committed, tree(r#"{"a": {"nested": true}}"#));
        assert_eq!(committed, tree(r#"{"a": {"nested": true}}"#));
    }

    #[test]
    fn new_keys_append_in_order() {
        let mut committed = tree(r#"{"a": 1}"#);
        merge_trees(&mut committed, tree(r#"{"a": 1, "b": 2, "c": 3}"#));
        let keys: Vec<&str> = committed.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
