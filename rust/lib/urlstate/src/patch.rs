//! Change records between two versions of a state tree.
//!
//! Mutations run on a cloned draft; comparing the draft with the original
//! afterwards yields the list of changed paths. Objects are compared key by
//! key, arrays and scalars are atomic and produce a single `Replace`.

use std::fmt;

use serde_json::Value;

use crate::value::create_or_apply_path;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(key) => Some(key),
            PathSegment::Index(_) => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub path: Vec<PathSegment>,
    pub op: PatchOp,
    pub value: Value,
}

impl Patch {
    pub fn new(path: Vec<PathSegment>, op: PatchOp, value: Value) -> Self {
        Self { path, op, value }
    }
}

/// Diff `old` against `new`, prefixing every patch path with `base`.
pub fn diff_values(base: &[PathSegment], old: &Value, new: &Value) -> Vec<Patch> {
    let mut patches = Vec::new();
    diff_into(base.to_vec(), old, new, &mut patches);
    patches
}

fn diff_into(path: Vec<PathSegment>, old: &Value, new: &Value, out: &mut Vec<Patch>) {
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (key, previous) in before {
                let mut child = path.clone();
                child.push(PathSegment::Key(key.clone()));
                match after.get(key) {
                    Some(next) => diff_into(child, previous, next, out),
                    None => out.push(Patch::new(child, PatchOp::Remove, Value::Null)),
                }
            }
            for (key, next) in after {
                if !before.contains_key(key) {
                    let mut child = path.clone();
                    child.push(PathSegment::Key(key.clone()));
                    out.push(Patch::new(child, PatchOp::Add, next.clone()));
                }
            }
        }
        _ if old == new => {}
        _ => out.push(Patch::new(path, PatchOp::Replace, new.clone())),
    }
}

/// Replay `patches` onto `target`, ignoring the first `skip` segments of
/// every path.
pub fn apply_patches(target: &mut Value, patches: &[Patch], skip: usize) {
    for patch in patches {
        let path = patch.path.get(skip..).unwrap_or_default();
        let Some((last, parents)) = path.split_last() else {
            if patch.op != PatchOp::Remove {
                *target = patch.value.clone();
            }
            continue;
        };
        match patch.op {
            PatchOp::Add | PatchOp::Replace => {
                let keys: Vec<String> = path.iter().map(ToString::to_string).collect();
                create_or_apply_path(target, &keys, patch.value.clone());
            }
            PatchOp::Remove => remove_at(target, parents, last),
        }
    }
}

fn remove_at(target: &mut Value, parents: &[PathSegment], last: &PathSegment) {
    let mut current = target;
    for segment in parents {
        let next = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return,
        }
    }
    if let (Value::Object(map), PathSegment::Key(key)) = (current, last) {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(path: &[PathSegment]) -> Vec<String> {
        path.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_change_no_patches() {
        let v = json!({"a": 1, "b": {"c": [1, 2]}});
        assert!(diff_values(&[], &v, &v.clone()).is_empty());
    }

    #[test]
    fn changed_leaf_is_replaced() {
        let patches = diff_values(&[], &json!({"a": 1, "b": 2}), &json!({"a": 1, "b": 3}));
        assert_eq!(patches.len(), 1);
        assert_eq!(keys(&patches[0].path), ["b"]);
        assert_eq!(patches[0].op, PatchOp::Replace);
        assert_eq!(patches[0].value, json!(3));
    }

    #[test]
    fn nested_changes_use_full_paths() {
        let base: Vec<PathSegment> = vec!["namespaces".into(), "test".into(), "values".into()];
        let patches = diff_values(
            &base,
            &json!({"somewhere": {"else": {"here": "xyz"}}}),
            &json!({"somewhere": {"else": {"here": "abc"}}}),
        );
        assert_eq!(patches.len(), 1);
        assert_eq!(
            keys(&patches[0].path),
            ["namespaces", "test", "values", "somewhere", "else", "here"]
        );
    }

    #[test]
    fn added_and_removed_keys() {
        let patches = diff_values(&[], &json!({"gone": 1}), &json!({"fresh": 2}));
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].op, PatchOp::Remove);
        assert_eq!(keys(&patches[0].path), ["gone"]);
        assert_eq!(patches[1].op, PatchOp::Add);
        assert_eq!(keys(&patches[1].path), ["fresh"]);
    }

    #[test]
    fn arrays_are_atomic() {
        let patches = diff_values(&[], &json!({"list": [1, 2]}), &json!({"list": [1, 3]}));
        assert_eq!(patches.len(), 1);
        assert_eq!(keys(&patches[0].path), ["list"]);
        assert_eq!(patches[0].value, json!([1, 3]));
    }

    #[test]
    fn object_replaced_by_scalar() {
        let patches = diff_values(&[], &json!({"a": {"b": 1}}), &json!({"a": null}));
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].op, PatchOp::Replace);
        assert_eq!(keys(&patches[0].path), ["a"]);
    }

    #[test]
    fn replay_onto_a_changed_tree() {
        let base: Vec<PathSegment> = vec!["namespaces".into(), "ns".into(), "values".into()];
        let patches = diff_values(
            &base,
            &json!({"q": "", "page": 1, "gone": true}),
            &json!({"q": "", "page": 2}),
        );

        let mut current = json!({"q": "x", "page": 1, "gone": true});
        apply_patches(&mut current, &patches, base.len());
        assert_eq!(current, json!({"q": "x", "page": 2}));
    }

    #[test]
    fn replay_nested_add() {
        let patches = diff_values(&[], &json!({"a": {}}), &json!({"a": {"b": [1]}}));
        let mut current = json!({"a": {"c": 3}});
        apply_patches(&mut current, &patches, 0);
        assert_eq!(current, json!({"a": {"b": [1], "c": 3}}));
    }
}
