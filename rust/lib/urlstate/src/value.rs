use serde_json::{Map, Number, Value};

static NULL: Value = Value::Null;

/// Unique handle for a change subscription, returned by `UrlStore::subscribe()`.
///
/// Use this to unsubscribe later via `UrlStore::unsubscribe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Read the value at `path`.
///
/// Object steps look up keys, array steps parse the segment as an index.
/// Any missing step yields `Value::Null`.
pub fn get<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> &'a Value {
    let mut current = value;
    for segment in path {
        let segment = segment.as_ref();
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return &NULL,
        }
    }
    current
}

/// Write `next` at `path`, creating missing intermediate objects.
///
/// Existing `null` or scalar intermediates are left alone and the write is
/// dropped, as is a write into a `null` root. Returns whether the value was
/// stored.
pub fn create_or_apply_path<S: AsRef<str>>(value: &mut Value, path: &[S], next: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };

    let mut current = value;
    for segment in parents {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return false,
            },
            _ => return false,
        };
    }

    let last = last.as_ref();
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), next);
            true
        }
        Value::Array(items) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = next;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// One-level equality.
///
/// Scalars compare by value, with numbers compared numerically so `2` and
/// `2.0` are equal. Arrays and objects compare their direct members.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left.iter().zip(right).all(|(l, r)| member_equal(l, r))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, l)| right.get(key).is_some_and(|r| member_equal(l, r)))
        }
        _ => member_equal(a, b),
    }
}

fn member_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x == y;
    }
    x.as_f64() == y.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========================================================================
    // get
    // ========================================================================

    #[test]
    fn get_nested_object() {
        let v = json!({"somewhere": {"else": {"here": "xyz"}}});
        assert_eq!(get(&v, &["somewhere", "else", "here"]), &json!("xyz"));
    }

    #[test]
    fn get_missing_returns_null() {
        let v = json!({"a": 1});
        assert_eq!(get(&v, &["b"]), &Value::Null);
        assert_eq!(get(&v, &["a", "b"]), &Value::Null);
        assert_eq!(get(&Value::Null, &["a"]), &Value::Null);
    }

    #[test]
    fn get_array_index() {
        let v = json!({"filters": [{"q": "a"}, {"q": "b"}]});
        assert_eq!(get(&v, &["filters", "1", "q"]), &json!("b"));
        assert_eq!(get(&v, &["filters", "9", "q"]), &Value::Null);
        assert_eq!(get(&v, &["filters", "x"]), &Value::Null);
    }

    #[test]
    fn get_empty_path_is_root() {
        let v = json!({"a": 1});
        let empty: [&str; 0] = [];
        assert_eq!(get(&v, &empty), &v);
    }

    // ========================================================================
    // create_or_apply_path
    // ========================================================================

    #[test]
    fn apply_path_overwrites_leaf() {
        let mut v = json!({
            "some": {"path": "test"},
            "somewhere": {"else": {"deep": "xyz"}}
        });
        assert!(create_or_apply_path(&mut v, &["some", "path"], json!("new value")));
        assert_eq!(
            v,
            json!({
                "some": {"path": "new value"},
                "somewhere": {"else": {"deep": "xyz"}}
            })
        );
    }

    #[test]
    fn apply_path_creates_missing_objects() {
        let mut v = json!({});
        assert!(create_or_apply_path(&mut v, &["a", "b", "c"], json!(1)));
        assert_eq!(v, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn apply_path_on_null_root_is_noop() {
        let mut v = Value::Null;
        assert!(!create_or_apply_path(&mut v, &["some", "path"], json!("new value")));
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn apply_path_keeps_null_intermediate() {
        let mut v = json!({"some": null});
        assert!(!create_or_apply_path(&mut v, &["some", "path"], json!("new value")));
        assert_eq!(v, json!({"some": null}));
    }

    #[test]
    fn apply_path_into_array_slot() {
        let mut v = json!({"list": [{"q": "a"}]});
        assert!(create_or_apply_path(&mut v, &["list", "0", "q"], json!("b")));
        assert!(!create_or_apply_path(&mut v, &["list", "3", "q"], json!("c")));
        assert_eq!(v, json!({"list": [{"q": "b"}]}));
    }

    #[test]
    fn apply_empty_path_is_noop() {
        let mut v = json!({"a": 1});
        let empty: [&str; 0] = [];
        assert!(!create_or_apply_path(&mut v, &empty, json!(2)));
        assert_eq!(v, json!({"a": 1}));
    }

    // ========================================================================
    // shallow_equal
    // ========================================================================

    #[test]
    fn shallow_equal_scalars() {
        assert!(shallow_equal(&json!("a"), &json!("a")));
        assert!(!shallow_equal(&json!("a"), &json!("b")));
        assert!(shallow_equal(&Value::Null, &Value::Null));
        assert!(!shallow_equal(&json!(false), &Value::Null));
    }

    #[test]
    fn shallow_equal_numbers_compare_numerically() {
        assert!(shallow_equal(&json!(2), &json!(2.0)));
        assert!(!shallow_equal(&json!(2), &json!(2.5)));
    }

    #[test]
    fn shallow_equal_arrays_by_member() {
        assert!(shallow_equal(&json!(["a", "b"]), &json!(["a", "b"])));
        assert!(!shallow_equal(&json!(["a", "b"]), &json!(["b", "a"])));
        assert!(!shallow_equal(&json!(["a"]), &json!(["a", "b"])));
        assert!(shallow_equal(&json!([1, 2]), &json!([1.0, 2.0])));
    }

    #[test]
    fn shallow_equal_objects_ignore_key_order() {
        assert!(shallow_equal(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(!shallow_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn subscription_id_equality() {
        assert_eq!(SubscriptionId(1), SubscriptionId(1));
        assert_ne!(SubscriptionId(1), SubscriptionId(2));
    }
}
