//! Mapping between namespace value trees and flat query objects.
//!
//! - `create_query_object`: full snapshot → query (skip-equivalent fields omitted)
//! - `apply_flat_config_to_state`: query → value tree, the reverse direction
//! - `create_queries_from_patch`: only the keys touched by a set of patches
//! - `apply_diff_with_create_queries_from_patch`: patch diff merged onto a previous query

use indexmap::IndexMap;
use serde_json::Value;
use url::form_urlencoded;

use crate::config::{Config, MappedConfig, format_namespace};
use crate::patch::{Patch, PatchOp, PathSegment};
use crate::serializer::SerializerContext;
use crate::value::{create_or_apply_path, get};

/// Flat key → value map in insertion order.
pub type QueryObject = IndexMap<String, String>;

/// Keys touched by a set of patches. `None` marks a key to remove.
pub type QueryDiff = IndexMap<String, Option<String>>;

/// Serialize every mapped parameter of `values` that is not skip-equivalent
/// to its initial value, under namespace-qualified keys.
pub fn create_query_object(
    mapped: &MappedConfig,
    ns: &str,
    values: &Value,
    initial_values: &Value,
    context: &SerializerContext,
) -> QueryObject {
    let mut query = QueryObject::new();
    for (name, param) in mapped.iter() {
        let value = get(values, &param.path);
        if param.skip_value(value, get(initial_values, &param.path)) {
            continue;
        }
        if let Some(serialized) = param.serializer.serialize(value, context) {
            query.insert(format_namespace(name, ns), serialized);
        }
    }
    query
}

/// Resolve every mapped parameter from `query_values` and, when `apply` is
/// set, write it into `state`.
///
/// Missing keys take the initial value; present keys are deserialized, and a
/// `null` result falls back to the initial value. Returns the present keys
/// whose resolved value is not skip-equivalent, i.e. the namespace's new
/// query snapshot.
pub fn apply_flat_config_to_state(
    mapped: &MappedConfig,
    query_values: &QueryObject,
    ns: &str,
    state: &mut Value,
    initial_values: &Value,
    apply: bool,
    context: &SerializerContext,
) -> QueryObject {
    let mut query = QueryObject::new();
    for (name, param) in mapped.iter() {
        let key = format_namespace(name, ns);
        let initial_value = get(initial_values, &param.path);
        let raw = query_values.get(&key);

        let value = match raw {
            None => initial_value.clone(),
            Some(raw) => match param.serializer.deserialize(Some(raw), context) {
                Value::Null => initial_value.clone(),
                value => value,
            },
        };

        let skip = param.skip_value(&value, initial_value);
        if apply {
            create_or_apply_path(state, &param.path, value);
        }
        if let Some(raw) = raw {
            if !skip {
                query.insert(key, raw.clone());
            }
        }
    }
    query
}

/// Query keys affected by `patches` for namespace `ns`.
///
/// Patch paths look like `["namespaces", ns, "values" | "initialValues", ...field]`.
/// Patches of other namespaces are ignored. A patch on a config subtree is
/// expanded into one patch per leaf below it. Skip-equivalent values map to
/// `None` so callers can drop the key.
pub fn create_queries_from_patch(
    config: &Config,
    ns: &str,
    patches: &[Patch],
    state: &Value,
    initial_state: &Value,
    context: &SerializerContext,
) -> QueryDiff {
    let mut queries = QueryDiff::new();
    for patch in patches {
        let [_, patch_ns, _, object_path @ ..] = patch.path.as_slice() else {
            continue;
        };
        if patch_ns.as_key() != Some(ns) {
            continue;
        }
        let object_path: Vec<String> = object_path.iter().map(|s| s.to_string()).collect();

        match config.resolve(&object_path) {
            Some((Config::Leaf(param), depth)) => {
                let leaf_path = &object_path[..depth];
                let value = get(state, leaf_path);
                let initial_value = get(initial_state, leaf_path);
                let next = if param.skip_value(value, initial_value) {
                    None
                } else {
                    param.serializer.serialize(value, context)
                };
                queries.insert(format_namespace(&param.name, ns), next);
            }
            Some((subtree, _)) => {
                let deep = find_deep_patches(subtree, &patch.path);
                queries.extend(create_queries_from_patch(
                    config,
                    ns,
                    &deep,
                    state,
                    initial_state,
                    context,
                ));
            }
            None => {}
        }
    }
    queries
}

/// One `Replace` patch per leaf below `subtree`, rooted at `base`.
pub fn find_deep_patches(subtree: &Config, base: &[PathSegment]) -> Vec<Patch> {
    subtree
        .leaf_paths(&[])
        .into_iter()
        .map(|leaf| {
            let mut path = base.to_vec();
            path.extend(leaf.into_iter().map(PathSegment::Key));
            Patch::new(path, PatchOp::Replace, Value::Null)
        })
        .collect()
}

/// Merge the patch diff onto `current_query`; keys whose new value is `None`
/// disappear.
pub fn apply_diff_with_create_queries_from_patch(
    config: &Config,
    ns: &str,
    current_query: &QueryObject,
    patches: &[Patch],
    state: &Value,
    initial_state: &Value,
    context: &SerializerContext,
) -> QueryObject {
    let diff = create_queries_from_patch(config, ns, patches, state, initial_state, context);
    let mut next = current_query.clone();
    for (key, value) in diff {
        match value {
            Some(value) => {
                next.insert(key, value);
            }
            None => {
                next.shift_remove(&key);
            }
        }
    }
    next
}

// ── Wire format ──

/// Parse a search string (`?a=1&b=2`, leading `?` optional).
///
/// Keys without `=` map to an empty string; for repeated keys the last
/// value wins.
pub fn parse_search(search: &str) -> QueryObject {
    let trimmed = search.strip_prefix('?').unwrap_or(search);
    let mut query = QueryObject::new();
    for (key, value) in form_urlencoded::parse(trimmed.as_bytes()).into_owned() {
        query.insert(key, value);
    }
    query
}

/// Encode a query object without the leading `?`.
pub fn stringify(query: &QueryObject) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish()
}

/// `""` for an empty query, `?`-prefixed encoded pairs otherwise.
pub fn create_search(query: &QueryObject) -> String {
    if query.is_empty() {
        String::new()
    } else {
        format!("?{}", stringify(query))
    }
}
