use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::UrlStateError;
use crate::serializer::Serializer;
use crate::value::shallow_equal;

/// Namespace whose keys appear in the query string without a prefix.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Decides whether a value is equivalent to its default and can be left
/// out of the query string. Called as `skip(value, initial_value)`.
pub type SkipFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Default skip rule: missing, shallow-equal to the initial value, or an
/// empty array.
pub fn default_skip_value(value: &Value, initial_value: &Value) -> bool {
    value.is_null()
        || shallow_equal(value, initial_value)
        || value.as_array().is_some_and(|items| items.is_empty())
}

/// One query parameter bound to one leaf of the state tree.
#[derive(Clone)]
pub struct Parameter {
    pub name: String,
    pub serializer: Arc<dyn Serializer>,
    pub skip: SkipFn,
}

impl Parameter {
    pub fn skip_value(&self, value: &Value, initial_value: &Value) -> bool {
        (self.skip)(value, initial_value)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter").field("name", &self.name).finish()
    }
}

/// Declared shape of one namespace's state.
///
/// Leaves are parameters, groups mirror nested objects and lists mirror
/// arrays whose slots each have their own parameters.
#[derive(Debug, Clone)]
pub enum Config {
    Leaf(Parameter),
    Group(IndexMap<String, Config>),
    List(Vec<Config>),
}

impl Config {
    /// Build a group from `(key, child)` pairs, keeping their order.
    pub fn group<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Config)>,
    {
        Config::Group(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list<I: IntoIterator<Item = Config>>(items: I) -> Self {
        Config::List(items.into_iter().collect())
    }

    /// Resolve a path against the tree.
    ///
    /// Walking stops at the first leaf, so a path that continues below a
    /// leaf (an element inside an array-valued field) resolves to that leaf.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Option<(&Config, usize)> {
        let mut current = self;
        for (depth, segment) in path.iter().enumerate() {
            let segment = segment.as_ref();
            current = match current {
                Config::Leaf(_) => return Some((current, depth)),
                Config::Group(children) => children.get(segment)?,
                Config::List(items) => items.get(segment.parse::<usize>().ok()?)?,
            };
        }
        Some((current, path.len()))
    }

    /// Paths of every leaf below this node, each prefixed with `base`.
    pub fn leaf_paths(&self, base: &[String]) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        self.collect_leaf_paths(base.to_vec(), &mut out);
        out
    }

    fn collect_leaf_paths(&self, path: Vec<String>, out: &mut Vec<Vec<String>>) {
        match self {
            Config::Leaf(_) => out.push(path),
            Config::Group(children) => {
                for (key, child) in children {
                    let mut next = path.clone();
                    next.push(key.clone());
                    child.collect_leaf_paths(next, out);
                }
            }
            Config::List(items) => {
                for (index, child) in items.iter().enumerate() {
                    let mut next = path.clone();
                    next.push(index.to_string());
                    child.collect_leaf_paths(next, out);
                }
            }
        }
    }
}

/// Leaf with the default skip rule.
pub fn pm(name: &str, serializer: Arc<dyn Serializer>) -> Config {
    pm_with_skip(name, serializer, default_skip_value)
}

/// Leaf with a custom skip rule.
pub fn pm_with_skip<F>(name: &str, serializer: Arc<dyn Serializer>, skip: F) -> Config
where
    F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
{
    Config::Leaf(Parameter {
        name: name.to_string(),
        serializer,
        skip: Arc::new(skip),
    })
}

/// A parameter plus the path of its leaf in the config tree.
#[derive(Debug, Clone)]
pub struct MappedParameter {
    pub parameter: Parameter,
    pub path: Vec<String>,
}

impl std::ops::Deref for MappedParameter {
    type Target = Parameter;

    fn deref(&self) -> &Parameter {
        &self.parameter
    }
}

/// Flat view of a config: parameter name → parameter and leaf path.
///
/// Iteration follows declaration order, parents first, depth first.
#[derive(Debug, Clone, Default)]
pub struct MappedConfig {
    params: IndexMap<String, MappedParameter>,
}

impl MappedConfig {
    pub fn get(&self, name: &str) -> Option<&MappedParameter> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappedParameter)> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Query keys this config owns inside namespace `ns`.
    pub fn managed_keys(&self, ns: &str) -> Vec<String> {
        self.params.keys().map(|name| format_namespace(name, ns)).collect()
    }
}

/// Flatten a config tree into a [`MappedConfig`].
///
/// Fails if two leaves share a parameter name.
pub fn flatten_config(config: &Config) -> Result<MappedConfig, UrlStateError> {
    let mut mapped = MappedConfig::default();
    flatten_into(config, Vec::new(), &mut mapped)?;
    Ok(mapped)
}

fn flatten_into(
    config: &Config,
    path: Vec<String>,
    mapped: &mut MappedConfig,
) -> Result<(), UrlStateError> {
    match config {
        Config::Leaf(parameter) => {
            if mapped.params.contains_key(&parameter.name) {
                return Err(UrlStateError::DuplicateParameter(parameter.name.clone()));
            }
            mapped.params.insert(
                parameter.name.clone(),
                MappedParameter {
                    parameter: parameter.clone(),
                    path,
                },
            );
        }
        Config::Group(children) => {
            for (key, child) in children {
                let mut next = path.clone();
                next.push(key.clone());
                flatten_into(child, next, mapped)?;
            }
        }
        Config::List(items) => {
            for (index, child) in items.iter().enumerate() {
                let mut next = path.clone();
                next.push(index.to_string());
                flatten_into(child, next, mapped)?;
            }
        }
    }
    Ok(())
}

/// Query key of parameter `key` in namespace `ns`: bare for the default
/// namespace, `ns.key` otherwise.
pub fn format_namespace(key: &str, ns: &str) -> String {
    if ns.is_empty() || ns == DEFAULT_NAMESPACE {
        key.to_string()
    } else {
        format!("{ns}.{key}")
    }
}
