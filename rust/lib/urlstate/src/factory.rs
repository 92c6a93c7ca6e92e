//! Typed entry point: bind a config, initial values and a namespace once,
//! then build query strings, parse them, or attach to a [`UrlStore`].
//!
//! ```ignore
//! let params = factory_parameters(
//!     Config::group([("q", pm("q", serializers::string()))]),
//!     Search { q: String::new() },
//!     Some("search"),
//! )?;
//! let handle = params.use_query(&store)?;
//! handle.push_state(|s| s.q = "shoes".into()).await?;
//! ```

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{Config, DEFAULT_NAMESPACE, MappedConfig, flatten_config};
use crate::error::UrlStateError;
use crate::query::{
    QueryObject, apply_flat_config_to_state, create_query_object, parse_search, stringify,
};
use crate::serializer::SerializerContext;
use crate::store::{NamespaceSnapshot, Registration, UrlStore, WeakUrlStore};
use crate::value::SubscriptionId;

/// Initial values, given directly or produced on demand.
#[derive(Clone)]
pub enum InitialValues<T> {
    Value(T),
    Factory(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> InitialValues<T> {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        InitialValues::Factory(Arc::new(f))
    }

    pub fn resolve(&self) -> T {
        match self {
            InitialValues::Value(value) => value.clone(),
            InitialValues::Factory(f) => f(),
        }
    }
}

impl<T> From<T> for InitialValues<T> {
    fn from(value: T) -> Self {
        InitialValues::Value(value)
    }
}

/// Build [`QueryParameters`] for one namespace.
///
/// Flattens `config` up front, so duplicate parameter names fail here.
/// `namespace` defaults to [`DEFAULT_NAMESPACE`].
pub fn factory_parameters<T>(
    config: Config,
    initial_values: impl Into<InitialValues<T>>,
    namespace: Option<&str>,
) -> Result<QueryParameters<T>, UrlStateError>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mapped = flatten_config(&config)?;
    Ok(QueryParameters {
        config: Arc::new(config),
        mapped: Arc::new(mapped),
        initial_values: initial_values.into(),
        namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
    })
}

/// Config, initial values and namespace bound together.
#[derive(Clone)]
pub struct QueryParameters<T> {
    config: Arc<Config>,
    mapped: Arc<MappedConfig>,
    initial_values: InitialValues<T>,
    namespace: String,
}

impl<T> QueryParameters<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mapped_config(&self) -> &MappedConfig {
        &self.mapped
    }

    pub fn initial_values(&self) -> T {
        self.initial_values.resolve()
    }

    /// Query object for `values`, leaving out fields equivalent to the
    /// initial values.
    pub fn create_query_object(
        &self,
        values: &T,
        initial_values: Option<&T>,
        context: Option<&SerializerContext>,
    ) -> Result<QueryObject, UrlStateError> {
        let values = serde_json::to_value(values)?;
        let initial = self.initial_value_tree(initial_values)?;
        let context = context.cloned().unwrap_or_default();
        Ok(create_query_object(
            &self.mapped,
            &self.namespace,
            &values,
            &initial,
            &context,
        ))
    }

    /// Like [`create_query_object`](Self::create_query_object), encoded
    /// without the leading `?`.
    pub fn create_query_string(
        &self,
        values: &T,
        initial_values: Option<&T>,
        context: Option<&SerializerContext>,
    ) -> Result<String, UrlStateError> {
        let query = self.create_query_object(values, initial_values, context)?;
        Ok(stringify(&query))
    }

    /// Values described by `query`, starting from the initial values.
    pub fn parse_query_string(
        &self,
        query: &str,
        initial_values: Option<&T>,
        context: Option<&SerializerContext>,
    ) -> Result<T, UrlStateError> {
        let initial = self.initial_value_tree(initial_values)?;
        let context = context.cloned().unwrap_or_default();
        let mut state = initial.clone();
        apply_flat_config_to_state(
            &self.mapped,
            &parse_search(query),
            &self.namespace,
            &mut state,
            &initial,
            true,
            &context,
        );
        Ok(serde_json::from_value(state)?)
    }

    /// Attach to `store` as a new subscriber of this namespace.
    pub fn use_query(&self, store: &UrlStore) -> Result<QueryHandle<T>, UrlStateError> {
        let initial = serde_json::to_value(self.initial_values())?;
        let registration = store.register(
            Arc::clone(&self.config),
            Arc::clone(&self.mapped),
            &self.namespace,
            initial,
        );
        Ok(QueryHandle {
            store: store.downgrade(),
            namespace: self.namespace.clone(),
            mapped: Arc::clone(&self.mapped),
            subscriptions: Mutex::new(Vec::new()),
            _registration: registration,
            _marker: PhantomData,
        })
    }

    fn initial_value_tree(&self, initial_values: Option<&T>) -> Result<Value, UrlStateError> {
        Ok(match initial_values {
            Some(initial) => serde_json::to_value(initial)?,
            None => serde_json::to_value(self.initial_values())?,
        })
    }
}

/// A live subscriber of one namespace.
///
/// Dropping the handle removes its change handlers and releases its
/// subscription; the namespace is cleaned up once no handle is left.
pub struct QueryHandle<T> {
    store: WeakUrlStore,
    namespace: String,
    mapped: Arc<MappedConfig>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    _registration: Registration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QueryHandle<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn store(&self) -> Result<UrlStore, UrlStateError> {
        self.store
            .upgrade()
            .ok_or_else(|| UrlStateError::MissingStore(self.namespace.clone()))
    }

    fn snapshot(&self) -> Result<NamespaceSnapshot, UrlStateError> {
        self.store()?
            .namespace(&self.namespace)
            .ok_or_else(|| UrlStateError::MissingStore(self.namespace.clone()))
    }

    pub fn values(&self) -> Result<T, UrlStateError> {
        Ok(serde_json::from_value(self.snapshot()?.values)?)
    }

    pub fn initial_values(&self) -> Result<T, UrlStateError> {
        Ok(serde_json::from_value(self.snapshot()?.initial_values)?)
    }

    /// Query keys this namespace currently contributes.
    pub fn query(&self) -> Result<QueryObject, UrlStateError> {
        Ok(self.snapshot()?.query)
    }

    pub async fn push_state<F>(&self, mutator: F) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut T) + Send,
    {
        let store = self.store()?;
        let mut failure = None;
        let result = store
            .push_state(&self.namespace, |draft| {
                if let Err(err) = mutate_typed(draft, mutator) {
                    failure = Some(err);
                }
            })
            .await;
        failure.map_or(result, Err)
    }

    pub async fn replace_state<F>(&self, mutator: F) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut T) + Send,
    {
        let store = self.store()?;
        let mut failure = None;
        let result = store
            .replace_state(&self.namespace, |draft| {
                if let Err(err) = mutate_typed(draft, mutator) {
                    failure = Some(err);
                }
            })
            .await;
        failure.map_or(result, Err)
    }

    pub async fn reset_push(&self) -> Result<(), UrlStateError> {
        self.store()?.reset_push(&self.namespace).await
    }

    pub async fn reset_replace(&self) -> Result<(), UrlStateError> {
        self.store()?.reset_replace(&self.namespace).await
    }

    /// Encode `values` (or the current values) against this namespace's
    /// initial values and the store's serializer context.
    pub fn create_query_string(&self, values: Option<&T>) -> Result<String, UrlStateError> {
        let store = self.store()?;
        let snapshot = self.snapshot()?;
        let values = match values {
            Some(values) => serde_json::to_value(values)?,
            None => snapshot.values,
        };
        let query = create_query_object(
            &self.mapped,
            &self.namespace,
            &values,
            &snapshot.initial_values,
            store.context(),
        );
        Ok(stringify(&query))
    }

    /// Call `handler` with the typed values after every change. Removed when
    /// the handle is dropped.
    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId, UrlStateError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.store()?.subscribe(&self.namespace, move |_, snapshot| {
            match serde_json::from_value::<T>(snapshot.values.clone()) {
                Ok(values) => handler(&values),
                Err(err) => tracing::warn!("QueryHandle: cannot convert values: {}", err),
            }
        });
        self.subscriptions.lock().unwrap().push(id);
        Ok(id)
    }
}

impl<T> Drop for QueryHandle<T> {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        for id in self.subscriptions.lock().unwrap().drain(..) {
            store.unsubscribe(id);
        }
    }
}

/// Run a typed mutator against a value tree draft.
fn mutate_typed<T, F>(draft: &mut Value, mutator: F) -> Result<(), UrlStateError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
{
    let mut typed: T = serde_json::from_value(draft.clone())?;
    mutator(&mut typed);
    *draft = serde_json::to_value(typed)?;
    Ok(())
}
