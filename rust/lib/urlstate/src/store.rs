use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::{Config, MappedConfig};
use crate::error::UrlStateError;
use crate::history::{HistoryManagement, RouterOptions};
use crate::options::StoreOptions;
use crate::patch::{PathSegment, apply_patches, diff_values};
use crate::query::{
    QueryObject, apply_diff_with_create_queries_from_patch, apply_flat_config_to_state,
    create_search, parse_search,
};
use crate::serializer::SerializerContext;
use crate::value::SubscriptionId;

/// Callback for namespace changes: `(namespace, snapshot)`.
pub type ChangeHandler = Arc<dyn Fn(&str, &NamespaceSnapshot) + Send + Sync>;

/// Registry entry for one namespace.
struct Namespace {
    subscribers: usize,
    values: Value,
    initial_values: Value,
    config: Arc<Config>,
    mapped_config: Arc<MappedConfig>,
    query: QueryObject,
    managed_keys: Vec<String>,
}

impl Namespace {
    fn snapshot(&self) -> NamespaceSnapshot {
        NamespaceSnapshot {
            subscribers: self.subscribers,
            values: self.values.clone(),
            initial_values: self.initial_values.clone(),
            query: self.query.clone(),
        }
    }
}

/// Point-in-time copy of a namespace, handed to readers and change handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceSnapshot {
    pub subscribers: usize,
    pub values: Value,
    pub initial_values: Value,
    /// Query keys (namespace-qualified) this namespace currently contributes.
    pub query: QueryObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMethod {
    Push,
    Replace,
}

struct Registry {
    namespaces: IndexMap<String, Namespace>,
    /// Search string the store believes the URL currently carries.
    search: String,
}

struct HandlerEntry {
    id: SubscriptionId,
    /// `None` subscribes to every namespace.
    namespace: Option<String>,
    handler: ChangeHandler,
}

struct StoreInner {
    history: Arc<dyn HistoryManagement>,
    options: StoreOptions,
    context: SerializerContext,
    registry: RwLock<Registry>,
    handlers: RwLock<Vec<HandlerEntry>>,
    next_id: AtomicU64,
    /// Number of in-flight transitions. Navigations wait for zero.
    transitions: watch::Sender<usize>,
}

/// Namespaced URL state shared by every query handle of one page.
///
/// Each registered namespace owns a value tree, its initial values, and the
/// slice of the query string its parameters produce. Mutations are diffed
/// into patches, the affected query keys are recomputed, and the combined
/// query string is handed to the history adapter.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone)]
pub struct UrlStore {
    inner: Arc<StoreInner>,
}

/// Non-owning reference to a [`UrlStore`].
#[derive(Clone)]
pub struct WeakUrlStore {
    inner: Weak<StoreInner>,
}

impl WeakUrlStore {
    pub fn upgrade(&self) -> Option<UrlStore> {
        self.inner.upgrade().map(|inner| UrlStore { inner })
    }
}

impl UrlStore {
    pub fn new(history: Arc<dyn HistoryManagement>) -> Self {
        Self::with_options(history, StoreOptions::default())
    }

    pub fn with_options(history: Arc<dyn HistoryManagement>, options: StoreOptions) -> Self {
        let context = history.context().unwrap_or_else(|| options.context.clone());
        let search = history.initial_search();
        debug!("UrlStore: created with search {:?}", search);
        let (transitions, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(StoreInner {
                history,
                options,
                context,
                registry: RwLock::new(Registry {
                    namespaces: IndexMap::new(),
                    search,
                }),
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                transitions,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakUrlStore {
        WeakUrlStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Serializer context in effect (adapter context wins over options).
    pub fn context(&self) -> &SerializerContext {
        &self.inner.context
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    /// Search string the store last read or wrote.
    pub fn location_search(&self) -> String {
        self.inner.registry.read().unwrap().search.clone()
    }

    // ── Registry ──

    /// Register a subscriber for namespace `ns`.
    ///
    /// The first registration builds the namespace from the current search
    /// string. Later ones bump the subscriber count; if they bring different
    /// initial values, the current query is re-applied on top of them.
    /// Dropping the returned [`Registration`] releases the subscriber.
    pub fn register(
        &self,
        config: Arc<Config>,
        mapped_config: Arc<MappedConfig>,
        ns: &str,
        initial_values: Value,
    ) -> Registration {
        let initial_values = match initial_values {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let context = &self.inner.context;

        let changed = {
            let mut guard = self.inner.registry.write().unwrap();
            let registry = &mut *guard;
            let changed = match registry.namespaces.get_mut(ns) {
                Some(existing) => {
                    existing.subscribers += 1;
                    trace!("UrlStore: namespace {:?} now has {} subscribers", ns, existing.subscribers);
                    if existing.initial_values == initial_values {
                        None
                    } else {
                        debug!("UrlStore: namespace {:?} re-registered with new initial values", ns);
                        let mut values = existing.values.clone();
                        let current = existing.query.clone();
                        existing.query = apply_flat_config_to_state(
                            &existing.mapped_config,
                            &current,
                            ns,
                            &mut values,
                            &initial_values,
                            true,
                            context,
                        );
                        existing.initial_values = initial_values;
                        existing.values = values;
                        Some(existing.snapshot())
                    }
                }
                None => {
                    let incoming = parse_search(&registry.search);
                    let mut values = initial_values.clone();
                    let query = apply_flat_config_to_state(
                        &mapped_config,
                        &incoming,
                        ns,
                        &mut values,
                        &initial_values,
                        true,
                        context,
                    );
                    debug!("UrlStore: namespace {:?} registered ({} parameters)", ns, mapped_config.len());
                    registry.namespaces.insert(
                        ns.to_string(),
                        Namespace {
                            subscribers: 1,
                            values,
                            initial_values,
                            managed_keys: mapped_config.managed_keys(ns),
                            config,
                            mapped_config,
                            query,
                        },
                    );
                    None
                }
            };
            if changed.is_some() {
                let query = merge_queries(registry, &[ns]);
                registry.search = create_search(&query);
            }
            changed
        };

        if let Some(snapshot) = changed {
            self.notify(ns, &snapshot);
        }

        Registration {
            store: self.downgrade(),
            namespace: ns.to_string(),
            active: true,
        }
    }

    /// Drop one subscriber. At zero, deletion is deferred through the
    /// scheduler and only happens if the count is still zero by then.
    fn release(&self, ns: &str) {
        let idle = {
            let mut registry = self.inner.registry.write().unwrap();
            match registry.namespaces.get_mut(ns) {
                Some(namespace) => {
                    namespace.subscribers = namespace.subscribers.saturating_sub(1);
                    namespace.subscribers == 0
                }
                None => false,
            }
        };
        if !idle {
            return;
        }

        let store = self.downgrade();
        let ns = ns.to_string();
        self.inner.options.scheduler.defer(Box::new(move || {
            if let Some(store) = store.upgrade() {
                store.remove_if_idle(&ns);
            }
        }));
    }

    fn remove_if_idle(&self, ns: &str) {
        let mut registry = self.inner.registry.write().unwrap();
        if registry
            .namespaces
            .get(ns)
            .is_some_and(|namespace| namespace.subscribers == 0)
        {
            registry.namespaces.shift_remove(ns);
            debug!("UrlStore: namespace {:?} removed", ns);
        } else {
            trace!("UrlStore: namespace {:?} re-subscribed before removal", ns);
        }
    }

    /// Remove every namespace immediately.
    pub fn unregister_all(&self) {
        self.inner.registry.write().unwrap().namespaces.clear();
    }

    pub fn namespace(&self, ns: &str) -> Option<NamespaceSnapshot> {
        let registry = self.inner.registry.read().unwrap();
        registry.namespaces.get(ns).map(Namespace::snapshot)
    }

    /// Registered namespaces in registration order.
    pub fn namespaces(&self) -> Vec<String> {
        let registry = self.inner.registry.read().unwrap();
        registry.namespaces.keys().cloned().collect()
    }

    // ── Subscriptions ──

    /// Call `handler` whenever namespace `ns` changes.
    pub fn subscribe<F>(&self, ns: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &NamespaceSnapshot) + Send + Sync + 'static,
    {
        self.add_handler(Some(ns.to_string()), Arc::new(handler))
    }

    /// Call `handler` whenever any namespace changes.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &NamespaceSnapshot) + Send + Sync + 'static,
    {
        self.add_handler(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.handlers.write().unwrap().retain(|entry| entry.id != id);
    }

    fn add_handler(&self, namespace: Option<String>, handler: ChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().unwrap().push(HandlerEntry {
            id,
            namespace,
            handler,
        });
        id
    }

    fn notify(&self, ns: &str, snapshot: &NamespaceSnapshot) {
        let handlers: Vec<ChangeHandler> = self
            .inner
            .handlers
            .read()
            .unwrap()
            .iter()
            .filter(|entry| entry.namespace.as_deref().is_none_or(|n| n == ns))
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        for handler in handlers {
            handler(ns, snapshot);
        }
    }

    // ── URL → state ──

    /// Re-read every namespace from `search`.
    ///
    /// Namespaces whose resolved query equals their current one are left
    /// alone, so calling this with the store's own search is a no-op.
    pub fn update_from_query(&self, search: &str) {
        let incoming = parse_search(search);
        let context = &self.inner.context;

        let changed = {
            let mut guard = self.inner.registry.write().unwrap();
            let registry = &mut *guard;
            registry.search = search.to_string();

            let mut changed = Vec::new();
            for (ns, namespace) in registry.namespaces.iter_mut() {
                let mut values = namespace.values.clone();
                let query = apply_flat_config_to_state(
                    &namespace.mapped_config,
                    &incoming,
                    ns,
                    &mut values,
                    &namespace.initial_values,
                    true,
                    context,
                );
                if query == namespace.query {
                    trace!("UrlStore: namespace {:?} unchanged by {:?}", ns, search);
                    continue;
                }
                namespace.query = query;
                namespace.values = values;
                changed.push((ns.clone(), namespace.snapshot()));
            }
            changed
        };

        for (ns, snapshot) in &changed {
            debug!("UrlStore: namespace {:?} updated from URL", ns);
            self.notify(ns, snapshot);
        }
    }

    // ── State → URL ──

    /// Mutate the values of `ns` and push the resulting URL.
    pub async fn push_state<F>(&self, ns: &str, mutator: F) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut Value) + Send,
    {
        self.push_state_with(ns, mutator, None).await
    }

    pub async fn push_state_with<F>(
        &self,
        ns: &str,
        mutator: F,
        options: Option<RouterOptions>,
    ) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut Value) + Send,
    {
        self.navigate_single(NavigationMethod::Push, ns, mutator, options)
            .await
    }

    /// Mutate the values of `ns` and replace the current URL.
    pub async fn replace_state<F>(&self, ns: &str, mutator: F) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut Value) + Send,
    {
        self.replace_state_with(ns, mutator, None).await
    }

    pub async fn replace_state_with<F>(
        &self,
        ns: &str,
        mutator: F,
        options: Option<RouterOptions>,
    ) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut Value) + Send,
    {
        self.navigate_single(NavigationMethod::Replace, ns, mutator, options)
            .await
    }

    /// Mutate several namespaces in one navigation.
    ///
    /// The mutator receives one draft per listed namespace, in order; `None`
    /// for namespaces that are not registered.
    pub async fn batch_push_state<F>(&self, namespaces: &[&str], mutator: F) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut [Option<Value>]) + Send,
    {
        self.navigate(NavigationMethod::Push, to_owned(namespaces), mutator, None)
            .await
    }

    pub async fn batch_replace_state<F>(&self, namespaces: &[&str], mutator: F) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut [Option<Value>]) + Send,
    {
        self.navigate(NavigationMethod::Replace, to_owned(namespaces), mutator, None)
            .await
    }

    /// Restore the initial values of `ns` and push.
    pub async fn reset_push(&self, ns: &str) -> Result<(), UrlStateError> {
        self.reset(NavigationMethod::Push, ns).await
    }

    /// Restore the initial values of `ns` and replace.
    pub async fn reset_replace(&self, ns: &str) -> Result<(), UrlStateError> {
        self.reset(NavigationMethod::Replace, ns).await
    }

    async fn reset(&self, method: NavigationMethod, ns: &str) -> Result<(), UrlStateError> {
        let Some(initial) = self.namespace(ns).map(|snapshot| snapshot.initial_values) else {
            warn!("UrlStore: reset of unregistered namespace {:?} ignored", ns);
            return Ok(());
        };
        self.navigate_single(method, ns, move |draft| *draft = initial, None)
            .await
    }

    async fn navigate_single<F>(
        &self,
        method: NavigationMethod,
        ns: &str,
        mutator: F,
        options: Option<RouterOptions>,
    ) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut Value) + Send,
    {
        let name = ns.to_string();
        self.navigate(
            method,
            vec![ns.to_string()],
            move |drafts| match drafts.first_mut() {
                Some(Some(draft)) => mutator(draft),
                _ => warn!("UrlStore: update of unregistered namespace {:?} ignored", name),
            },
            options,
        )
        .await
    }

    async fn navigate<F>(
        &self,
        method: NavigationMethod,
        namespaces: Vec<String>,
        mutator: F,
        options: Option<RouterOptions>,
    ) -> Result<(), UrlStateError>
    where
        F: FnOnce(&mut [Option<Value>]) + Send,
    {
        self.wait_for_transitions().await;

        let Some(query) = self.commit(&namespaces, mutator) else {
            trace!("UrlStore: {:?} produced no changes", namespaces);
            return Ok(());
        };

        let options = self.router_options(method, options);
        debug!("UrlStore: {:?} {}", method, create_search(&query));
        let navigation = match method {
            NavigationMethod::Push => self.inner.history.push(query, options),
            NavigationMethod::Replace => self.inner.history.replace(query, options),
        };
        navigation.await.inspect_err(|err| {
            warn!("UrlStore: {:?} failed: {}", method, err);
        })
    }

    /// Apply `mutator` to drafts of `namespaces`, commit the changes and
    /// return the combined query, or `None` if nothing changed.
    ///
    /// The mutator runs without any lock held, so the diff against its
    /// draft is replayed onto the values current at commit time.
    fn commit<F>(&self, namespaces: &[String], mutator: F) -> Option<QueryObject>
    where
        F: FnOnce(&mut [Option<Value>]),
    {
        let originals: Vec<Option<Value>> = {
            let registry = self.inner.registry.read().unwrap();
            namespaces
                .iter()
                .map(|ns| registry.namespaces.get(ns).map(|n| n.values.clone()))
                .collect()
        };
        let mut drafts = originals.clone();
        mutator(&mut drafts);

        let context = &self.inner.context;
        let (query, changed) = {
            let mut guard = self.inner.registry.write().unwrap();
            let registry = &mut *guard;

            let mut affected: Vec<&str> = Vec::new();
            for ((ns, original), draft) in namespaces.iter().zip(&originals).zip(drafts) {
                let (Some(original), Some(draft)) = (original, draft) else {
                    continue;
                };
                let Some(namespace) = registry.namespaces.get_mut(ns) else {
                    continue;
                };
                let base: Vec<PathSegment> = vec!["namespaces".into(), ns.as_str().into(), "values".into()];
                let patches = diff_values(&base, original, &draft);
                if patches.is_empty() {
                    continue;
                }
                trace!("UrlStore: namespace {:?} produced {} patches", ns, patches.len());
                apply_patches(&mut namespace.values, &patches, base.len());
                namespace.query = apply_diff_with_create_queries_from_patch(
                    &namespace.config,
                    ns,
                    &namespace.query,
                    &patches,
                    &namespace.values,
                    &namespace.initial_values,
                    context,
                );
                if !affected.contains(&ns.as_str()) {
                    affected.push(ns.as_str());
                }
            }
            if affected.is_empty() {
                return None;
            }

            let query = merge_queries(registry, &affected);
            registry.search = create_search(&query);
            let changed: Vec<(String, NamespaceSnapshot)> = affected
                .iter()
                .filter_map(|ns| {
                    registry
                        .namespaces
                        .get(*ns)
                        .map(|n| (ns.to_string(), n.snapshot()))
                })
                .collect();
            (query, changed)
        };

        for (ns, snapshot) in &changed {
            self.notify(ns, snapshot);
        }
        Some(query)
    }

    fn router_options(&self, method: NavigationMethod, options: Option<RouterOptions>) -> RouterOptions {
        let mut merged = match method {
            NavigationMethod::Push => self.inner.options.default_push_options.clone(),
            NavigationMethod::Replace => self.inner.options.default_replace_options.clone(),
        };
        if let Some(options) = options {
            merged.extend(options);
        }
        merged
    }

    // ── Transitions ──

    /// Mark a transition as in flight. Pushes and replaces wait until every
    /// guard is dropped.
    pub fn begin_transition(&self) -> TransitionGuard {
        self.inner.transitions.send_modify(|count| *count += 1);
        TransitionGuard {
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Run `future` as a transition.
    pub async fn transition<Fut: Future>(&self, future: Fut) -> Fut::Output {
        let _guard = self.begin_transition();
        future.await
    }

    pub fn transitions_in_flight(&self) -> usize {
        *self.inner.transitions.borrow()
    }

    async fn wait_for_transitions(&self) {
        let mut rx = self.inner.transitions.subscribe();
        if rx.wait_for(|count| *count == 0).await.is_err() {
            warn!("UrlStore: transition channel closed");
        }
    }
}

/// Combined query: unmanaged keys from the current search, then the
/// queries of unaffected namespaces in registration order, then the
/// affected ones.
fn merge_queries(registry: &Registry, affected: &[&str]) -> QueryObject {
    let managed: IndexSet<&str> = registry
        .namespaces
        .values()
        .flat_map(|n| n.managed_keys.iter().map(String::as_str))
        .collect();

    let mut query: QueryObject = parse_search(&registry.search)
        .into_iter()
        .filter(|(key, _)| !managed.contains(key.as_str()))
        .collect();

    for (ns, namespace) in &registry.namespaces {
        if !affected.contains(&ns.as_str()) {
            query.extend(namespace.query.clone());
        }
    }
    for ns in affected {
        if let Some(namespace) = registry.namespaces.get(*ns) {
            query.extend(namespace.query.clone());
        }
    }
    query
}

fn to_owned(namespaces: &[&str]) -> Vec<String> {
    namespaces.iter().map(|ns| ns.to_string()).collect()
}

/// One subscriber of a namespace. Dropping it releases the subscriber.
pub struct Registration {
    store: WeakUrlStore,
    namespace: String,
    active: bool,
}

impl Registration {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Release explicitly; same as dropping.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.release(&self.namespace);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

/// Keeps a transition in flight until dropped.
pub struct TransitionGuard {
    store: Weak<StoreInner>,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .transitions
                .send_modify(|count| *count = count.saturating_sub(1));
        }
    }
}
