//! History adapters: where the combined query string actually goes.
//!
//! The store only talks to [`HistoryManagement`]: it asks for the search
//! string once and hands fully resolved query objects to `push`/`replace`.
//! Encoding is left to the adapter (usually via [`create_search`]).
//!
//! Two adapters ship with the crate:
//! - [`StaticHistory`]: fixed search string, navigation is a no-op (server rendering)
//! - [`MemoryHistory`]: in-memory entry stack with back/forward (tests, headless clients)

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::error::UrlStateError;
use crate::query::{QueryObject, create_search};
use crate::serializer::SerializerContext;
use crate::store::UrlStore;
use crate::value::SubscriptionId;

/// A boxed, `Send`-able future returned by history adapters.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Adapter-specific navigation options (e.g. `{"shallow": true}`).
pub type RouterOptions = Map<String, Value>;

/// Contract between the store and a concrete history/router.
pub trait HistoryManagement: Send + Sync {
    /// Search string at store creation, with or without the leading `?`.
    fn initial_search(&self) -> String;

    fn push(&self, query: QueryObject, options: RouterOptions) -> BoxFuture<Result<(), UrlStateError>>;

    fn replace(&self, query: QueryObject, options: RouterOptions) -> BoxFuture<Result<(), UrlStateError>>;

    /// Serializer settings this adapter wants applied to every namespace.
    fn context(&self) -> Option<SerializerContext> {
        None
    }
}

// ── StaticHistory ──

/// Adapter for a fixed URL: reads the given search string and resolves
/// every navigation immediately without changing anything.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory {
    search: String,
    context: Option<SerializerContext>,
}

impl StaticHistory {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: SerializerContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl HistoryManagement for StaticHistory {
    fn initial_search(&self) -> String {
        if self.search.is_empty() {
            "?".to_string()
        } else {
            self.search.clone()
        }
    }

    fn push(&self, _query: QueryObject, _options: RouterOptions) -> BoxFuture<Result<(), UrlStateError>> {
        Box::pin(async { Ok(()) })
    }

    fn replace(&self, _query: QueryObject, _options: RouterOptions) -> BoxFuture<Result<(), UrlStateError>> {
        Box::pin(async { Ok(()) })
    }

    fn context(&self) -> Option<SerializerContext> {
        self.context.clone()
    }
}

// ── MemoryHistory ──

/// One history entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub pathname: String,
    pub search: String,
    pub hash: String,
    /// Set on entries written by the store itself.
    pub from_store: bool,
}

impl Location {
    /// Split `/path?query#hash` into its parts.
    pub fn parse(url: &str) -> Self {
        let (rest, hash) = match url.find('#') {
            Some(i) => (&url[..i], &url[i..]),
            None => (url, ""),
        };
        let (pathname, search) = match rest.find('?') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        Self {
            pathname: if pathname.is_empty() { "/" } else { pathname }.to_string(),
            search: if search == "?" { "" } else { search }.to_string(),
            hash: hash.to_string(),
            from_store: false,
        }
    }

    pub fn href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Push,
    Replace,
    Pop,
}

/// Callback for location changes.
pub type HistoryListener = Arc<dyn Fn(&Location, Action) + Send + Sync>;

struct Entries {
    stack: Vec<Location>,
    index: usize,
}

/// Browser-like history kept in memory.
///
/// `push` appends an entry (dropping any forward entries) and keeps the
/// current hash, `replace` overwrites the current entry. `navigate`,
/// `back`, `forward` and `go` simulate navigation from outside the store.
pub struct MemoryHistory {
    entries: RwLock<Entries>,
    listeners: RwLock<Vec<(SubscriptionId, HistoryListener)>>,
    next_id: AtomicU64,
    context: Option<SerializerContext>,
}

impl MemoryHistory {
    /// Create a history with a single entry at `url`.
    pub fn new(url: &str) -> Self {
        Self {
            entries: RwLock::new(Entries {
                stack: vec![Location::parse(url)],
                index: 0,
            }),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            context: None,
        }
    }

    pub fn with_context(mut self, context: SerializerContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Current entry.
    pub fn location(&self) -> Location {
        let entries = self.entries.read().unwrap();
        entries.stack[entries.index].clone()
    }

    /// Number of entries in the stack.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the current entry.
    pub fn index(&self) -> usize {
        self.entries.read().unwrap().index
    }

    /// Register a listener for every location change.
    pub fn listen<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Location, Action) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().unwrap().push((id, Arc::new(listener)));
        id
    }

    pub fn unlisten(&self, id: SubscriptionId) {
        self.listeners.write().unwrap().retain(|(entry, _)| *entry != id);
    }

    /// Push `url` as if some other part of the application navigated.
    pub fn navigate(&self, url: &str) {
        self.write_entry(Location::parse(url), Action::Push);
    }

    pub fn back(&self) -> bool {
        self.go(-1)
    }

    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Move `delta` entries; out-of-range moves are ignored.
    pub fn go(&self, delta: isize) -> bool {
        let location = {
            let mut entries = self.entries.write().unwrap();
            let Some(target) = entries.index.checked_add_signed(delta) else {
                return false;
            };
            if target >= entries.stack.len() || target == entries.index {
                return false;
            }
            entries.index = target;
            entries.stack[target].clone()
        };
        self.notify(&location, Action::Pop);
        true
    }

    fn write_entry(&self, location: Location, action: Action) {
        {
            let mut entries = self.entries.write().unwrap();
            let index = entries.index;
            match action {
                Action::Replace => entries.stack[index] = location.clone(),
                _ => {
                    entries.stack.truncate(index + 1);
                    entries.stack.push(location.clone());
                    entries.index = index + 1;
                }
            }
        }
        self.notify(&location, action);
    }

    fn store_entry(&self, query: &QueryObject) -> Location {
        let current = self.location();
        Location {
            pathname: current.pathname,
            search: create_search(query),
            hash: current.hash,
            from_store: true,
        }
    }

    fn notify(&self, location: &Location, action: Action) {
        let listeners: Vec<HistoryListener> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(location, action);
        }
    }
}

impl HistoryManagement for MemoryHistory {
    fn initial_search(&self) -> String {
        self.location().search
    }

    fn push(&self, query: QueryObject, _options: RouterOptions) -> BoxFuture<Result<(), UrlStateError>> {
        let location = self.store_entry(&query);
        self.write_entry(location, Action::Push);
        Box::pin(async { Ok(()) })
    }

    fn replace(&self, query: QueryObject, _options: RouterOptions) -> BoxFuture<Result<(), UrlStateError>> {
        let location = self.store_entry(&query);
        self.write_entry(location, Action::Replace);
        Box::pin(async { Ok(()) })
    }

    fn context(&self) -> Option<SerializerContext> {
        self.context.clone()
    }
}

/// Forward foreign navigations of `history` to `store.update_from_query`.
///
/// Entries the store wrote itself are skipped unless reached via
/// back/forward. The listener holds the store weakly.
pub fn connect_memory_history(store: &UrlStore, history: &MemoryHistory) -> SubscriptionId {
    let store = store.downgrade();
    history.listen(move |location, action| {
        if location.from_store && action != Action::Pop {
            return;
        }
        if let Some(store) = store.upgrade() {
            store.update_from_query(&location.search);
        }
    })
}
