//! URL state: keep application state and the query string in sync.
//!
//! Application state is split into namespaces. Each namespace declares a
//! config tree whose leaves are query parameters, plus initial values. The
//! store keeps every namespace's values, serializes only what differs from
//! the defaults, and merges all namespaces into one query string.
//!
//! # Two Directions
//!
//! - State → URL: `push_state` / `replace_state` mutate a draft, the change
//!   is diffed into patches, only the touched query keys are recomputed,
//!   and the merged query goes to the history adapter.
//! - URL → state: `update_from_query(search)` re-reads every namespace;
//!   namespaces whose query did not change are left alone.
//!
//! # Query Keys
//!
//! Parameters of the `default` namespace appear bare (`page=2`); all other
//! namespaces are prefixed (`search.page=2`). Keys no namespace owns are
//! passed through untouched.
//!
//! # Example
//!
//! ```ignore
//! use openerp_urlstate::{Config, MemoryHistory, UrlStore, factory_parameters, pm, serializers};
//!
//! let history = Arc::new(MemoryHistory::new("/products?page=2"));
//! let store = UrlStore::new(history.clone());
//! connect_memory_history(&store, &history);
//!
//! let params: QueryParameters<Filters> = factory_parameters(
//!     Config::group([("page", pm("page", serializers::int()))]),
//!     Filters { page: 1 },
//!     None,
//! )?;
//! let filters = params.use_query(&store)?;
//! assert_eq!(filters.values()?.page, 2);
//!
//! filters.push_state(|f| f.page = 3).await?;
//! assert_eq!(history.location().search, "?page=3");
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod history;
pub mod options;
pub mod patch;
pub mod query;
pub mod scheduler;
pub mod serializer;
pub mod store;
pub mod value;

// Re-export primary types at crate root.
pub use config::{
    Config, DEFAULT_NAMESPACE, MappedConfig, Parameter, default_skip_value, flatten_config,
    format_namespace, pm, pm_with_skip,
};
pub use error::UrlStateError;
pub use factory::{InitialValues, QueryHandle, QueryParameters, factory_parameters};
pub use history::{
    Action, BoxFuture, HistoryManagement, Location, MemoryHistory, RouterOptions, StaticHistory,
    connect_memory_history,
};
pub use options::StoreOptions;
pub use patch::{Patch, PatchOp, PathSegment};
pub use query::{
    QueryDiff, QueryObject, apply_diff_with_create_queries_from_patch, apply_flat_config_to_state,
    create_queries_from_patch, create_query_object, create_search, parse_search, stringify,
};
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler};
pub use serializer::{Serializer, SerializerConfig, SerializerContext, serializers};
pub use store::{
    ChangeHandler, NamespaceSnapshot, NavigationMethod, Registration, TransitionGuard, UrlStore,
    WeakUrlStore,
};
pub use value::SubscriptionId;
