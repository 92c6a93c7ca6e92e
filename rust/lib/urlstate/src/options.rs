use std::fmt;
use std::sync::Arc;

use crate::history::RouterOptions;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::serializer::SerializerContext;

/// Store-wide settings.
#[derive(Clone)]
pub struct StoreOptions {
    /// Serializer settings, used unless the history adapter supplies its own.
    pub context: SerializerContext,
    /// Merged under the per-call options of every push.
    pub default_push_options: RouterOptions,
    /// Merged under the per-call options of every replace.
    pub default_replace_options: RouterOptions,
    /// Runs deferred namespace cleanup. The default [`TokioScheduler`]
    /// queues the cleanup when called outside a tokio runtime.
    pub scheduler: Arc<dyn Scheduler>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            context: SerializerContext::default(),
            default_push_options: RouterOptions::new(),
            default_replace_options: RouterOptions::new(),
            scheduler: Arc::new(TokioScheduler::new()),
        }
    }
}

impl StoreOptions {
    pub fn with_context(mut self, context: SerializerContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_push_options(mut self, options: RouterOptions) -> Self {
        self.default_push_options = options;
        self
    }

    pub fn with_replace_options(mut self, options: RouterOptions) -> Self {
        self.default_replace_options = options;
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("context", &self.context)
            .field("default_push_options", &self.default_push_options)
            .field("default_replace_options", &self.default_replace_options)
            .finish_non_exhaustive()
    }
}
