//! Deferred task execution for namespace cleanup.
//!
//! When the last subscriber of a namespace goes away the store does not
//! delete it on the spot. It hands a task to a [`Scheduler`], and the task
//! deletes the namespace only if nobody re-subscribed in the meantime.

use std::sync::Mutex;

use tracing::trace;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

pub trait Scheduler: Send + Sync {
    /// Run `task` later, after the current call stack has unwound.
    fn defer(&self, task: Task);
}

/// Spawns deferred tasks onto the ambient tokio runtime after one yield.
///
/// Outside a runtime tasks are queued instead. They run with the next task
/// deferred from inside a runtime, or when [`TokioScheduler::run_pending`]
/// is called.
#[derive(Default)]
pub struct TokioScheduler {
    fallback: ManualScheduler,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks queued while no runtime was available.
    pub fn pending(&self) -> usize {
        self.fallback.pending()
    }

    /// Run the tasks queued while no runtime was available.
    pub fn run_pending(&self) -> usize {
        self.fallback.run_pending()
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut tasks = self.fallback.take();
                tasks.push(task);
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    for task in tasks {
                        task();
                    }
                });
            }
            Err(_) => {
                trace!("TokioScheduler: no runtime, queueing deferred task");
                self.fallback.defer(task);
            }
        }
    }
}

/// Queues deferred tasks until [`ManualScheduler::run_pending`] is called.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<Task>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn take(&self) -> Vec<Task> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    /// Run every queued task, including ones queued while running.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let tasks = self.take();
            if tasks.is_empty() {
                return ran;
            }
            for task in tasks {
                task();
                ran += 1;
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: Task) {
        self.queue.lock().unwrap().push(task);
    }
}
