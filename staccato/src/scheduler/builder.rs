use crate::profiler::ProfilerCallbacks;
use crate::scheduler::Scheduler;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::thread;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(Arc<dyn Fn(usize) -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    pub(crate) fn name_for(&self, worker_id: usize) -> String {
        (self.0)(worker_id)
    }
}

fn default_thread_name_fn() -> ThreadNameFn {
    ThreadNameFn(Arc::new(|worker_id| format!("staccato-{worker_id}")))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure itself is not printable.
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and starts a [`Scheduler`].
///
/// ```
/// let ts = staccato::Builder::new().worker_threads(2).try_build().unwrap();
/// assert_eq!(ts.num_task_threads(), 2);
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Total worker count, including the calling thread (worker 0).
    ///
    /// Defaults to the hardware parallelism.
    worker_threads: Option<usize>,

    /// Name fn for threads owned by the scheduler; also applied to the
    /// calling thread, which serves as worker 0.
    thread_name: ThreadNameFn,

    /// Stack size used for spawned worker threads.
    thread_stack_size: Option<usize>,

    profiler: ProfilerCallbacks,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            profiler: ProfilerCallbacks::default(),
        }
    }

    /// Sets the total number of workers, the calling thread included.
    ///
    /// # Panics
    ///
    /// Panics if `val` is 0; a scheduler always has at least worker 0.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets one fixed name for every scheduler thread.
    ///
    /// The default names are "staccato-{worker_id}".
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move |_| val.clone()));
        self
    }

    /// Sets a function deriving each thread's name from its worker id.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for spawned worker threads.
    ///
    /// The platform may round this up to its minimum. Worker 0 runs on the
    /// caller's stack and is unaffected.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Installs the profiler hook set. Must happen here, before the worker
    /// threads that report into the hooks exist.
    pub fn profiler_callbacks(mut self, callbacks: ProfilerCallbacks) -> Self {
        self.profiler = callbacks;
        self
    }

    /// Starts the configured scheduler. Worker threads are running and ready
    /// to take submissions when this returns.
    pub fn try_build(self) -> Result<Scheduler> {
        Ok(Scheduler::start(self.try_into()?))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// The builder, resolved: what `Scheduler::start` actually consumes, and
/// what re-initialization re-uses with an overridden worker count.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) profiler: ProfilerCallbacks,
}

impl TryFrom<Builder> for SchedulerConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        Ok(SchedulerConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            profiler: builder.profiler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // The config is cloned into every spawned worker closure.
    assert_impl_all!(SchedulerConfig: Send, Sync, Clone);

    #[test]
    #[should_panic(expected = "worker_threads cannot be set to 0")]
    fn zero_workers_is_rejected() {
        let _ = Builder::new().worker_threads(0);
    }

    #[test]
    fn worker_count_defaults_to_available_parallelism() {
        let cfg: SchedulerConfig = Builder::new().try_into().unwrap();
        assert_eq!(cfg.worker_threads, thread::available_parallelism().unwrap().get());
    }

    #[test]
    fn thread_name_fn_receives_worker_id() {
        let cfg: SchedulerConfig =
            Builder::new().thread_name_fn(|w| format!("pool-{w}")).try_into().unwrap();
        assert_eq!(cfg.thread_name.name_for(3), "pool-3");
    }
}
