use crate::profiler::ProfilerCallbacks;
use crate::queue::{PinnedTaskList, TaskPipe};
use crate::scheduler::{Builder, SchedulerConfig, pool, worker};
use crate::task::{Completable, PinnedTask, SubTask, TaskPriority, TaskSet};
use crate::utils;
use anyhow::Result;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

/// The coarse submission fan-out never exceeds this many chunks, no matter
/// how wide the pool is; stolen chunks re-split lazily in the dispatch loop.
const MAX_INITIAL_PARTITIONS: u32 = 8;

/// Fixed pool of workers cooperatively executing data-parallel task sets and
/// per-worker pinned tasks.
///
/// Worker 0 is the thread that built the scheduler; workers `1..n` are
/// spawned. Each (priority, worker) pair owns a bounded lock-free pipe:
/// submissions are partitioned into the submitter's own pipe, workers pop
/// their own pipe from the front and steal from the back of their peers'.
/// There is no central queue and no per-task heap allocation.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// let ts = staccato::Builder::new().worker_threads(4).try_build().unwrap();
///
/// let hits = Arc::new(AtomicU64::new(0));
/// let task = Arc::new(staccato::TaskSet::new(1_000_000, {
///     let hits = Arc::clone(&hits);
///     move |range, _worker_id| {
///         hits.fetch_add(u64::from(range.end - range.start), Ordering::Relaxed);
///     }
/// }));
///
/// ts.add_task_set(&task);
/// ts.wait_for(&*task, staccato::TaskPriority::Low);
/// assert_eq!(hits.load(Ordering::Relaxed), 1_000_000);
/// ```
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything the workers share. Created at start, torn down when the last
/// `Arc` drops after the pool has been joined.
pub(crate) struct Shared {
    pub(crate) cfg: SchedulerConfig,
    pub(crate) num_threads: usize,

    /// Fine split target: enough partitions that every worker can steal a
    /// fair share from every other.
    num_partitions: u32,

    /// Coarse split target used at submission, to keep write amplification
    /// down; see `MAX_INITIAL_PARTITIONS`.
    num_initial_partitions: u32,

    /// One pipe per (priority, worker), row-major by priority.
    pipes: Box<[TaskPipe]>,

    /// One pinned-task list per (priority, worker), same layout.
    pinned_lists: Box<[PinnedTaskList]>,

    pub(crate) running: AtomicBool,
    pub(crate) num_threads_running: CachePadded<AtomicU32>,
    pub(crate) num_threads_waiting: CachePadded<AtomicU32>,

    /// Sole wake path for parked workers. The mutex is held only around
    /// condition-variable operations, never around user code.
    new_task_mutex: Mutex<()>,
    new_task_event: Condvar,

    pub(crate) profiler: ProfilerCallbacks,
}

impl Shared {
    fn new(cfg: SchedulerConfig) -> Self {
        let num_threads = cfg.worker_threads;

        // Shape the splits so there is enough work to fill either all
        // threads including the caller, or just the spawned ones.
        let (num_partitions, num_initial_partitions) = if num_threads == 1 {
            (1, 1)
        } else {
            (
                (num_threads * (num_threads - 1)) as u32,
                (num_threads as u32 - 1).min(MAX_INITIAL_PARTITIONS),
            )
        };

        let lanes = TaskPriority::COUNT * num_threads;

        Self {
            profiler: cfg.profiler.clone(),
            cfg,
            num_threads,
            num_partitions,
            num_initial_partitions,
            pipes: (0..lanes).map(|_| TaskPipe::new()).collect(),
            pinned_lists: (0..lanes).map(|_| PinnedTaskList::new()).collect(),
            running: AtomicBool::new(true),
            num_threads_running: CachePadded::new(AtomicU32::new(1)), // the caller
            num_threads_waiting: CachePadded::new(AtomicU32::new(0)),
            new_task_mutex: Mutex::new(()),
            new_task_event: Condvar::new(),
        }
    }

    #[inline(always)]
    fn pipe(&self, priority: usize, worker_id: usize) -> &TaskPipe {
        &self.pipes[priority * self.num_threads + worker_id]
    }

    #[inline(always)]
    fn pinned_list(&self, priority: usize, worker_id: usize) -> &PinnedTaskList {
        &self.pinned_lists[priority * self.num_threads + worker_id]
    }

    pub(crate) fn add_task_set(&self, task: &Arc<TaskSet>) {
        let range_to_run = (task.set_size() / self.num_partitions).max(task.min_range());
        task.prepare_submission(range_to_run);

        let initial_split = (task.set_size() / self.num_initial_partitions).max(task.min_range());
        let sub = SubTask {
            task: Arc::clone(task),
            range: 0..task.set_size(),
        };
        self.split_and_add(worker::current_worker_id(), sub, initial_split);
        task.mark_submitted();
    }

    pub(crate) fn add_pinned_task(&self, task: &Arc<PinnedTask>) {
        assert!(
            task.worker_id() < self.num_threads,
            "pinned task worker id {} out of range ({} workers)",
            task.worker_id(),
            self.num_threads
        );

        // The running count must be up before the task is visible in the
        // list; is_complete must never read 0 while the task is enqueued.
        task.prepare_submission();
        self.pinned_list(task.priority().index(), task.worker_id()).push(Arc::clone(task));
        self.wake_threads();
    }

    /// Carves `sub` into `chunk`-sized pieces and publishes them into this
    /// worker's own pipe. A piece that does not fit (pipe full) is executed
    /// inline instead, trimmed down to the task's run size first so the
    /// submitter is not stuck with one oversized chunk while workers idle.
    fn split_and_add(&self, worker_id: usize, mut sub: SubTask, chunk: u32) {
        let priority = sub.task.priority().index();
        let pipe = self.pipe(priority, worker_id);

        let mut added = 0u32;
        while sub.len() > 0 {
            let piece = sub.split_off_front(chunk);
            piece.task.incr_running();
            added += 1;

            if let Err(mut piece) = pipe.writer_try_write_front(piece) {
                // Let sleepers at what is already published before we stall
                // on inline execution.
                if added > 1 {
                    self.wake_threads();
                }
                added = 0;

                let run_size = piece.task.range_to_run();
                if run_size < piece.len() {
                    // Run only a fine-grained slice and put the rest back.
                    sub.range.start = piece.range.start + run_size;
                    piece.range.end = sub.range.start;
                }
                piece.run(worker_id);
            }
        }

        self.wake_threads();
    }

    /// One dispatch attempt: highest priority first, pinned tasks, own pipe,
    /// then stealing. Returns whether a task was executed.
    pub(crate) fn try_run_task(&self, worker_id: usize, hint: &mut usize) -> bool {
        for priority in 0..TaskPriority::COUNT {
            if self.try_run_task_at(worker_id, priority, hint) {
                return true;
            }
        }
        false
    }

    fn try_run_task_at(&self, worker_id: usize, priority: usize, hint: &mut usize) -> bool {
        self.run_pinned_tasks_at(worker_id, priority);

        let mut sub = self.pipe(priority, worker_id).writer_try_read_front();

        if sub.is_none() {
            // Probe the peers, starting where we last found work.
            let mut check_count = 0;
            while sub.is_none() && check_count < self.num_threads {
                let other = (*hint + check_count) % self.num_threads;
                if other != worker_id {
                    sub = self.pipe(priority, other).reader_try_read_back();
                    if sub.is_some() {
                        *hint = other;
                    }
                }
                check_count += 1;
            }
        }

        let Some(mut sub) = sub else {
            return false;
        };

        let run_size = sub.task.range_to_run();
        if run_size < sub.len() {
            // A coarse chunk: keep one fine slice for ourselves, re-split
            // the remainder so other workers can pick it up while we run.
            let piece = sub.split_off_front(run_size);
            self.split_and_add(worker_id, sub, run_size);
            piece.run(worker_id);
        } else {
            sub.run(worker_id);
        }

        true
    }

    fn run_pinned_tasks_at(&self, worker_id: usize, priority: usize) {
        for task in self.pinned_list(priority, worker_id).drain() {
            task.execute_and_retire(worker_id);
        }
    }

    pub(crate) fn run_pinned_tasks(&self, worker_id: usize) {
        for priority in 0..TaskPriority::COUNT {
            self.run_pinned_tasks_at(worker_id, priority);
        }
    }

    /// Anything runnable anywhere in the system (from this worker's point of
    /// view: any pipe, or its own pinned lists)?
    fn have_tasks(&self, worker_id: usize) -> bool {
        for priority in 0..TaskPriority::COUNT {
            for thread in 0..self.num_threads {
                if !self.pipe(priority, thread).is_empty() {
                    return true;
                }
            }
            if !self.pinned_list(priority, worker_id).is_empty() {
                return true;
            }
        }
        false
    }

    /// Parks the worker on the new-task event once the system looks idle.
    ///
    /// The waiting count is incremented *before* the task scan: a producer
    /// that publishes after our scan is then guaranteed to observe the
    /// waiter and signal. The scan is repeated under the event mutex so the
    /// check-then-block is atomic against `wake_threads`, which bridges
    /// through the same mutex; between the two, a wake-up cannot be lost.
    /// Spurious wake-ups just send the worker back through the dispatch
    /// loop.
    pub(crate) fn wait_for_tasks(&self, worker_id: usize) {
        self.num_threads_waiting.fetch_add(1, Ordering::Acquire);

        if !self.have_tasks(worker_id) {
            ProfilerCallbacks::emit(&self.profiler.wait_start, worker_id);

            let mut guard = self.new_task_mutex.lock();
            if self.running.load(Ordering::Relaxed) && !self.have_tasks(worker_id) {
                self.new_task_event.wait(&mut guard);
            }
            drop(guard);

            ProfilerCallbacks::emit(&self.profiler.wait_stop, worker_id);
        }

        self.num_threads_waiting.fetch_sub(1, Ordering::Release);
    }

    /// Best-effort broadcast: skip the event entirely while nobody waits.
    pub(crate) fn wake_threads(&self) {
        if self.num_threads_waiting.load(Ordering::Relaxed) > 0 {
            self.wake_all();
        }
    }

    pub(crate) fn wake_all(&self) {
        let _guard = self.new_task_mutex.lock();
        self.new_task_event.notify_all();
    }

    /// Cooperatively executes tasks at `lowest_priority_to_run` and above
    /// until `task` completes. Never blocks the calling thread.
    pub(crate) fn wait_for<C>(&self, task: &C, lowest_priority_to_run: TaskPriority)
    where
        C: Completable + ?Sized,
    {
        let worker_id = worker::current_worker_id();
        let mut hint = worker_id + 1;

        ProfilerCallbacks::emit(&self.profiler.wait_for_task_start, worker_id);
        while !task.is_complete() {
            for priority in 0..=lowest_priority_to_run.index() {
                if self.try_run_task_at(worker_id, priority, &mut hint) {
                    break;
                }
            }
        }
        ProfilerCallbacks::emit(&self.profiler.wait_for_task_stop, worker_id);
    }

    /// Participates until no pipe or pinned list holds work and every worker
    /// except the caller is parked, i.e. nothing is enqueued or executing
    /// anywhere.
    pub(crate) fn wait_for_all(&self) {
        let worker_id = worker::current_worker_id();
        let mut hint = worker_id + 1;
        let mut have_tasks = true;

        ProfilerCallbacks::emit(&self.profiler.wait_for_task_start, worker_id);
        while have_tasks
            || (self.num_threads_waiting.load(Ordering::Relaxed)
                < self.num_threads_running.load(Ordering::Relaxed).saturating_sub(1))
        {
            have_tasks = self.try_run_task(worker_id, &mut hint);
        }
        ProfilerCallbacks::emit(&self.profiler.wait_for_task_stop, worker_id);
    }
}

impl Scheduler {
    /// Starts a scheduler sized to the hardware parallelism.
    pub fn new() -> Result<Self> {
        Builder::new().try_build()
    }

    pub(crate) fn start(cfg: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared::new(cfg));

        // The building thread is worker 0 from here on.
        worker::set_current_worker_id(0);
        utils::thread::set_current_thread_name(&shared.cfg.thread_name.name_for(0));

        let threads = Mutex::new(pool::spawn_workers(&shared));
        tracing::debug!(num_threads = shared.num_threads, "scheduler started");

        Self { shared, threads }
    }

    /// Stops the pool if it is running, then starts over sized to the
    /// hardware parallelism, like [`new`](Scheduler::new) on a fresh
    /// instance.
    pub fn initialize(&mut self) {
        self.initialize_with(thread::available_parallelism().map_or(1, NonZeroUsize::get));
    }

    /// Stops the pool if it is running, then starts over with
    /// `worker_threads` workers. Queued work that was never executed is
    /// dropped with the old pool; call
    /// [`wait_for_all`](Scheduler::wait_for_all) first to drain.
    ///
    /// # Panics
    ///
    /// Panics if `worker_threads` is 0.
    #[track_caller]
    pub fn initialize_with(&mut self, worker_threads: usize) {
        assert!(worker_threads > 0, "worker_threads cannot be set to 0");

        self.stop_threads(true);

        let mut cfg = self.shared.cfg.clone();
        cfg.worker_threads = worker_threads;
        *self = Scheduler::start(cfg);
    }

    /// Partitions `task` and enqueues it. Non-blocking; returns as soon as
    /// the partitions are published (pieces that overflowed the pipe have
    /// already run inline on this thread).
    ///
    /// Submitting a task set that is still outstanding is a programmer error
    /// and asserted in debug builds.
    pub fn add_task_set(&self, task: &Arc<TaskSet>) {
        self.shared.add_task_set(task);
    }

    /// Enqueues a pinned task for its worker and wakes the pool. The task
    /// runs only on the thread with that worker id.
    ///
    /// # Panics
    ///
    /// Panics if the task names a worker this scheduler does not have.
    #[track_caller]
    pub fn add_pinned_task(&self, task: &Arc<PinnedTask>) {
        self.shared.add_pinned_task(task);
    }

    /// Executes tasks of priority `lowest_priority_to_run` and above until
    /// `task` is complete. The caller participates instead of blocking, so
    /// progress is preserved even when every thread ends up in here.
    pub fn wait_for<C>(&self, task: &C, lowest_priority_to_run: TaskPriority)
    where
        C: Completable + ?Sized,
    {
        self.shared.wait_for(task, lowest_priority_to_run);
    }

    /// Participates until the whole system is quiescent: all pipes empty,
    /// all pinned lists empty, every other worker parked. Idempotent on a
    /// quiescent scheduler.
    pub fn wait_for_all(&self) {
        self.shared.wait_for_all();
    }

    /// Quiesces, then stops and joins the worker threads.
    pub fn wait_for_all_and_shutdown(&self) {
        self.wait_for_all();
        self.stop_threads(true);
    }

    /// Drains the calling thread's own pinned tasks at every priority. Lets
    /// the main thread service its pinned work between phases without
    /// entering a wait.
    pub fn run_pinned_tasks(&self) {
        self.shared.run_pinned_tasks(worker::current_worker_id());
    }

    /// Total worker count, the calling thread included.
    pub fn num_task_threads(&self) -> usize {
        self.shared.num_threads
    }

    /// The profiler hooks this scheduler reports into.
    pub fn profiler_callbacks(&self) -> &ProfilerCallbacks {
        &self.shared.profiler
    }

    /// Signals shutdown and keeps broadcasting the event until every spawned
    /// worker has exited its loop. With `wait` the threads are joined;
    /// without it they are detached and exit on their own.
    pub(crate) fn stop_threads(&self, wait: bool) {
        if !self.shared.running.swap(false, Ordering::Release) {
            return;
        }

        // Workers may be parked or just about to park; keep firing until
        // each one has observed the flag and decremented the counter.
        while wait && self.shared.num_threads_running.load(Ordering::Acquire) > 1 {
            self.shared.wake_all();
            core::hint::spin_loop();
        }

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        if wait {
            pool::join_all(handles);
        }

        self.shared.num_threads_running.store(0, Ordering::Relaxed);
        self.shared.num_threads_waiting.store(0, Ordering::Relaxed);
        tracing::debug!("scheduler stopped");
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_threads(true);
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("num_threads", &self.num_threads)
            .field("num_partitions", &self.num_partitions)
            .field("num_initial_partitions", &self.num_initial_partitions)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("num_threads_running", &self.num_threads_running.load(Ordering::Relaxed))
            .field("num_threads_waiting", &self.num_threads_waiting.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
