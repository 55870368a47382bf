use std::fmt;
use std::ops::Range;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

/// Priority lanes checked in declaration order on every dispatch iteration.
///
/// There is no ordering guarantee *across* priorities for already-enqueued
/// work; a lower-priority subtask popped by one worker may finish before a
/// higher-priority subtask popped by another. Within a single worker, `High`
/// work is always attempted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskPriority {
    #[default]
    High = 0,
    Medium = 1,
    Low = 2,
}

impl TaskPriority {
    pub const COUNT: usize = 3;

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Anything the scheduler can be asked to wait on.
///
/// Both task flavors share the same contract: a task is complete once it has
/// been submitted and its outstanding-work counter has drained back to zero.
/// The counter is decremented with release ordering after each partition
/// executes, so when `is_complete` returns `true` every side effect of every
/// `execute` call is visible to the observer.
pub trait Completable {
    fn is_complete(&self) -> bool;
}

/// A data-parallel task over the index range `0..set_size`.
///
/// The closure is invoked once per partition with a sub-range and the id of
/// the worker running it. Partitions are disjoint and cover the whole range
/// exactly once. The scheduler holds `Arc` clones only while partitions are
/// outstanding; the caller keeps ownership.
///
/// Submitting the same task set again while it is still outstanding is a
/// programmer error (asserted in debug builds). A panic inside the closure
/// unwinds through the worker thread running that partition; the scheduler
/// keeps its thread accounting intact so shutdown still completes, but the
/// panicking worker is lost.
pub struct TaskSet {
    set_size: u32,
    min_range: u32,
    priority: TaskPriority,

    /// Fine partition size, computed at submission from the scheduler shape.
    range_to_run: AtomicU32,

    /// Number of partitions enqueued or executing. Incremented before a
    /// subtask becomes visible in a pipe, decremented (release) after its
    /// execution completes.
    running_count: AtomicU32,

    submitted: AtomicBool,

    execute: Box<dyn Fn(Range<u32>, usize) + Send + Sync>,
}

impl TaskSet {
    pub fn new<F>(set_size: u32, execute: F) -> Self
    where
        F: Fn(Range<u32>, usize) + Send + Sync + 'static,
    {
        Self {
            set_size,
            min_range: 1,
            priority: TaskPriority::default(),
            range_to_run: AtomicU32::new(0),
            running_count: AtomicU32::new(0),
            submitted: AtomicBool::new(false),
            execute: Box::new(execute),
        }
    }

    /// Sets the minimum number of items a single partition may carry. Splits
    /// never go below this floor, so it bounds per-partition overhead for
    /// very cheap item bodies.
    pub fn with_min_range(mut self, min_range: u32) -> Self {
        assert!(min_range >= 1, "min_range cannot be 0");
        self.min_range = min_range;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn set_size(&self) -> u32 {
        self.set_size
    }

    pub fn min_range(&self) -> u32 {
        self.min_range
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub(crate) fn prepare_submission(&self, range_to_run: u32) {
        debug_assert!(
            self.running_count.load(Ordering::Acquire) == 0,
            "task set re-submitted while still outstanding"
        );
        self.submitted.store(false, Ordering::Relaxed);
        self.running_count.store(0, Ordering::Relaxed);
        self.range_to_run.store(range_to_run, Ordering::Relaxed);
    }

    pub(crate) fn mark_submitted(&self) {
        self.submitted.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn range_to_run(&self) -> u32 {
        self.range_to_run.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn incr_running(&self) {
        self.running_count.fetch_add(1, Ordering::Acquire);
    }

    #[inline(always)]
    pub(crate) fn decr_running(&self) {
        let previous = self.running_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "running_count underflow");
    }

    #[inline(always)]
    pub(crate) fn execute_range(&self, range: Range<u32>, worker_id: usize) {
        (self.execute)(range, worker_id);
    }
}

impl Completable for TaskSet {
    fn is_complete(&self) -> bool {
        self.submitted.load(Ordering::Acquire) && self.running_count.load(Ordering::Acquire) == 0
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSet")
            .field("set_size", &self.set_size)
            .field("min_range", &self.min_range)
            .field("priority", &self.priority)
            .field("range_to_run", &self.range_to_run.load(Ordering::Relaxed))
            .field("running_count", &self.running_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A single-shot task bound to one specific worker.
///
/// Pinned tasks are the escape hatch for work that must run on a named thread
/// (thread-affine APIs, per-thread state). They are pushed onto the target
/// worker's pinned list and executed only by that worker. A completed pinned
/// task may be submitted again.
pub struct PinnedTask {
    worker_id: usize,
    priority: TaskPriority,

    /// 0 or 1; set to 1 on submission, cleared after execution.
    running_count: AtomicU32,

    submitted: AtomicBool,

    /// Intrusive link. Owned by the pinned list between push and drain; null
    /// whenever the task is not enqueued.
    pub(crate) next: AtomicPtr<PinnedTask>,

    execute: Box<dyn Fn(usize) + Send + Sync>,
}

impl PinnedTask {
    pub fn new<F>(worker_id: usize, execute: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        Self {
            worker_id,
            priority: TaskPriority::default(),
            running_count: AtomicU32::new(0),
            submitted: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
            execute: Box::new(execute),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub(crate) fn prepare_submission(&self) {
        debug_assert!(
            self.running_count.load(Ordering::Acquire) == 0,
            "pinned task re-submitted while still outstanding"
        );
        self.running_count.store(1, Ordering::Relaxed);
        self.submitted.store(true, Ordering::Release);
    }

    /// Runs the task body and retires the outstanding count.
    pub(crate) fn execute_and_retire(&self, worker_id: usize) {
        debug_assert_eq!(worker_id, self.worker_id);
        (self.execute)(worker_id);
        self.running_count.store(0, Ordering::Release);
    }
}

impl Completable for PinnedTask {
    fn is_complete(&self) -> bool {
        self.submitted.load(Ordering::Acquire) && self.running_count.load(Ordering::Acquire) == 0
    }
}

impl fmt::Debug for PinnedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedTask")
            .field("worker_id", &self.worker_id)
            .field("priority", &self.priority)
            .field("running_count", &self.running_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// One partition of a task set, as carried through the pipes. Plain value,
/// moved in and out of pipe slots; the `Arc` keeps the task alive while the
/// partition is in flight.
pub(crate) struct SubTask {
    pub(crate) task: Arc<TaskSet>,
    pub(crate) range: Range<u32>,
}

impl SubTask {
    #[inline(always)]
    pub(crate) fn len(&self) -> u32 {
        self.range.end - self.range.start
    }

    /// Carves up to `max_len` items off the front, advancing this subtask to
    /// the remainder.
    pub(crate) fn split_off_front(&mut self, max_len: u32) -> SubTask {
        let split = self.range.start + max_len.min(self.len());
        let piece = SubTask {
            task: Arc::clone(&self.task),
            range: self.range.start..split,
        };
        self.range.start = split;
        piece
    }

    /// Executes this partition and retires its outstanding count.
    pub(crate) fn run(self, worker_id: usize) {
        let SubTask { task, range } = self;
        task.execute_range(range, worker_id);
        task.decr_running();
    }
}

impl fmt::Debug for SubTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTask").field("range", &self.range).finish_non_exhaustive()
    }
}
