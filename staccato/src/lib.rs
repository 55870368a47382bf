//! A fork-join task scheduler with per-worker lock-free pipes.
//!
//! A fixed pool of worker threads cooperatively executes data-parallel
//! [`TaskSet`]s and per-thread [`PinnedTask`]s. Submissions are partitioned
//! into the submitter's own bounded ring, workers pop their own ring from
//! the front (cache-hot, LIFO) and steal from the back of their peers'
//! (FIFO, minimal contention with the owner). Waiting callers participate in
//! execution instead of blocking, so every thread including the caller
//! contributes to draining the system.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use staccato::{Builder, TaskPriority, TaskSet};
//!
//! let ts = Builder::new().worker_threads(4).try_build().unwrap();
//!
//! let sum = Arc::new(AtomicU64::new(0));
//! let task = Arc::new(TaskSet::new(1_000, {
//!     let sum = Arc::clone(&sum);
//!     move |range, _worker_id| {
//!         sum.fetch_add(range.map(u64::from).sum(), Ordering::Relaxed);
//!     }
//! }));
//!
//! ts.add_task_set(&task);
//! ts.wait_for(&*task, TaskPriority::Low);
//! assert_eq!(sum.load(Ordering::Relaxed), 999 * 1_000 / 2);
//! ts.wait_for_all_and_shutdown();
//! ```

#[doc(inline)]
pub use staccato_macros::main;

#[doc(inline)]
pub use staccato_macros::test;

pub mod profiler;
pub use profiler::{ProfilerCallback, ProfilerCallbacks};

pub(crate) mod queue;

pub mod scheduler;
pub use scheduler::{Builder, Scheduler};

pub mod task;
pub use task::{Completable, PinnedTask, TaskPriority, TaskSet};

pub(crate) mod utils;
