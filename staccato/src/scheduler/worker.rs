use crate::profiler::ProfilerCallbacks;
use crate::scheduler::Shared;
use crate::utils::ScopeGuard;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Dispatch misses tolerated before a worker gives up spinning and parks on
/// the new-task event.
const SPIN_COUNT: u32 = 100;

/// Each consecutive miss backs off this much harder.
const SPIN_BACKOFF_MULTIPLIER: u32 = 10;

thread_local! {
    // Every scheduler thread knows its own worker id without a lookup;
    // threads the scheduler has never seen act as worker 0.
    static WORKER_ID: Cell<usize> = const { Cell::new(0) };
}

#[inline(always)]
pub(crate) fn current_worker_id() -> usize {
    WORKER_ID.get()
}

pub(crate) fn set_current_worker_id(worker_id: usize) {
    WORKER_ID.set(worker_id);
}

#[inline(always)]
fn spin_backoff(iterations: u32) {
    for _ in 0..iterations {
        core::hint::spin_loop();
    }
}

/// Body of every spawned worker thread: try to run a task, spin with
/// increasing backoff on a miss, park on the event once the spin budget is
/// spent. Only `wait_for_tasks` ever blocks.
pub(crate) fn worker_main(shared: Arc<Shared>, worker_id: usize) {
    set_current_worker_id(worker_id);
    tracing::trace!(worker_id, "worker thread started");
    ProfilerCallbacks::emit(&shared.profiler.thread_start, worker_id);

    // Armed for the panic path too: a task body that unwinds must not leave
    // the running-thread count stuck, or shutdown would never finish.
    let _exit_guard = ScopeGuard::new(|| {
        shared.num_threads_running.fetch_sub(1, Ordering::Release);
        ProfilerCallbacks::emit(&shared.profiler.thread_stop, worker_id);
        tracing::trace!(worker_id, "worker thread stopped");
    });

    let mut spin_count = 0u32;
    let mut hint = worker_id + 1;
    while shared.running.load(Ordering::Relaxed) {
        if shared.try_run_task(worker_id, &mut hint) {
            spin_count = 0;
        } else {
            spin_count += 1;
            if spin_count > SPIN_COUNT {
                shared.wait_for_tasks(worker_id);
                spin_count = 0;
            } else {
                spin_backoff(spin_count * SPIN_BACKOFF_MULTIPLIER);
            }
        }
    }
}
