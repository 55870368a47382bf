use crate::scheduler::{Shared, worker};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

/// Spawns workers `1..num_threads`; worker 0 is the calling thread. Each
/// spawn is accounted in `num_threads_running` before the thread exists, so
/// shutdown can wait on the counter alone.
pub(super) fn spawn_workers(shared: &Arc<Shared>) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(shared.num_threads.saturating_sub(1));

    for worker_id in 1..shared.num_threads {
        let mut builder = thread::Builder::new().name(shared.cfg.thread_name.name_for(worker_id));
        if let Some(stack_size) = shared.cfg.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        shared.num_threads_running.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::clone(shared);
        let handle = builder
            .spawn(move || worker::worker_main(shared, worker_id))
            .expect("failed to spawn worker thread");
        handles.push(handle);
    }

    handles
}

pub(super) fn join_all(handles: Vec<thread::JoinHandle<()>>) {
    let mut panicked = 0usize;
    for handle in handles {
        if handle.join().is_err() {
            panicked += 1;
        }
    }

    if panicked > 0 {
        tracing::error!(panicked, "worker thread(s) panicked");
        debug_assert!(false, "worker thread panicked");
    }
}
