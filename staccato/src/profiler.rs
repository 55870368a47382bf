use std::fmt;
use std::sync::Arc;

/// A profiler hook; invoked with the id of the worker the event happened on.
pub type ProfilerCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Hook points the scheduler reports into, for profilers and telemetry.
///
/// Every slot defaults to `None` and costs nothing when unset. Install the
/// set through [`Builder::profiler_callbacks`](crate::Builder::profiler_callbacks)
/// before the worker threads start.
///
/// - `thread_start` / `thread_stop` fire once per spawned worker lifetime.
/// - `wait_start` / `wait_stop` surround each block on the new-task event.
/// - `wait_for_task_start` / `wait_for_task_stop` surround the cooperative
///   participation loops of the wait primitives.
#[derive(Clone, Default)]
pub struct ProfilerCallbacks {
    pub thread_start: Option<ProfilerCallback>,
    pub thread_stop: Option<ProfilerCallback>,
    pub wait_start: Option<ProfilerCallback>,
    pub wait_stop: Option<ProfilerCallback>,
    pub wait_for_task_start: Option<ProfilerCallback>,
    pub wait_for_task_stop: Option<ProfilerCallback>,
}

impl ProfilerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub(crate) fn emit(slot: &Option<ProfilerCallback>, worker_id: usize) {
        if let Some(callback) = slot {
            callback(worker_id);
        }
    }
}

impl fmt::Debug for ProfilerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |slot: &Option<ProfilerCallback>| if slot.is_some() { "set" } else { "unset" };
        f.debug_struct("ProfilerCallbacks")
            .field("thread_start", &set(&self.thread_start))
            .field("thread_stop", &set(&self.thread_stop))
            .field("wait_start", &set(&self.wait_start))
            .field("wait_stop", &set(&self.wait_stop))
            .field("wait_for_task_start", &set(&self.wait_for_task_start))
            .field("wait_for_task_stop", &set(&self.wait_for_task_stop))
            .finish()
    }
}
