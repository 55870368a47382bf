use crate::task::PinnedTask;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lock-free multi-writer intrusive LIFO of pinned tasks.
///
/// Any thread pushes by CAS on the head; only the owning worker drains, by
/// swapping the head out and walking the detached chain. The link lives
/// inside the task (`PinnedTask::next`), so the list itself never allocates.
/// Pushing transfers one `Arc` reference into the list; draining hands it
/// back out.
pub(crate) struct PinnedTaskList {
    head: AtomicPtr<PinnedTask>,
}

impl PinnedTaskList {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn push(&self, task: Arc<PinnedTask>) {
        debug_assert!(
            task.next.load(Ordering::Relaxed).is_null(),
            "pinned task is already enqueued"
        );

        let node = Arc::into_raw(task) as *mut PinnedTask;
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detaches the whole chain. Owner thread only; pushes racing with the
    /// swap land on the fresh (empty) head and are picked up next drain.
    pub(crate) fn drain(&self) -> Drain {
        Drain {
            next: self.head.swap(ptr::null_mut(), Ordering::Acquire),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl Drop for PinnedTaskList {
    fn drop(&mut self) {
        // Releases the Arc reference of anything still enqueued.
        for task in self.drain() {
            drop(task);
        }
    }
}

/// Iterator over a detached chain, newest push first.
pub(crate) struct Drain {
    next: *mut PinnedTask,
}

impl Iterator for Drain {
    type Item = Arc<PinnedTask>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }

        let task = unsafe { Arc::from_raw(self.next) };
        // Clear the link so the task can be enqueued again after it retires.
        self.next = task.next.swap(ptr::null_mut(), Ordering::Relaxed);
        Some(task)
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        for task in self {
            drop(task);
        }
    }
}

unsafe impl Send for PinnedTaskList {}
unsafe impl Sync for PinnedTaskList {}
unsafe impl Send for Drain {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pinned(counter: &Arc<AtomicUsize>) -> Arc<PinnedTask> {
        let counter = Arc::clone(counter);
        Arc::new(PinnedTask::new(0, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }))
    }

    #[test]
    fn drains_newest_first() {
        let list = PinnedTaskList::new();
        let order = Arc::new(AtomicUsize::new(0));

        let a = pinned(&order);
        let b = pinned(&order);
        list.push(Arc::clone(&a));
        list.push(Arc::clone(&b));
        assert!(!list.is_empty());

        let drained: Vec<_> = list.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(Arc::ptr_eq(&drained[0], &b));
        assert!(Arc::ptr_eq(&drained[1], &a));
        assert!(list.is_empty());
    }

    #[test]
    fn tasks_can_be_requeued_after_drain() {
        let list = PinnedTaskList::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let task = pinned(&counter);

        for _ in 0..3 {
            list.push(Arc::clone(&task));
            let drained: Vec<_> = list.drain().collect();
            assert_eq!(drained.len(), 1);
        }
    }

    #[test]
    fn concurrent_pushes_are_all_observed() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 1000;

        let list = Arc::new(PinnedTaskList::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let list = Arc::clone(&list);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..PER_WRITER {
                        list.push(pinned(&counter));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = list.drain().count();
        assert_eq!(drained, WRITERS * PER_WRITER);
        assert!(list.is_empty());
    }

    #[test]
    fn drop_releases_enqueued_references() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = pinned(&counter);
        {
            let list = PinnedTaskList::new();
            list.push(Arc::clone(&task));
            assert_eq!(Arc::strong_count(&task), 2);
        }
        assert_eq!(Arc::strong_count(&task), 1);
    }
}
