use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};

/// log2 of the pipe capacity.
pub(crate) const PIPE_LOG2: u32 = 8;

const SIZE: usize = 1 << PIPE_LOG2;
const MASK: u32 = SIZE as u32 - 1;

/// Failed claims retry a few times before the caller moves on; the element is
/// accounted for elsewhere, so giving up is always safe.
const CLAIM_RETRIES: usize = 16;

/// Bounded single-writer / multi-reader lock-free ring.
///
/// One pipe exists per (priority, worker). The owning worker is the only
/// thread allowed to call the `writer_*` operations: it pushes new subtasks
/// at the front and pops its own most recent write back off the front, so
/// locally produced work stays cache-hot. Every other worker steals the
/// oldest element off the back with `reader_try_read_back`.
///
/// Coordination is per-slot sequence markers plus two monotonic positions.
/// `head` counts writes and is owned by the writer (it moves back down on a
/// front pop); `tail` is the oldest unstolen position and is contended by
/// readers. For the slot serving position `pos` (`pos % capacity == slot
/// index`) the marker means:
///
/// - `pos`      empty, writable for position `pos`
/// - `pos + 1`  holds the element published at `pos`
/// - `pos + 2`  in flight: a claimant is moving the value out
///
/// A back-read finishes by storing `pos + capacity` (writable next lap); a
/// front-read stores `pos` again, because the writer will reuse the position.
/// Claiming is a CAS out of the `pos + 1` state, so every published element
/// is consumed exactly once, and a claimant that loaded a stale position can
/// never match. The in-flight marker keeps the writer off the slot until the
/// value has actually been moved out.
///
/// Publishing is a release store on the marker and claiming is an acquire
/// CAS, which gives the happens-before edge from `writer_try_write_front` to
/// the matching read.
///
/// Front and back operations contend only when the pipe is down to its last
/// element. Either side may transiently fail under that contention; callers
/// retry or move on.
pub(crate) struct Pipe<T> {
    slots: Box<[Slot<T>]>,
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
}

struct Slot<T> {
    seq: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

// The UnsafeCell is only touched by whichever thread won the slot claim.
unsafe impl<T: Send> Send for Pipe<T> {}
unsafe impl<T: Send> Sync for Pipe<T> {}

impl<T> Pipe<T> {
    pub(crate) fn new() -> Self {
        let slots = (0..SIZE)
            .map(|i| Slot {
                seq: AtomicU32::new(i as u32),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots,
            head: CachePadded::new(AtomicU32::new(0)),
            tail: CachePadded::new(AtomicU32::new(0)),
        }
    }

    #[inline(always)]
    fn slot(&self, pos: u32) -> &Slot<T> {
        // Power-of-two capacity, AND replaces the modulus.
        &self.slots[(pos & MASK) as usize]
    }

    /// Publishes `value` at the front. Owner thread only.
    ///
    /// Fails when the slot one lap down has not been consumed yet, i.e. the
    /// pipe is full (or its oldest element is still being moved out, which
    /// the caller cannot distinguish and does not need to).
    pub(crate) fn writer_try_write_front(&self, value: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = self.slot(head);

        if slot.seq.load(Ordering::Acquire) != head {
            return Err(value);
        }

        unsafe { (*slot.value.get()).write(value) };
        slot.seq.store(head.wrapping_add(1), Ordering::Release);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the most recently written element. Owner thread only.
    ///
    /// Contends with stealers only when one element is left; in that window
    /// it may return `None` even though the element has not been stolen yet.
    pub(crate) fn writer_try_read_front(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);

        for _ in 0..CLAIM_RETRIES {
            let tail = self.tail.load(Ordering::Acquire);
            if tail == head {
                return None;
            }

            let pos = head.wrapping_sub(1);
            let slot = self.slot(pos);
            if slot
                .seq
                .compare_exchange(
                    pos.wrapping_add(1),
                    pos.wrapping_add(2),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let value = unsafe { (*slot.value.get()).assume_init_read() };
                // The writer will reuse this position on its next write.
                slot.seq.store(pos, Ordering::Release);
                self.head.store(pos, Ordering::Release);
                return Some(value);
            }

            // The front slot can only be unready when a stealer holds the
            // last element; it either finishes (tail catches head) or we win
            // the next claim.
            core::hint::spin_loop();
        }

        None
    }

    /// Steals the oldest element. Any thread.
    pub(crate) fn reader_try_read_back(&self) -> Option<T> {
        for _ in 0..CLAIM_RETRIES {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if tail == head {
                return None;
            }

            let slot = self.slot(tail);
            if slot
                .seq
                .compare_exchange(
                    tail.wrapping_add(1),
                    tail.wrapping_add(2),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let value = unsafe { (*slot.value.get()).assume_init_read() };
                slot.seq.store(tail.wrapping_add(SIZE as u32), Ordering::Release);
                // We are the sole claimant of `tail`, so only our advance can
                // land; a failure would mean a protocol violation.
                let advanced = self
                    .tail
                    .compare_exchange(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok();
                debug_assert!(advanced, "tail advanced by a non-claimant");
                return Some(value);
            }

            // Lost the claim: another stealer holds the tail element, the
            // writer popped it as the last one, or our position was stale.
            core::hint::spin_loop();
        }

        None
    }

    /// Best-effort snapshot; an in-flight element still counts as present.
    pub(crate) fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }
}

impl<T> Drop for Pipe<T> {
    fn drop(&mut self) {
        // Nothing can be in flight once we are reachable only by `&mut`.
        while self.reader_try_read_back().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn fills_to_capacity_and_rejects() {
        let pipe = Pipe::new();
        for i in 0..SIZE as u32 {
            assert!(pipe.writer_try_write_front(i).is_ok());
        }
        assert_eq!(pipe.writer_try_write_front(9999), Err(9999));

        // Consuming one frees exactly one slot.
        assert_eq!(pipe.reader_try_read_back(), Some(0));
        assert!(pipe.writer_try_write_front(9999).is_ok());
        assert_eq!(pipe.writer_try_write_front(0), Err(0));
    }

    #[test]
    fn writer_pops_lifo_reader_steals_fifo() {
        let pipe = Pipe::new();
        for i in 0..4 {
            pipe.writer_try_write_front(i).unwrap();
        }

        assert_eq!(pipe.writer_try_read_front(), Some(3));
        assert_eq!(pipe.reader_try_read_back(), Some(0));
        assert_eq!(pipe.reader_try_read_back(), Some(1));
        assert_eq!(pipe.writer_try_read_front(), Some(2));
        assert!(pipe.is_empty());
        assert_eq!(pipe.writer_try_read_front(), None);
        assert_eq!(pipe.reader_try_read_back(), None);
    }

    #[test]
    fn slots_are_reused_across_laps() {
        let pipe = Pipe::new();
        for lap in 0..3u32 {
            for i in 0..SIZE as u32 {
                pipe.writer_try_write_front(lap * SIZE as u32 + i).unwrap();
            }
            for i in 0..SIZE as u32 {
                assert_eq!(pipe.reader_try_read_back(), Some(lap * SIZE as u32 + i));
            }
        }
        assert!(pipe.is_empty());
    }

    #[test]
    fn front_pop_reuses_the_same_position() {
        let pipe = Pipe::new();
        for _ in 0..(3 * SIZE) {
            pipe.writer_try_write_front(7u32).unwrap();
            assert_eq!(pipe.writer_try_read_front(), Some(7));
        }
        assert!(pipe.is_empty());
    }

    #[test]
    fn every_element_is_consumed_exactly_once_under_contention() {
        const PER_LAP: usize = SIZE / 2;
        const LAPS: usize = 200;
        const STEALERS: usize = 3;

        let pipe = Arc::new(Pipe::new());
        let stolen = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new((0..PER_LAP * LAPS).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        let done = Arc::new(AtomicUsize::new(0));

        let stealer_handles: Vec<_> = (0..STEALERS)
            .map(|_| {
                let pipe = Arc::clone(&pipe);
                let stolen = Arc::clone(&stolen);
                let seen = Arc::clone(&seen);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    loop {
                        match pipe.reader_try_read_back() {
                            Some(v) => {
                                seen[v as usize].fetch_add(1, Ordering::Relaxed);
                                stolen.fetch_add(1, Ordering::Relaxed);
                            }
                            None => {
                                if done.load(Ordering::Acquire) == 1 && pipe.is_empty() {
                                    break;
                                }
                                thread::yield_now();
                            }
                        }
                    }
                })
            })
            .collect();

        // The writer interleaves pushes with front pops, fighting the
        // stealers over the last element of each burst.
        let mut next = 0u32;
        let mut popped = 0usize;
        for _ in 0..LAPS {
            let mut written = 0;
            while written < PER_LAP {
                if pipe.writer_try_write_front(next).is_ok() {
                    next += 1;
                    written += 1;
                } else {
                    thread::yield_now();
                }
                if written % 8 == 0
                    && let Some(v) = pipe.writer_try_read_front()
                {
                    seen[v as usize].fetch_add(1, Ordering::Relaxed);
                    popped += 1;
                }
            }
        }
        done.store(1, Ordering::Release);

        for handle in stealer_handles {
            handle.join().unwrap();
        }

        assert_eq!(popped + stolen.load(Ordering::Relaxed), PER_LAP * LAPS);
        for (i, count) in seen.iter().enumerate() {
            assert_eq!(count.load(Ordering::Relaxed), 1, "element {i} consumed {count:?} times");
        }
    }

    #[test]
    fn drop_releases_unconsumed_elements() {
        let marker = Arc::new(());
        {
            let pipe = Pipe::new();
            for _ in 0..10 {
                pipe.writer_try_write_front(Arc::clone(&marker)).unwrap();
            }
            assert_eq!(Arc::strong_count(&marker), 11);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
