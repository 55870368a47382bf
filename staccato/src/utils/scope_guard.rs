/// Runs a closure when dropped, including during unwinding.
///
/// The worker loop arms one of these with its exit accounting so the
/// running-thread counter stays accurate even if user task code panics;
/// shutdown would otherwise spin forever waiting for the count to drain.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    // Option so the closure can be taken exactly once on drop.
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        Self {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_on_drop() {
        let mut fired = false;
        {
            let _guard = ScopeGuard::new(|| fired = true);
        }
        assert!(fired);
    }

    #[test]
    fn runs_on_unwind() {
        use std::sync::atomic::{AtomicBool, Ordering};

        static FIRED: AtomicBool = AtomicBool::new(false);

        let result = std::panic::catch_unwind(|| {
            let _guard = ScopeGuard::new(|| FIRED.store(true, Ordering::Relaxed));
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(FIRED.load(Ordering::Relaxed));
    }
}
