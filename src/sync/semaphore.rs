/*
 * Counting Semaphore
 *
 * A bounded counter with compare-and-swap updates. `wait` yields while the
 * count is zero; `signal` at the maximum is silently dropped, so the count
 * is always within [0, max]. Fairness is not guaranteed - a waiter can be
 * overtaken by a task that arrives later.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use crate::scheduler;

/// Counting semaphore with a fixed ceiling.
pub struct Semaphore {
    count: AtomicU32,
    max: u32,
    name: &'static str,
}

impl Semaphore {
    /// A new semaphore with `initial` permits and a ceiling of `max`.
    pub const fn new(name: &'static str, initial: u32, max: u32) -> Self {
        Semaphore {
            count: AtomicU32::new(initial),
            max,
            name,
        }
    }

    fn try_take(&self) -> bool {
        let current = self.count.load(Ordering::SeqCst);
        current > 0
            && self
                .count
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// Take a permit, yielding until one is available.
    pub fn wait(&self) {
        while !self.try_take() {
            scheduler::yield_now();
        }
    }

    /// One attempt to take a permit; true on success.
    pub fn try_wait(&self) -> bool {
        self.try_take()
    }

    /// Return a permit.
    ///
    /// A signal while the count already equals the ceiling is silently
    /// ignored.
    pub fn signal(&self) {
        loop {
            let current = self.count.load(Ordering::SeqCst);
            if current >= self.max {
                return;
            }
            if self
                .count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Current permit count.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// The name given at construction.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_stay_within_bounds() {
        let sem = Semaphore::new("s0", 1, 2);
        sem.signal();
        assert_eq!(sem.count(), 2);
        // Already at the ceiling: dropped.
        sem.signal();
        assert_eq!(sem.count(), 2);

        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert_eq!(sem.count(), 0);
        assert!(!sem.try_wait());
    }

    #[test]
    fn wait_consumes_an_earlier_signal() {
        let sem = Semaphore::new("s1", 0, 1);
        assert!(!sem.try_wait());
        sem.signal();
        sem.wait();
        assert_eq!(sem.count(), 0);
    }
}
