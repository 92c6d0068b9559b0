/*
 * Yielding Mutex
 *
 * A 0/1 lock with owner tracking. A contended `lock` yields to the
 * scheduler between attempts instead of burning its whole time slice, so
 * the holder actually gets CPU time to finish its critical section.
 *
 * Non-recursive. Unlocking a mutex the caller does not own is silently
 * ignored - see `unlock`.
 */

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::scheduler;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Owner value while nobody holds the mutex.
const NO_OWNER: usize = usize::MAX;

/// Mutual exclusion lock with a named owner.
pub struct Mutex {
    lock: AtomicU32,
    owner: AtomicUsize,
    name: &'static str,
}

impl Mutex {
    /// A new, unlocked mutex.
    pub const fn new(name: &'static str) -> Self {
        Mutex {
            lock: AtomicU32::new(UNLOCKED),
            owner: AtomicUsize::new(NO_OWNER),
            name,
        }
    }

    fn caller_id() -> usize {
        match scheduler::current_task_id() {
            Some(id) => id.0,
            None => NO_OWNER,
        }
    }

    fn try_acquire(&self) -> bool {
        if self
            .lock
            .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.owner.store(Self::caller_id(), Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Acquire the mutex, yielding while it is contended.
    pub fn lock(&self) {
        while !self.try_acquire() {
            scheduler::yield_now();
        }
    }

    /// One acquisition attempt; true if the mutex was taken.
    pub fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    /// Release the mutex.
    ///
    /// Only the owner can release; an unlock from any other task is
    /// silently ignored. Callers that want to catch that misuse can watch
    /// `is_locked` - the kernel keeps the permissive behavior because
    /// nothing in-tree relies on the stricter one.
    pub fn unlock(&self) {
        if self.owner.load(Ordering::SeqCst) != Self::caller_id() {
            return;
        }
        self.owner.store(NO_OWNER, Ordering::SeqCst);
        self.lock.store(UNLOCKED, Ordering::SeqCst);
    }

    /// Whether the mutex is currently held.
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::SeqCst) != UNLOCKED
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
    fn lock_then_unlock() {
        let m = Mutex::new("m0");
        assert!(!m.is_locked());
        m.lock();
        assert!(m.is_locked());
        m.unlock();
        assert!(!m.is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = Mutex::new("m1");
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn name_is_kept() {
        let m = Mutex::new("sd-card");
        assert_eq!(m.name(), "sd-card");
    }
}
