/*
 * Spinlock
 *
 * A single atomic flag. The holder is expected to be gone within a few
 * instructions; nobody yields while waiting, so keep critical sections
 * very short.
 */

use core::sync::atomic::{AtomicBool, Ordering};

/// Test-and-set spinlock.
pub struct Spinlock {
    locked: AtomicBool,
}

impl Spinlock {
    /// A new, unlocked spinlock.
    pub const fn new() -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) {
        while self.locked.swap(true, Ordering::SeqCst) {
            core::hint::spin_loop();
        }
    }

    /// One acquisition attempt; true if the lock was taken.
    pub fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::SeqCst)
    }

    /// Release the lock.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_try_lock() {
        let lock = Spinlock::new();
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
        assert!(!lock.is_locked());
    }
}
