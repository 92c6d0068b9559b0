/*
 * Synchronization Primitives
 *
 * Blocking-capable primitives for task context: a raw spinlock for very
 * short critical sections, a yielding mutex, and a counting semaphore.
 * All three are built on sequentially consistent atomic read-modify-write
 * operations and assume one CPU with no nested interrupts.
 *
 * None of these may be used from the IRQ handler - the mutex and the
 * semaphore yield while contended, and yielding is a task-context
 * operation.
 */

pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use spinlock::Spinlock;
