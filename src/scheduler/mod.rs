/*
 * Preemptive Round-Robin Scheduler
 *
 * Multiplexes a fixed table of tasks over the single CPU. Tasks lose the
 * CPU in exactly two ways: by calling into the scheduler themselves
 * (`yield_now`, `sleep`, `exit`, the sync primitives' retry loops) or on
 * the timer IRQ, which calls `preempt` with the interrupted task's stack
 * pointer.
 *
 * Selection is strict round-robin: scan the table starting one past the
 * current slot, waking any sleeper whose deadline has passed, and take the
 * first Ready slot. A task that never blocks still loses the CPU every
 * tick, so the policy is fair without per-task accounting.
 *
 * Locking: the task table has no lock. Every mutation runs either with
 * IRQs masked (the cooperative entry points) or at IRQ time (`preempt`),
 * and there is one CPU, so masking is sufficient. The `IrqSafe` cell
 * below packages that rule; its closures must not nest.
 */

use core::cell::UnsafeCell;
use core::ptr;

use heapless::Vec;

use crate::arch::armv7::context;
use crate::arch::{self, interrupts};
use crate::drivers::timer;

pub mod task;

pub use task::{MAX_TASKS, SpawnError, TASK_NAME_LEN, TASK_STACK_SIZE, Task, TaskId, TaskState};

/// Interior-mutable cell protected by the IRQ mask.
///
/// Sound on this kernel because there is one CPU and every access path
/// masks IRQs first. Closures passed to `with` must not nest and must not
/// reach code that takes the cell again.
struct IrqSafe<T>(UnsafeCell<T>);

unsafe impl<T> Sync for IrqSafe<T> {}

impl<T> IrqSafe<T> {
    const fn new(value: T) -> Self {
        IrqSafe(UnsafeCell::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        interrupts::without_interrupts(|| f(unsafe { &mut *self.0.get() }))
    }

    /// Direct access for contexts where IRQs are already masked (the IRQ
    /// handler, or a section that masked them explicitly).
    ///
    /// # Safety
    ///
    /// Caller must hold the IRQ mask and must not already hold a borrow.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self) -> &mut T {
        unsafe { &mut *self.0.get() }
    }
}

/// Scheduler bookkeeping: the task table, which slot is on the CPU, and
/// whether `start` has happened yet.
struct Scheduler {
    tasks: [Task; MAX_TASKS],
    current: Option<usize>,
    started: bool,
}

impl Scheduler {
    const fn new() -> Self {
        Scheduler {
            tasks: [const { Task::unused() }; MAX_TASKS],
            current: None,
            started: false,
        }
    }

    /// Round-robin selection starting one past `current`.
    ///
    /// Sleepers whose deadline has passed are transitioned to Ready as the
    /// scan walks over them, so they become eligible in the same pass.
    /// Returns the first Ready slot, or None if nothing is runnable.
    fn select_next(&mut self, now: u32) -> Option<usize> {
        let start = match self.current {
            Some(i) => (i + 1) % MAX_TASKS,
            None => 0,
        };
        for offset in 0..MAX_TASKS {
            let idx = (start + offset) % MAX_TASKS;
            let task = &mut self.tasks[idx];
            if task.state == TaskState::Sleeping && timer::deadline_reached(now, task.wake_at) {
                task.state = TaskState::Ready;
            }
            if task.state == TaskState::Ready {
                return Some(idx);
            }
        }
        None
    }
}

static SCHEDULER: IrqSafe<Scheduler> = IrqSafe::new(Scheduler::new());

/// Task stacks, statically reserved and 8-byte aligned as AAPCS wants the
/// stack pointer to be.
#[repr(C, align(8))]
struct TaskStack([u8; TASK_STACK_SIZE]);

struct StackPool(UnsafeCell<[TaskStack; MAX_TASKS]>);

unsafe impl Sync for StackPool {}

static STACKS: StackPool = StackPool(UnsafeCell::new(
    [const { TaskStack([0; TASK_STACK_SIZE]) }; MAX_TASKS],
));

/// Pointer one past the high end of a slot's stack.
fn stack_top(slot: usize) -> *mut u32 {
    unsafe { (STACKS.0.get() as *mut TaskStack).add(slot + 1) as *mut u32 }
}

/// Reset the task table: every slot Unused, no current task, not started.
///
/// Called once at boot, before any task exists.
pub fn init() {
    SCHEDULER.with(|s| {
        for (i, task) in s.tasks.iter_mut().enumerate() {
            *task = Task::unused();
            task.id = TaskId(i);
        }
        s.current = None;
        s.started = false;
    });
    log::info!("scheduler initialized ({} slots)", MAX_TASKS);
}

/// Create a task in the first free slot.
///
/// The new task is Ready with a fresh creation frame at the top of its
/// stack; it first runs when the scheduler selects it. `priority` is
/// recorded but does not influence selection.
pub fn spawn(name: &str, entry: fn(), priority: u32) -> Result<TaskId, SpawnError> {
    let id = SCHEDULER.with(|s| {
        let slot = s
            .tasks
            .iter()
            .position(|t| t.state == TaskState::Unused)
            .ok_or(SpawnError::NoSlot)?;

        let sp = unsafe { context::init_frame(stack_top(slot), entry) };

        let task = &mut s.tasks[slot];
        task.id = TaskId(slot);
        task.set_name(name);
        task.state = TaskState::Ready;
        task.stack_ptr = sp;
        task.priority = priority;
        task.wake_at = 0;
        Ok(TaskId(slot))
    })?;

    log::info!("scheduler: created task '{}' ({})", name, id);
    Ok(id)
}

/// Cooperative scheduling point.
///
/// Picks the next runnable task and switches to it; with nothing else
/// runnable this is a no-op and the caller keeps the CPU.
pub fn yield_now() {
    schedule();
}

fn schedule() {
    let _guard = interrupts::DisableInterrupts::new();

    let old_slot: *mut *mut u32;
    let new_sp: *mut u32;
    {
        // IRQs are masked; exclusive access for the length of this block.
        let s = unsafe { SCHEDULER.get_mut() };
        if !s.started {
            return;
        }
        let Some(next) = s.select_next(timer::ticks()) else {
            return;
        };
        if Some(next) == s.current {
            // The scan can have flipped the caller to Ready (a sleeper
            // whose deadline just passed); it keeps the CPU either way.
            s.tasks[next].state = TaskState::Running;
            return;
        }

        let prev = s.current;
        s.current = Some(next);
        old_slot = match prev {
            Some(p) => {
                if s.tasks[p].state == TaskState::Running {
                    s.tasks[p].state = TaskState::Ready;
                }
                &raw mut s.tasks[p].stack_ptr
            }
            None => ptr::null_mut(),
        };
        s.tasks[next].state = TaskState::Running;
        new_sp = s.tasks[next].stack_ptr;
    }

    // The save half of the switch fills *old_slot; when some other task
    // eventually switches back here, execution resumes at this point with
    // IRQs still masked, and the guard restores the caller's mask state.
    unsafe { arch::context_switch(old_slot, new_sp) };
}

/// Put the current task to sleep for at least `duration` ticks.
///
/// The task is not re-selected until the tick counter reaches the
/// deadline. If nothing else is runnable the CPU parks on
/// `wait_for_interrupt` until the deadline passes instead of returning
/// early.
pub fn sleep(duration: u32) {
    let deadline = timer::ticks().wrapping_add(duration);
    let parked = SCHEDULER.with(|s| match s.current {
        Some(cur) => {
            let task = &mut s.tasks[cur];
            task.wake_at = deadline;
            task.state = TaskState::Sleeping;
            true
        }
        None => false,
    });
    if !parked {
        return;
    }

    loop {
        schedule();
        if timer::deadline_reached(timer::ticks(), deadline) {
            break;
        }
        // Nothing else was runnable and the deadline has not passed yet.
        interrupts::wait_for_interrupt();
    }

    // The caller is executing again, whatever the wake path was; after an
    // idle wait the slot can still be tagged Sleeping.
    SCHEDULER.with(|s| {
        if let Some(cur) = s.current {
            s.tasks[cur].state = TaskState::Running;
        }
    });
}

/// Terminate the current task.
///
/// The slot stays Terminated; it is not reused. If no runnable task
/// remains the CPU enters a low-power wait loop.
pub fn exit() -> ! {
    SCHEDULER.with(|s| {
        if let Some(cur) = s.current {
            s.tasks[cur].state = TaskState::Terminated;
        }
    });
    schedule();

    // schedule() only returns here if nothing else is runnable.
    log::warn!("scheduler: all tasks terminated");
    loop {
        interrupts::wait_for_interrupt();
    }
}

/// Hand control to the first Ready task. Does not return.
///
/// A null old-sp tells the context switch to skip the save half: there is
/// no previous task context worth keeping.
pub fn start() -> ! {
    interrupts::disable();

    let first = SCHEDULER.with(|s| {
        s.select_next(timer::ticks()).map(|next| {
            s.started = true;
            s.current = Some(next);
            s.tasks[next].state = TaskState::Running;
            (s.tasks[next].stack_ptr, next)
        })
    });

    match first {
        Some((sp, slot)) => {
            log::info!("scheduler: starting, first task is slot {}", slot);
            unsafe { arch::context_switch(ptr::null_mut(), sp) };
            // The first task never returns control here.
            log::error!("scheduler: start returned");
        }
        None => {
            log::error!("scheduler: no tasks to run");
        }
    }
    loop {
        interrupts::wait_for_interrupt();
    }
}

/// IRQ-time scheduling hook.
///
/// `sp` is the interrupted task's stack pointer with a full frame already
/// pushed by the IRQ entry stub. Returns the stack pointer to resume from,
/// or null if the selection is unchanged and the handler should restore
/// the interrupted context as-is.
///
/// Runs with IRQs masked; must not be called from task context.
pub fn preempt(sp: *mut u32) -> *mut u32 {
    let s = unsafe { SCHEDULER.get_mut() };
    if !s.started {
        return ptr::null_mut();
    }
    let Some(next) = s.select_next(timer::ticks()) else {
        return ptr::null_mut();
    };
    if Some(next) == s.current {
        s.tasks[next].state = TaskState::Running;
        return ptr::null_mut();
    }

    let prev = s.current;
    s.current = Some(next);
    if let Some(p) = prev {
        s.tasks[p].stack_ptr = sp;
        if s.tasks[p].state == TaskState::Running {
            s.tasks[p].state = TaskState::Ready;
        }
    }
    s.tasks[next].state = TaskState::Running;
    s.tasks[next].stack_ptr
}

/// Identifier of the task currently on the CPU, if the scheduler has one.
pub fn current_task_id() -> Option<TaskId> {
    SCHEDULER.with(|s| s.current.map(TaskId))
}

/// Snapshot row for the shell's task listing.
pub struct TaskView {
    pub id: TaskId,
    pub name: heapless::String<TASK_NAME_LEN>,
    pub state: TaskState,
    pub priority: u32,
}

/// Copy out every occupied slot for display.
pub fn task_snapshot() -> Vec<TaskView, MAX_TASKS> {
    SCHEDULER.with(|s| {
        let mut out = Vec::new();
        for task in s.tasks.iter() {
            if task.state == TaskState::Unused {
                continue;
            }
            let _ = out.push(TaskView {
                id: task.id,
                name: task.name.clone(),
                state: task.state,
                priority: task.priority,
            });
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_entry() {}

    /// Serializes access to the shared `SCHEDULER` global across tests in
    /// this module; the default test harness runs tests on separate
    /// threads, and these tests mutate shared global state.
    fn tests_run_one_at_a_time() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pretend `start` happened with slot 0 on the CPU, without actually
    /// jumping into a task stack.
    fn fake_start() {
        SCHEDULER.with(|s| {
            s.started = true;
            s.current = Some(0);
            s.tasks[0].state = TaskState::Running;
        });
    }

    fn state_of(slot: usize) -> TaskState {
        SCHEDULER.with(|s| s.tasks[slot].state)
    }

    fn saved_sp(slot: usize) -> *mut u32 {
        SCHEDULER.with(|s| s.tasks[slot].stack_ptr)
    }

    #[test]
    fn spawn_fills_slots_in_order_and_rejects_overflow() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        for i in 0..MAX_TASKS {
            let id = spawn("filler", idle_entry, 0).unwrap();
            assert_eq!(id, TaskId(i));
        }
        assert_eq!(spawn("straggler", idle_entry, 0), Err(SpawnError::NoSlot));
    }

    #[test]
    fn spawn_builds_a_frame_inside_the_slot_stack() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        let id = spawn("framed", idle_entry, 0).unwrap();
        let sp = saved_sp(id.0) as usize;
        let top = stack_top(id.0) as usize;
        assert_eq!(sp, top - context::FRAME_WORDS * 4);
        assert!(sp >= top - TASK_STACK_SIZE);
    }

    #[test]
    fn preempt_walks_the_table_round_robin() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("a", idle_entry, 0).unwrap();
        spawn("b", idle_entry, 0).unwrap();
        spawn("c", idle_entry, 0).unwrap();
        fake_start();

        let mut fake_frame = [0u32; 4];
        let fake_sp = &raw mut fake_frame[0];

        // Tick 1: a -> b. a's sp is captured, b's saved sp comes back.
        let sp_b = saved_sp(1);
        assert_eq!(preempt(fake_sp), sp_b);
        assert_eq!(state_of(0), TaskState::Ready);
        assert_eq!(saved_sp(0), fake_sp);
        assert_eq!(state_of(1), TaskState::Running);

        // Tick 2: b -> c, tick 3: c -> a again.
        let sp_c = saved_sp(2);
        assert_eq!(preempt(fake_sp), sp_c);
        assert_eq!(preempt(fake_sp), fake_sp);
        assert_eq!(current_task_id(), Some(TaskId(0)));
    }

    #[test]
    fn round_robin_is_fair_over_a_window() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("a", idle_entry, 0).unwrap();
        spawn("b", idle_entry, 0).unwrap();
        spawn("c", idle_entry, 0).unwrap();
        fake_start();

        let mut fake_frame = [0u32; 4];
        let fake_sp = &raw mut fake_frame[0];

        // Slot 0 was running before the window opened.
        let mut runs = [0usize; 3];
        runs[0] += 1;
        for _ in 0..9 {
            preempt(fake_sp);
            runs[current_task_id().unwrap().0] += 1;
        }
        // Over K * N ticks every never-blocking task runs at least K - 1
        // times.
        assert!(runs.iter().all(|&count| count >= 3), "{:?}", runs);
    }

    #[test]
    fn preempt_with_single_task_resumes_in_place() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("solo", idle_entry, 0).unwrap();
        fake_start();

        let mut fake_frame = [0u32; 4];
        assert!(preempt(&raw mut fake_frame[0]).is_null());
        assert_eq!(state_of(0), TaskState::Running);
        assert_eq!(current_task_id(), Some(TaskId(0)));
    }

    #[test]
    fn preempt_before_start_is_ignored() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("early", idle_entry, 0).unwrap();
        let mut fake_frame = [0u32; 4];
        assert!(preempt(&raw mut fake_frame[0]).is_null());
    }

    #[test]
    fn sleeper_is_skipped_until_deadline_then_woken_in_scan() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("a", idle_entry, 0).unwrap();
        spawn("dozer", idle_entry, 0).unwrap();
        spawn("c", idle_entry, 0).unwrap();
        fake_start();

        SCHEDULER.with(|s| {
            s.tasks[1].state = TaskState::Sleeping;
            s.tasks[1].wake_at = 5;
        });

        let mut fake_frame = [0u32; 4];
        let fake_sp = &raw mut fake_frame[0];

        // Before the deadline the scan jumps from a straight to c.
        assert_eq!(preempt(fake_sp), saved_sp(2));
        assert_eq!(state_of(1), TaskState::Sleeping);

        // Once ticks reach the deadline the same scan wakes and picks it.
        timer::set_ticks_for_test(5);
        assert_eq!(preempt(fake_sp), saved_sp(1));
        assert_eq!(state_of(1), TaskState::Running);
        assert_eq!(current_task_id(), Some(TaskId(1)));
    }

    #[test]
    fn sleeper_wakes_across_tick_wraparound() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(u32::MAX - 1);
        init();
        spawn("a", idle_entry, 0).unwrap();
        spawn("wrap", idle_entry, 0).unwrap();
        fake_start();

        // Deadline lands past the 32-bit wrap point.
        SCHEDULER.with(|s| {
            s.tasks[1].state = TaskState::Sleeping;
            s.tasks[1].wake_at = (u32::MAX - 1).wrapping_add(4);
        });

        let mut fake_frame = [0u32; 4];
        let fake_sp = &raw mut fake_frame[0];
        assert!(preempt(fake_sp).is_null());

        timer::set_ticks_for_test(2); // wrapped past the deadline
        assert_eq!(preempt(fake_sp), saved_sp(1));
    }

    #[test]
    fn yield_with_single_runnable_task_changes_nothing() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("solo", idle_entry, 0).unwrap();
        fake_start();

        let sp_before = saved_sp(0);
        yield_now();
        assert_eq!(current_task_id(), Some(TaskId(0)));
        assert_eq!(state_of(0), TaskState::Running);
        assert_eq!(saved_sp(0), sp_before);
    }

    #[test]
    fn terminated_slots_are_never_selected() {
        let _guard = tests_run_one_at_a_time();
        timer::set_ticks_for_test(0);
        init();
        spawn("a", idle_entry, 0).unwrap();
        spawn("gone", idle_entry, 0).unwrap();
        fake_start();
        SCHEDULER.with(|s| s.tasks[1].state = TaskState::Terminated);

        let mut fake_frame = [0u32; 4];
        assert!(preempt(&raw mut fake_frame[0]).is_null());
        assert_eq!(current_task_id(), Some(TaskId(0)));
    }
}
