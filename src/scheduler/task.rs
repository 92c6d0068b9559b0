/*
 * Task Record
 *
 * This module defines the Task structure and related types for the
 * scheduler. A task is a kernel thread of execution with a statically
 * reserved 4 KiB stack; the table in `scheduler` holds a fixed number of
 * these records and reuses a slot only after its occupant terminates.
 */

use core::fmt;

use heapless::String;

/// How many task slots the table holds.
pub const MAX_TASKS: usize = 8;

/// Bytes of private stack per task. Grows down from the high end.
pub const TASK_STACK_SIZE: usize = 4096;

/// Capacity of a task's name; longer names are truncated on creation.
pub const TASK_NAME_LEN: usize = 16;

/// Task identifier. Equal to the task's slot index, stable for the task's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unused,
    Ready,
    Running,
    Sleeping,
    Blocked,
    Terminated,
}

impl TaskState {
    /// Short label used by the shell's task listing.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Unused => "Unused",
            TaskState::Ready => "Ready",
            TaskState::Running => "Running",
            TaskState::Sleeping => "Sleeping",
            TaskState::Blocked => "Blocked",
            TaskState::Terminated => "Terminated",
        }
    }
}

/// Task creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Every slot in the task table is occupied.
    NoSlot,
}

/// One slot of the task table.
///
/// `stack_ptr` is only meaningful while the task is suspended: it then
/// points into the task's own stack, at a frame laid out as
/// `arch::armv7::context` describes. While the task is Running the field
/// holds whatever was saved last and must not be trusted.
pub struct Task {
    pub id: TaskId,
    pub name: String<TASK_NAME_LEN>,
    pub state: TaskState,
    pub(crate) stack_ptr: *mut u32,
    /// Reserved; the selection policy currently treats all runnable tasks
    /// equally.
    pub priority: u32,
    /// Tick deadline; meaningful only while Sleeping.
    pub(crate) wake_at: u32,
}

impl Task {
    /// An empty slot.
    pub const fn unused() -> Self {
        Task {
            id: TaskId(0),
            name: String::new(),
            state: TaskState::Unused,
            stack_ptr: core::ptr::null_mut(),
            priority: 0,
            wake_at: 0,
        }
    }

    /// Copy `name` into the bounded name field, truncating at capacity.
    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        for c in name.chars() {
            if self.name.push(c).is_err() {
                break;
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_truncates_at_capacity() {
        let mut task = Task::unused();
        task.set_name("a-task-name-well-beyond-the-bound");
        assert_eq!(task.name.len(), TASK_NAME_LEN);
        assert_eq!(&task.name[..4], "a-ta");
    }

    #[test]
    fn unused_slot_is_inert() {
        let task = Task::unused();
        assert_eq!(task.state, TaskState::Unused);
        assert!(task.stack_ptr.is_null());
        assert!(task.name.is_empty());
    }
}
