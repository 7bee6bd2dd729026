//! # Kernel Errors

use core::fmt;

use crate::task::TaskId;

/// Everything a kernel call can report back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// The task table is full; no task was created.
    CapacityExceeded,
    /// The handle does not name a registered task.
    InvalidTask(TaskId),
    /// The task is in a timed wait. Activating it would cancel the wait.
    TaskWaiting(TaskId),
    /// The task's saved context fell outside its stack, or the guard words at
    /// the bottom of its stack were overwritten.
    StackOverflow(TaskId),
    /// The scheduler has not dispatched a task yet.
    NotStarted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::CapacityExceeded => write!(f, "task table is full"),
            KernelError::InvalidTask(id) => write!(f, "no such task {}", id),
            KernelError::TaskWaiting(id) => write!(f, "task {} is in a timed wait", id),
            KernelError::StackOverflow(id) => write!(f, "stack overflow in task {}", id),
            KernelError::NotStarted => write!(f, "scheduler not started"),
        }
    }
}
