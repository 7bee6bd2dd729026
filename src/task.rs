//! # Task Control Block
//!
//! Defines the task model: scheduling states, task handles and the TCB that
//! holds a task's priority, saved context position and private stack.

use core::fmt;

use crate::context::TaskStack;

/// Timer periods since the scheduler started. Wraps on overflow.
pub type Tick = u32;

/// Task body. Tasks run forever or park themselves with
/// [`crate::kernel::suspend_task`]; they are never re-entered.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a task.
///
/// ```text
///                 dispatch
///   ┌─────────┐ ──────────► ┌─────────┐
///   │  Ready  │             │ Running │
///   └─────────┘ ◄────────── └─────────┘
///     ▲    ▲      preempt     │     │
///     │    │                  │     │ suspend_task()
///     │    │ local_tick == 0  │     ▼
///     │    │   ┌─────────┐    │   ┌───────────┐
///     │    └── │ Waiting │ ◄──┘   │ Suspended │
///     │        └─────────┘ delay  └───────────┘
///     └──────────── activate_task() ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Eligible to run, waiting for the CPU.
    Ready,
    /// Currently executing.
    Running,
    /// In a timed wait; becomes Ready when `local_tick` reaches zero.
    Waiting,
    /// Parked until another task activates it.
    Suspended,
}

impl TaskState {
    /// Whether the dispatcher may pick a task in this state.
    #[inline]
    pub const fn is_eligible(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Running)
    }
}

/// Initial state requested at task creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Autostart {
    /// The task is Ready as soon as it is created.
    Ready,
    /// The task stays Suspended until [`crate::kernel::activate_task`].
    Suspended,
}

// ---------------------------------------------------------------------------
// Task handles
// ---------------------------------------------------------------------------

/// Handle to a task: its index in the task table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskId(usize);

impl TaskId {
    /// The handle reported before the first task is dispatched
    const INVALID_ID: usize = usize::MAX;

    /// Is this the invalid Task ID?
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID_ID
    }

    /// Create an invalid Task ID
    pub const fn invalid() -> TaskId {
        TaskId(Self::INVALID_ID)
    }

    pub(crate) const fn new(index: usize) -> TaskId {
        TaskId(index)
    }

    /// Position in the task table, or `None` for the invalid handle.
    pub const fn index(self) -> Option<usize> {
        if self.is_invalid() {
            None
        } else {
            Some(self.0)
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TaskId {
    fn format(&self, fmt: defmt::Formatter) {
        if self.is_invalid() {
            defmt::write!(fmt, "T---");
        } else {
            defmt::write!(fmt, "T{=usize:03}", self.0);
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(fmt, "T---")
        } else {
            write!(fmt, "T{:03}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
///
/// TCBs live inline in the scheduler's fixed table and are never removed.
/// The saved context is kept as a word offset into `stack` rather than an
/// address, so the table can be built anywhere and moved before start.
pub struct TaskControlBlock {
    /// Higher value wins. Fixed at creation.
    pub(crate) priority: u8,

    pub(crate) state: TaskState,

    /// Word offset of the saved context within `stack`. Stale while the
    /// task is Running.
    pub(crate) saved_offset: usize,

    pub(crate) entry: Option<TaskEntry>,

    /// Remaining delay, meaningful only while Waiting.
    pub(crate) local_tick: Tick,

    pub(crate) stack: TaskStack,
}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialise the static table.
    pub const EMPTY: TaskControlBlock = TaskControlBlock {
        priority: 0,
        state: TaskState::Suspended,
        saved_offset: 0,
        entry: None,
        local_tick: 0,
        stack: TaskStack::new(),
    };

    /// Initialise this slot for a new task and build its bootstrap frame.
    pub(crate) fn init(&mut self, entry: TaskEntry, priority: u8, autostart: Autostart, exit: TaskEntry) {
        self.priority = priority;
        self.local_tick = 0;
        self.entry = Some(entry);
        self.state = match autostart {
            Autostart::Ready => TaskState::Ready,
            Autostart::Suspended => TaskState::Suspended,
        };
        self.saved_offset = self.stack.init_frame(entry, exit);
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn local_tick(&self) -> Tick {
        self.local_tick
    }

    pub fn entry(&self) -> Option<TaskEntry> {
        self.entry
    }

    /// Word offset of the saved context within the task's stack.
    pub fn saved_offset(&self) -> usize {
        self.saved_offset
    }

    pub fn stack(&self) -> &TaskStack {
        &self.stack
    }

    /// Check if the dispatcher may select this task.
    #[inline]
    pub fn is_eligible(&self) -> bool {
        self.state.is_eligible()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_WORDS;
    use crate::context::FRAME_WORDS;

    extern "C" fn body() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn test_tcb_initialization() {
        let mut tcb = TaskControlBlock::EMPTY;
        assert_eq!(tcb.state(), TaskState::Suspended);
        assert!(tcb.entry().is_none());

        tcb.init(body, 5, Autostart::Ready, body);

        assert_eq!(tcb.state(), TaskState::Ready);
        assert_eq!(tcb.priority(), 5);
        assert_eq!(tcb.local_tick(), 0);
        assert_eq!(tcb.saved_offset(), STACK_WORDS - FRAME_WORDS);
        assert!(tcb.stack().guard_intact());
    }

    #[test]
    fn test_autostart_suspended() {
        let mut tcb = TaskControlBlock::EMPTY;
        tcb.init(body, 1, Autostart::Suspended, body);
        assert_eq!(tcb.state(), TaskState::Suspended);
        assert!(!tcb.is_eligible());
    }

    #[test]
    fn test_eligibility() {
        assert!(TaskState::Ready.is_eligible());
        assert!(TaskState::Running.is_eligible());
        assert!(!TaskState::Waiting.is_eligible());
        assert!(!TaskState::Suspended.is_eligible());
    }

    #[test]
    fn test_task_id_display() {
        use std::string::ToString;

        assert_eq!(TaskId::new(7).to_string(), "T007");
        assert_eq!(TaskId::invalid().to_string(), "T---");
        assert_eq!(TaskId::invalid().index(), None);
        assert_eq!(TaskId::new(3).index(), Some(3));
    }
}
