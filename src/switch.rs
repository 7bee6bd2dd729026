//! # Context Switch Engine
//!
//! A switch runs in two phases:
//!
//! 1. **Request** ([`Scheduler::request_switch`]), in whichever context
//!    dispatched: the outgoing task drops back to Ready, `current_task`
//!    moves to the selection and the port pends the deferred interrupt.
//! 2. **Restore** ([`Scheduler::complete_switch`]), from that interrupt at
//!    the lowest exception priority: the outgoing task's freshly stacked
//!    context is recorded and the incoming task's saved stack pointer is
//!    handed back to the assembly shim.
//!
//! Several requests can land before the interrupt runs (a tick right after
//! an `activate_task`, say). The engine keeps the task whose registers are
//! actually live on the CPU as the outgoing one and just retargets the
//! incoming side.
//!
//! The very first switch has no outgoing context at all: it leaves the boot
//! stack for good.

use crate::context::TaskStack;
use crate::error::KernelError;
use crate::port::{Port, SwitchKind};
use crate::scheduler::Scheduler;
use crate::task::{TaskId, TaskState};

/// Progress of the current switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchState {
    /// Nothing requested.
    Idle,
    /// Deferred interrupt pended, not yet serviced.
    Pending {
        /// Task whose registers the handler is about to stack. `None` on the
        /// first switch.
        outgoing: Option<TaskId>,
        /// Task to resume.
        incoming: TaskId,
    },
}

pub struct SwitchEngine {
    state: SwitchState,
    /// Set until the first switch has been requested.
    first_run: bool,
}

impl SwitchEngine {
    pub const fn new() -> Self {
        Self {
            state: SwitchState::Idle,
            first_run: true,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, SwitchState::Pending { .. })
    }

    /// Whether no task has been switched in yet.
    pub fn is_first_run(&self) -> bool {
        self.first_run
    }
}

impl Default for SwitchEngine {
    fn default() -> Self {
        SwitchEngine::new()
    }
}

impl Scheduler {
    /// Request phase. `next_task` must already hold the selection.
    pub(crate) fn request_switch<P: Port>(&mut self, port: &mut P, kind: SwitchKind) {
        let outgoing = self.current_task;
        let incoming = self.next_task;

        if let Some(idx) = outgoing.index() {
            if self.tasks[idx].state == TaskState::Running {
                self.tasks[idx].state = TaskState::Ready;
            }
        }

        let save = if self.switch.first_run { None } else { Some(outgoing) };
        self.switch.first_run = false;

        if let Some(idx) = incoming.index() {
            self.tasks[idx].state = TaskState::Running;
        }
        self.current_task = incoming;

        self.switch.state = match self.switch.state {
            SwitchState::Idle => SwitchState::Pending { outgoing: save, incoming },
            // The registers on the CPU still belong to the first outgoing task
            SwitchState::Pending { outgoing, .. } => SwitchState::Pending { outgoing, incoming },
        };

        port.request_deferred_switch(kind);
    }

    /// Restore phase, called from the deferred switch interrupt.
    ///
    /// `outgoing_sp` points at the software frame the handler just stacked
    /// for the outgoing task, or is null when there was nothing to stack.
    /// Returns the stack pointer to resume the incoming task from.
    ///
    /// # Errors
    /// - [`KernelError::StackOverflow`] if the outgoing frame is not inside
    ///   its task's stack or the guard words were overwritten
    /// - [`KernelError::NotStarted`] if no task was ever selected
    pub fn complete_switch<P: Port>(
        &mut self,
        port: &mut P,
        outgoing_sp: *mut u32,
    ) -> Result<*mut u32, KernelError> {
        port.clear_deferred_switch();

        let (outgoing, incoming) = match core::mem::replace(&mut self.switch.state, SwitchState::Idle) {
            SwitchState::Pending { outgoing, incoming } => (outgoing, incoming),
            // Spurious: put the running task straight back
            SwitchState::Idle => {
                let current = self.current_task;
                (current.index().map(|_| current), current)
            }
        };

        if let Some(task_id) = outgoing {
            if outgoing_sp.is_null() {
                warn!("no context stacked for {}", task_id);
            } else {
                self.save_context(task_id, outgoing_sp)?;
            }
        }

        let idx = incoming.index().ok_or(KernelError::NotStarted)?;
        let task = &mut self.tasks[idx];
        trace!("resume {} at offset {=usize}", incoming, task.saved_offset);
        Ok(task.stack.pointer_at(task.saved_offset))
    }

    fn save_context(&mut self, task_id: TaskId, sp: *mut u32) -> Result<(), KernelError> {
        let idx = self.checked_index(task_id)?;
        let task = &mut self.tasks[idx];

        let offset = task
            .stack
            .offset_of(sp)
            .filter(|&offset| TaskStack::holds_frame_at(offset))
            .ok_or(KernelError::StackOverflow(task_id))?;
        if !task.stack.guard_intact() {
            return Err(KernelError::StackOverflow(task_id));
        }

        task.saved_offset = offset;
        Ok(())
    }

    /// Where the task's context currently sits, as the switch handler sees it.
    #[cfg(test)]
    pub(crate) fn context_pointer(&mut self, task_id: TaskId) -> *mut u32 {
        let task = &mut self.tasks[task_id.index().unwrap()];
        task.stack.pointer_at(task.saved_offset)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_WORDS;
    use crate::context::{ContextFrame, FRAME_WORDS, GUARD_WORDS};
    use crate::port::mock::MockPort;
    use crate::scheduler::tests::{body, boot, run_deferred_switch};
    use crate::task::Autostart;

    fn two_tasks() -> (Scheduler, MockPort, TaskId, TaskId) {
        let mut sched = Scheduler::new();
        let port = MockPort::new();
        let high = sched.create_task(body, 2, Autostart::Ready).unwrap();
        let low = sched.create_task(body, 1, Autostart::Ready).unwrap();
        (sched, port, high, low)
    }

    #[test]
    fn test_first_switch_has_no_outgoing_context() {
        let (mut sched, mut port, high, _) = two_tasks();
        assert!(sched.switch.is_first_run());

        sched.start(&mut port);
        assert!(!sched.switch.is_first_run());
        assert_eq!(
            sched.switch.state(),
            SwitchState::Pending { outgoing: None, incoming: high }
        );

        let sp = sched.complete_switch(&mut port, core::ptr::null_mut()).unwrap();
        assert!(!sched.switch.is_pending());
        assert!(!port.pending);
        assert_eq!(port.clears, 1);

        // The handler resumes from the bootstrap frame
        let expected = sched.context_pointer(high);
        assert_eq!(sp, expected);
        let task = sched.task(high).unwrap();
        assert_eq!(task.saved_offset(), STACK_WORDS - FRAME_WORDS);
        assert_eq!(
            task.stack().frame_at(task.saved_offset()).map(|f| f.pc),
            Some(ContextFrame::bootstrap(body, body).pc)
        );
    }

    #[test]
    fn test_outgoing_context_is_recorded() {
        let (mut sched, mut port, high, low) = two_tasks();
        boot(&mut sched, &mut port);

        // The task ran deeper into its stack before yielding
        let saved = STACK_WORDS - FRAME_WORDS - 40;
        sched.delay(&mut port, 1).unwrap();
        let sp = sched.tasks[0].stack.pointer_at(saved);
        let resumed = sched.complete_switch(&mut port, sp).unwrap();

        assert_eq!(sched.task(high).unwrap().saved_offset(), saved);
        assert_eq!(resumed, sched.context_pointer(low));
        assert_eq!(sched.current_task(), low);
    }

    #[test]
    fn test_repeated_requests_keep_first_outgoing() {
        let mut sched = Scheduler::new();
        let mut port = MockPort::new();
        let a = sched.create_task(body, 1, Autostart::Ready).unwrap();
        let b = sched.create_task(body, 2, Autostart::Suspended).unwrap();
        let c = sched.create_task(body, 3, Autostart::Suspended).unwrap();
        boot(&mut sched, &mut port);
        assert_eq!(sched.current_task(), a);

        sched.activate_task(&mut port, b).unwrap();
        sched.activate_task(&mut port, c).unwrap();

        assert_eq!(
            sched.switch.state(),
            SwitchState::Pending { outgoing: Some(a), incoming: c }
        );
        assert_eq!(sched.task_state(a), Some(TaskState::Ready));
        assert_eq!(sched.task_state(b), Some(TaskState::Ready));
        assert_eq!(sched.task_state(c), Some(TaskState::Running));

        run_deferred_switch(&mut sched, &mut port);
        assert_eq!(sched.current_task(), c);
        assert!(!sched.switch.is_pending());
    }

    #[test]
    fn test_switch_back_before_restore() {
        let (mut sched, mut port, high, _) = two_tasks();
        boot(&mut sched, &mut port);

        // Away to the low task and straight back before the handler runs
        sched.suspend_task(&mut port).unwrap();
        sched.activate_task(&mut port, high).unwrap();
        assert_eq!(
            sched.switch.state(),
            SwitchState::Pending { outgoing: Some(high), incoming: high }
        );

        let expected = sched.context_pointer(high);
        let sp = sched.complete_switch(&mut port, expected).unwrap();
        assert_eq!(sp, expected);
        assert_eq!(sched.current_task(), high);
    }

    #[test]
    fn test_overflowed_stack_is_reported() {
        let (mut sched, mut port, high, _) = two_tasks();
        boot(&mut sched, &mut port);

        sched.delay(&mut port, 1).unwrap();
        let sp = sched.tasks[0].stack.pointer_at(GUARD_WORDS - 1);
        assert_eq!(
            sched.complete_switch(&mut port, sp),
            Err(KernelError::StackOverflow(high))
        );
    }

    #[test]
    fn test_clobbered_guard_is_reported() {
        let (mut sched, mut port, high, _) = two_tasks();
        boot(&mut sched, &mut port);

        sched.tasks[0].stack.words_mut()[0] = 0;
        sched.delay(&mut port, 1).unwrap();
        let sp = sched.context_pointer(high);
        assert_eq!(
            sched.complete_switch(&mut port, sp),
            Err(KernelError::StackOverflow(high))
        );
    }

    #[test]
    fn test_foreign_pointer_is_reported() {
        let (mut sched, mut port, high, _) = two_tasks();
        boot(&mut sched, &mut port);

        sched.delay(&mut port, 1).unwrap();
        let sp = sched.tasks[1].stack.pointer_at(100);
        assert_eq!(
            sched.complete_switch(&mut port, sp),
            Err(KernelError::StackOverflow(high))
        );
    }

    #[test]
    fn test_spurious_interrupt_resumes_current_task() {
        let (mut sched, mut port, high, _) = two_tasks();
        boot(&mut sched, &mut port);

        let sp = sched.tasks[0].stack.pointer_at(STACK_WORDS - FRAME_WORDS - 8);
        assert_eq!(sched.complete_switch(&mut port, sp), Ok(sp));
        assert_eq!(sched.current_task(), high);
    }

    #[test]
    fn test_spurious_interrupt_before_start() {
        let (mut sched, mut port, _, _) = two_tasks();
        assert_eq!(
            sched.complete_switch(&mut port, core::ptr::null_mut()),
            Err(KernelError::NotStarted)
        );
    }

    #[test]
    fn test_request_kind_reaches_port() {
        let (mut sched, mut port, _, _) = two_tasks();
        boot(&mut sched, &mut port);

        sched.delay(&mut port, 1).unwrap();
        run_deferred_switch(&mut sched, &mut port);
        sched.tick(&mut port);

        assert_eq!(
            port.requests,
            [SwitchKind::FromTask, SwitchKind::FromTask, SwitchKind::FromIsr]
        );
    }
}
