//! # Scheduler
//!
//! The task table and the dispatcher, plus the task-control API in its
//! owned-object form. The firmware keeps a single [`Scheduler`] inside
//! [`crate::kernel`]; tests build their own and drive it through a mock port.
//!
//! ## Scheduling Algorithm
//!
//! Strict fixed priority. Every dispatch scans the table in ascending index
//! and picks the first task with the highest priority among those Ready or
//! Running, so equal priorities always resolve to the lowest index. When the
//! pick differs from the running task, the context switch engine
//! ([`crate::switch`]) takes over.
//!
//! The scan is O(n) per call; the table is small and fixed.

use crate::config::{IDLE_PRIORITY, MAX_TASKS, TICK_PERIOD_US};
use crate::error::KernelError;
use crate::port::{Port, SwitchKind};
use crate::switch::SwitchEngine;
#[cfg(feature = "heartbeat")]
use crate::tick::Heartbeat;
use crate::task::{Autostart, TaskControlBlock, TaskEntry, TaskId, TaskState, Tick};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The task table: all TCBs, the global tick and the current/next task.
pub struct Scheduler {
    /// Fixed TCB arena. The slot after the last application task is
    /// reserved for the idle task.
    pub(crate) tasks: [TaskControlBlock; MAX_TASKS + 1],

    /// Number of registered tasks, idle task included once started.
    pub(crate) task_count: usize,

    /// Task currently owning the CPU; invalid until the first dispatch.
    pub(crate) current_task: TaskId,

    /// Task most recently selected by the dispatcher.
    pub(crate) next_task: TaskId,

    /// Timer periods since start.
    pub(crate) global_tick: Tick,

    pub(crate) idle_task: TaskId,

    pub(crate) switch: SwitchEngine,

    #[cfg(feature = "heartbeat")]
    pub(crate) heartbeat: Heartbeat,
}

/// Describes which task the dispatcher picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskSelection {
    /// A different task won - a switch was requested
    NewTask(TaskId),
    /// The running task is still the best choice
    CurrentTask,
    /// Nothing is eligible to run
    NoTasks,
}

impl Scheduler {
    /// Create an empty task table.
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS + 1],
            task_count: 0,
            current_task: TaskId::invalid(),
            next_task: TaskId::invalid(),
            global_tick: 0,
            idle_task: TaskId::invalid(),
            switch: SwitchEngine::new(),
            #[cfg(feature = "heartbeat")]
            heartbeat: Heartbeat::new(),
        }
    }

    /// Register a new task.
    ///
    /// Only valid before [`Scheduler::start`]. The task starts Ready, or
    /// Suspended if `autostart` asks for it.
    ///
    /// # Returns
    /// - `Ok(task_id)`: the handle of the new task
    /// - `Err(KernelError::CapacityExceeded)`: `MAX_TASKS` already exist;
    ///   nothing changed
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        priority: u8,
        autostart: Autostart,
    ) -> Result<TaskId, KernelError> {
        if self.task_count >= MAX_TASKS {
            warn!("task table full ({=usize} tasks)", self.task_count);
            return Err(KernelError::CapacityExceeded);
        }
        Ok(self.register(entry, priority, autostart))
    }

    fn register(&mut self, entry: TaskEntry, priority: u8, autostart: Autostart) -> TaskId {
        let id = TaskId::new(self.task_count);
        self.tasks[self.task_count].init(entry, priority, autostart, task_exit);
        self.task_count += 1;
        debug!("created {} at priority {=u8}", id, priority);
        id
    }

    /// Start scheduling.
    ///
    /// Adds the idle task, requests the switch into the highest-priority
    /// task and arms the periodic timer. The switch itself happens when the
    /// port's deferred interrupt runs [`Scheduler::complete_switch`].
    ///
    /// Call once, after all tasks are created.
    pub fn start<P: Port>(&mut self, port: &mut P) {
        if self.idle_task.is_invalid() {
            self.idle_task = self.register(idle_task, IDLE_PRIORITY, Autostart::Ready);
        }
        self.global_tick = 0;
        info!("starting with {=usize} tasks", self.task_count);
        self.dispatch(port, SwitchKind::FromTask);
        port.arm_periodic_timer(TICK_PERIOD_US);
    }

    /// Pick the task that should run and request a switch if it changed.
    pub fn dispatch<P: Port>(&mut self, port: &mut P, kind: SwitchKind) -> TaskSelection {
        let selection = self.select();
        match selection {
            TaskSelection::NewTask(task_id) => {
                trace!("dispatch -> {}", task_id);
                self.next_task = task_id;
                self.request_switch(port, kind);
            }
            TaskSelection::CurrentTask => {}
            TaskSelection::NoTasks => {
                warn!("no task eligible to run");
            }
        }
        selection
    }

    /// The priority scan. `>` keeps the first of equal priorities.
    fn select(&self) -> TaskSelection {
        let mut best: Option<(usize, u8)> = None;
        for (idx, task) in self.registered().iter().enumerate() {
            if !task.is_eligible() {
                continue;
            }
            match best {
                Some((_, priority)) if task.priority <= priority => {}
                _ => best = Some((idx, task.priority)),
            }
        }

        match best {
            None => TaskSelection::NoTasks,
            Some((idx, _)) if TaskId::new(idx) == self.current_task => TaskSelection::CurrentTask,
            Some((idx, _)) => TaskSelection::NewTask(TaskId::new(idx)),
        }
    }

    // -----------------------------------------------------------------------
    // Task-control API
    // -----------------------------------------------------------------------

    /// Timer periods elapsed since start.
    pub fn get_clock(&self) -> Tick {
        self.global_tick
    }

    /// Put the running task into a timed wait of `ticks` periods and give up
    /// the CPU.
    ///
    /// The task becomes Ready no earlier than `ticks` timer periods later and
    /// runs again once it is the highest-priority eligible task. `delay(0)`
    /// only re-runs the dispatcher.
    pub fn delay<P: Port>(&mut self, port: &mut P, ticks: Tick) -> Result<(), KernelError> {
        let idx = self.current_index()?;
        if ticks > 0 {
            let task = &mut self.tasks[idx];
            task.state = TaskState::Waiting;
            task.local_tick = ticks;
            trace!("{} waits {=u32} ticks", self.current_task, ticks);
        }
        self.dispatch(port, SwitchKind::FromTask);
        Ok(())
    }

    /// Park the running task until another task activates it.
    pub fn suspend_task<P: Port>(&mut self, port: &mut P) -> Result<(), KernelError> {
        let idx = self.current_index()?;
        self.tasks[idx].state = TaskState::Suspended;
        trace!("{} suspended", self.current_task);
        self.dispatch(port, SwitchKind::FromTask);
        Ok(())
    }

    /// Make a suspended task Ready again and re-run the dispatcher.
    ///
    /// Activating a Ready task just re-dispatches; activating the running
    /// task does nothing. A Waiting task is refused so its delay is not cut
    /// short.
    pub fn activate_task<P: Port>(&mut self, port: &mut P, task_id: TaskId) -> Result<(), KernelError> {
        let idx = self.checked_index(task_id)?;
        match self.tasks[idx].state {
            TaskState::Waiting => Err(KernelError::TaskWaiting(task_id)),
            TaskState::Running => Ok(()),
            TaskState::Ready | TaskState::Suspended => {
                self.tasks[idx].state = TaskState::Ready;
                trace!("{} activated", task_id);
                self.dispatch(port, SwitchKind::FromTask);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The running task, or the invalid ID before start.
    pub fn current_task(&self) -> TaskId {
        self.current_task
    }

    /// The idle task, or the invalid ID before start.
    pub fn idle_task(&self) -> TaskId {
        self.idle_task
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn task(&self, task_id: TaskId) -> Option<&TaskControlBlock> {
        self.registered().get(task_id.index()?)
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.task(task_id).map(TaskControlBlock::state)
    }

    /// Bytes of the task's stack that have never been used.
    pub fn stack_high_water_mark(&self, task_id: TaskId) -> Option<usize> {
        self.task(task_id).map(|task| task.stack().high_water_mark())
    }

    fn registered(&self) -> &[TaskControlBlock] {
        &self.tasks[..self.task_count]
    }

    fn current_index(&self) -> Result<usize, KernelError> {
        self.current_task.index().ok_or(KernelError::NotStarted)
    }

    pub(crate) fn checked_index(&self, task_id: TaskId) -> Result<usize, KernelError> {
        match task_id.index() {
            Some(idx) if idx < self.task_count => Ok(idx),
            _ => Err(KernelError::InvalidTask(task_id)),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

// ---------------------------------------------------------------------------
// Built-in task bodies
// ---------------------------------------------------------------------------

/// Lowest-priority task, always Ready, so the dispatcher always has a pick.
extern "C" fn idle_task() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Where a task lands if its body ever returns.
extern "C" fn task_exit() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
