//! # Kernel
//!
//! The firmware-facing API. Owns the one [`Scheduler`] instance and the
//! Cortex-M port, and exposes the task calls as free functions so task
//! bodies can use them without passing anything around.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::create_task()      ← Register tasks (×N)
//!         └─► kernel::start_scheduler()  ← No return
//!               ├─► Set SysTick/PendSV priorities
//!               ├─► Create the idle task
//!               ├─► Pend the first switch, arm SysTick
//!               └─► PendSV moves the CPU onto the first task's stack
//! ```

use crate::arch::cortex_m::{self as port, CortexMPort};
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::sync::Shared;
use crate::task::{Autostart, TaskEntry, TaskId, Tick};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

struct Kernel {
    scheduler: Scheduler,
    /// Present once the scheduler has started.
    port: Option<CortexMPort>,
    heartbeat: Option<fn(bool)>,
}

impl Kernel {
    const fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            port: None,
            heartbeat: None,
        }
    }

    fn started(&mut self) -> Result<(&mut Scheduler, &mut CortexMPort), KernelError> {
        match self.port.as_mut() {
            Some(port) => Ok((&mut self.scheduler, port)),
            None => Err(KernelError::NotStarted),
        }
    }
}

static KERNEL: Shared<Kernel> = Shared::new(Kernel::new());

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Register a task. Call before [`start_scheduler`].
///
/// # Returns
/// - `Ok(task_id)`: the handle to pass to [`activate_task`]
/// - `Err(KernelError::CapacityExceeded)`: `MAX_TASKS` already exist
///
/// # Example
/// ```ignore
/// let blinker = kernel::create_task(blink, 2, Autostart::Ready)?;
/// ```
pub fn create_task(entry: TaskEntry, priority: u8, autostart: Autostart) -> Result<TaskId, KernelError> {
    KERNEL.lock(|kernel| kernel.scheduler.create_task(entry, priority, autostart))
}

/// Drive a liveness output from the tick. Takes effect at start.
pub fn set_heartbeat_output(drive: fn(bool)) {
    KERNEL.lock(|kernel| kernel.heartbeat = Some(drive));
}

/// Start the scheduler. **Does not return.**
///
/// Adds the idle task, arms SysTick and hands the CPU to the
/// highest-priority task. Call from `main`, after every task is created.
pub fn start_scheduler(mut core_peripherals: cortex_m::Peripherals) -> ! {
    port::set_interrupt_priorities(&mut core_peripherals.SCB);

    KERNEL.lock(|kernel| {
        let port = kernel.port.insert(CortexMPort::new(core_peripherals.SYST, kernel.heartbeat));
        kernel.scheduler.start(port);
    });

    // PendSV takes over as soon as the lock is released
    loop {
        cortex_m::asm::wfi();
    }
}

/// Block the calling task for at least `ticks` timer periods.
///
/// `delay(0)` yields to any task of higher priority.
pub fn delay(ticks: Tick) {
    let result = KERNEL.lock(|kernel| {
        let (scheduler, port) = kernel.started()?;
        scheduler.delay(port, ticks)
    });
    if let Err(err) = result {
        error!("delay: {}", err);
    }
    cortex_m::asm::isb();
}

/// Park the calling task until another task activates it.
pub fn suspend_task() {
    let result = KERNEL.lock(|kernel| {
        let (scheduler, port) = kernel.started()?;
        scheduler.suspend_task(port)
    });
    if let Err(err) = result {
        error!("suspend_task: {}", err);
    }
    cortex_m::asm::isb();
}

/// Make a suspended task Ready. If it outranks the caller, the caller is
/// preempted before this returns.
pub fn activate_task(task_id: TaskId) -> Result<(), KernelError> {
    let result = KERNEL.lock(|kernel| {
        let (scheduler, port) = kernel.started()?;
        scheduler.activate_task(port, task_id)
    });
    cortex_m::asm::isb();
    result
}

/// Timer periods since the scheduler started.
pub fn get_clock() -> Tick {
    KERNEL.lock(|kernel| kernel.scheduler.get_clock())
}

/// The calling task's handle.
pub fn current_task() -> TaskId {
    KERNEL.lock(|kernel| kernel.scheduler.current_task())
}

/// Bytes of `task_id`'s stack never touched so far.
pub fn stack_high_water_mark(task_id: TaskId) -> Option<usize> {
    KERNEL.lock(|kernel| kernel.scheduler.stack_high_water_mark(task_id))
}

// ---------------------------------------------------------------------------
// Exception entry points
// ---------------------------------------------------------------------------

pub(crate) fn on_tick() {
    KERNEL.lock(|kernel| {
        if let Ok((scheduler, port)) = kernel.started() {
            scheduler.tick(port);
        }
    });
}

/// Runs inside PendSV. There is no task to return an error to, so a failed
/// switch halts the system.
pub(crate) fn on_deferred_switch(outgoing_sp: *mut u32) -> *mut u32 {
    let result = KERNEL.lock(|kernel| {
        let (scheduler, port) = kernel.started()?;
        scheduler.complete_switch(port, outgoing_sp)
    });
    match result {
        Ok(sp) => sp,
        Err(err) => {
            error!("context switch failed: {}", err);
            panic!("context switch failed: {}", err);
        }
    }
}
