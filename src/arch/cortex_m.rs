//! # Cortex-M Port Layer
//!
//! Hardware-specific code for Armv7-M and Armv7E-M (Thumb-2) cores:
//! SysTick as the tick source, PendSV as the deferred switch interrupt, and
//! the assembly half of the context switch.
//!
//! ## Context Switch Mechanism
//!
//! Tasks run in Thread mode on the process stack (PSP); the kernel and all
//! handlers use the main stack (MSP). On exception entry the core stacks
//! R0–R3, R12, LR, PC and xPSR onto the PSP. `PendSV` pushes R4–R11 and the
//! EXC_RETURN value below that, hands the resulting pointer to
//! [`crate::kernel`], and unstacks whatever pointer it gets back. The frame
//! layout is described in [`crate::context`].
//!
//! The first switch is taken from the boot code running on MSP. EXC_RETURN
//! bit 2 tells the handler there is no task context to save.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: [`TICK_PRIORITY`] (0xF0)
//! - PendSV: [`SWITCH_PRIORITY`] (0xFF), lowest, so a switch only happens
//!   once every other handler has finished

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::config::{SWITCH_PRIORITY, SYSTEM_CLOCK_HZ, TICK_PRIORITY};
use crate::port::{Port, SwitchKind};

/// Largest value the 24-bit SysTick reload register holds.
const SYST_RELOAD_MAX: u32 = 0x00FF_FFFF;

// ---------------------------------------------------------------------------
// Port implementation
// ---------------------------------------------------------------------------

/// SysTick and PendSV, owned by the kernel once the scheduler starts.
pub struct CortexMPort {
    syst: SYST,
    heartbeat: Option<fn(bool)>,
}

impl CortexMPort {
    /// Take ownership of the SysTick peripheral. `heartbeat` drives the
    /// board's liveness output, if it has one.
    pub fn new(syst: SYST, heartbeat: Option<fn(bool)>) -> Self {
        Self { syst, heartbeat }
    }
}

impl Port for CortexMPort {
    fn arm_periodic_timer(&mut self, period_us: u32) {
        let cycles = u64::from(SYSTEM_CLOCK_HZ) * u64::from(period_us) / 1_000_000;
        let reload = match u32::try_from(cycles.saturating_sub(1)) {
            Ok(reload) if reload <= SYST_RELOAD_MAX => reload,
            _ => {
                warn!("tick period {=u32}us too long for SysTick, clamping", period_us);
                SYST_RELOAD_MAX
            }
        };

        self.syst.set_reload(reload);
        self.syst.clear_current();
        self.syst.set_clock_source(SystClkSource::Core);
        self.syst.enable_interrupt();
        self.syst.enable_counter();
        debug!("SysTick armed, reload {=u32}", reload);
    }

    fn reload_timer(&mut self) {
        // SysTick reloads itself from RVR; reading COUNTFLAG acknowledges
        // the period that just ended
        let _ = self.syst.has_wrapped();
    }

    fn request_deferred_switch(&mut self, kind: SwitchKind) {
        SCB::set_pendsv();
        if kind == SwitchKind::FromTask {
            // PENDSVSET must land before the caller leaves its critical section
            cortex_m::asm::dsb();
        }
    }

    fn clear_deferred_switch(&mut self) {
        SCB::clear_pendsv();
    }

    fn set_heartbeat(&mut self, level: bool) {
        if let Some(drive) = self.heartbeat {
            drive(level);
        }
    }
}

/// Set SysTick and PendSV to their kernel priorities.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: runs before the scheduler starts, so no priority-based
    // critical section can be broken by the change
    unsafe {
        scb.set_priority(SystemHandler::SysTick, TICK_PRIORITY);
        scb.set_priority(SystemHandler::PendSV, SWITCH_PRIORITY);
    }
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// SysTick exception handler: scheduler tick entry point.
#[unsafe(no_mangle)]
extern "C" fn SysTick() {
    crate::kernel::on_tick();
}

/// Rust half of the context switch, called from `PendSV` with the outgoing
/// task's stacked context (or null on the first switch). Returns the stack
/// pointer to resume.
extern "C" fn switch_context(outgoing_sp: *mut u32) -> *mut u32 {
    crate::kernel::on_deferred_switch(outgoing_sp)
}

/// PendSV exception handler: performs the actual context switch.
///
/// ## Sequence
/// 1. If the interrupted code ran on PSP, push R4–R11 and EXC_RETURN onto it
/// 2. Call [`switch_context`] with the resulting pointer
/// 3. Pop R4–R11 and EXC_RETURN from the pointer it returns
/// 4. Load PSP and return through the restored EXC_RETURN
///
/// Naked: the compiler must not push anything or reuse registers that still
/// hold task state. Only R0–R3 and R12 are free here.
#[cfg(not(target_abi = "eabihf"))]
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(r#"
    mrs      r0, psp

    // EXC_RETURN bit 2 clear: we came from MSP, nothing to stack
    tst      lr, #4
    beq      1f

    stmdb    r0!, {{ r4 - r11, lr }}
    b        2f

    1:
    movs     r0, #0

    2:
    bl       {switch_context}

    ldmia    r0!, {{ r4 - r11, lr }}
    msr      psp, r0
    bx       lr
    "#,
    switch_context = sym switch_context,
    );
}

/// PendSV handler for cores with an FPU.
///
/// Same sequence as the integer-only handler, plus S16–S31 for tasks that
/// have an FP context (EXC_RETURN bit 4 clear). The core already stacked
/// S0–S15 and FPSCR, or reserved space for them.
#[cfg(target_abi = "eabihf")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(r#"
    // Workaround https://github.com/rust-lang/rust/issues/127269
    .fpu vfpv3

    mrs      r0, psp

    tst      lr, #4
    beq      1f

    tst      lr, #0x10
    it       eq
    vstmdbeq r0!, {{ s16 - s31 }}

    stmdb    r0!, {{ r4 - r11, lr }}
    b        2f

    1:
    movs     r0, #0

    2:
    bl       {switch_context}

    ldmia    r0!, {{ r4 - r11, lr }}

    tst      lr, #0x10
    it       eq
    vldmiaeq r0!, {{ s16 - s31 }}

    msr      psp, r0
    bx       lr
    "#,
    switch_context = sym switch_context,
    );
}
