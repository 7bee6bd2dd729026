//! # Pulsar Configuration
//!
//! Compile-time constants governing the scheduler. All limits are fixed at
//! compile time, there is no dynamic allocation.

/// Maximum number of application tasks. The task table holds one extra slot
/// for the idle task. Each task carries `STACK_SIZE` bytes of RAM inline.
pub const MAX_TASKS: usize = 8;

/// Per-task stack size in bytes. Must hold the deepest call chain plus the
/// hardware exception frame (32 bytes) and the software-saved context
/// (36 bytes for R4–R11 and EXC_RETURN).
pub const STACK_SIZE: usize = 1024;

/// Scheduler tick period in microseconds.
pub const TICK_PERIOD_US: u32 = 1000;

/// Core clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Period of the liveness signal. The output toggles once per period.
pub const HEARTBEAT_PERIOD_US: u32 = 1_000_000;

/// SysTick priority. One level above PendSV so a tick can preempt a switch
/// in progress but never the other way round.
pub const TICK_PRIORITY: u8 = 0xF0;

/// PendSV priority: lowest in the system.
pub const SWITCH_PRIORITY: u8 = 0xFF;

/// Priority given to the idle task.
pub const IDLE_PRIORITY: u8 = 0;

/// Number of 32-bit words in each task stack.
pub const STACK_WORDS: usize = STACK_SIZE / 4;

const _: () = assert!(STACK_SIZE % 8 == 0, "stacks must keep 8-byte alignment");
