//! # Pulsar: preemptive priority microkernel
//!
//! A small fixed-priority preemptive scheduler for single-core ARM Cortex-M
//! microcontrollers.
//!
//! ## Overview
//!
//! Tasks are created up front with a fixed priority and run forever. At any
//! moment the CPU belongs to the highest-priority task that is Ready; ties go
//! to the task created first. A periodic SysTick drives the clock and wakes
//! delayed tasks; the switch itself is deferred to PendSV so it never
//! interrupts other handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   create_task · start_scheduler · delay · suspend_task │
//! │   activate_task · get_clock                            │
//! ├──────────────┬──────────────────┬──────────────────────┤
//! │  Scheduler   │  Tick Manager    │  Switch Engine       │
//! │  scheduler.rs│  tick.rs         │  switch.rs           │
//! │  ─ dispatch()│  ─ tick()        │  ─ request_switch()  │
//! │              │                  │  ─ complete_switch() │
//! ├──────────────┴──────────────────┴──────────────────────┤
//! │        Task Model (task.rs) · Stacks (context.rs)      │
//! ├────────────────────────────────────────────────────────┤
//! │   Port trait (port.rs)  ◄──  arch/cortex_m.rs          │
//! │                              SysTick · PendSV          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above the port is plain Rust over a [`Scheduler`] value and
//! runs on the host under `cargo test`. The [`kernel`] module and the
//! architecture layer only exist on bare-metal Arm targets.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS + 1]`, the extra
//!   slot holds the idle task
//! - **Per-task stack**: `STACK_SIZE` bytes inline in the TCB, painted with a
//!   fill pattern for overflow and high-water-mark checks
//! - **Critical sections**: `cortex_m::interrupt::free()` around every access
//!   to the shared table
//!
//! ## Cargo Features
//!
//! - `heartbeat` (default): toggle a liveness output every
//!   [`config::HEARTBEAT_PERIOD_US`]
//! - `defmt`: kernel logging through `defmt`
//! - `rt`: build the demo firmware

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod context;
pub mod error;
pub mod port;
pub mod scheduler;
pub mod switch;
pub mod task;
pub mod tick;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arch;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod kernel;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod sync;

pub use error::KernelError;
pub use port::{Port, SwitchKind};
pub use scheduler::{Scheduler, TaskSelection};
pub use task::{Autostart, TaskEntry, TaskId, TaskState, Tick};
