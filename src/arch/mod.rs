//! # Architecture Abstraction Layer
//!
//! Implementations of [`crate::port::Port`] for real hardware. Only built
//! for bare-metal Arm targets; host builds use the portable core alone.

pub mod cortex_m;
