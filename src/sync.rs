//! # Synchronization Primitives
//!
//! Interrupt-safe access to the kernel's shared state. Task-context API
//! calls, the SysTick handler and the Rust half of PendSV all go through
//! here, so the deferred switch never sees a half-updated task table.

use core::cell::RefCell;

use cortex_m::interrupt::{self, Mutex};

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are restored on exit; a PendSV pended inside the closure
/// fires right after.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}

/// A value shared between thread mode and exception handlers.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// # Panics
    /// On re-entry from inside `f`, which would alias the value.
    #[inline]
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(&mut self.inner.borrow(cs).borrow_mut()))
    }
}
