//! # Pulsar Example Firmware
//!
//! Three tasks exercising the kernel API:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `sampler_task` | 3 | Wakes every 10 ticks, every 50th sample wakes the reporter |
//! | `reporter_task` | 2 | Starts suspended, does a burst of work per activation |
//! | `background_task` | 1 | Never blocks; runs whenever the others wait |
//!
//! The idle task added by the kernel never gets the CPU here, since the
//! background task is always Ready.

#![no_std]
#![no_main]

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::interrupt::{self, Mutex};
use cortex_m_rt::entry;
use panic_halt as _;

use pulsar::kernel;
use pulsar::{Autostart, TaskId};

/// Reporter's handle, published before the scheduler starts.
static REPORTER: Mutex<Cell<TaskId>> = Mutex::new(Cell::new(TaskId::invalid()));

static SAMPLES: AtomicU32 = AtomicU32::new(0);
static REPORTS: AtomicU32 = AtomicU32::new(0);
static BACKGROUND_SPINS: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// **Sampler** (priority 3)
///
/// Periodic: does a little work, then sleeps 10 ticks.
extern "C" fn sampler_task() -> ! {
    loop {
        let n = SAMPLES.fetch_add(1, Ordering::Relaxed) + 1;

        if n % 50 == 0 {
            let reporter = interrupt::free(|cs| REPORTER.borrow(cs).get());
            // The reporter never delays, so this only fails before it is published
            let _ = kernel::activate_task(reporter);
        }

        kernel::delay(10);
    }
}

/// **Reporter** (priority 2)
///
/// Sporadic: runs once per activation, then parks itself again.
extern "C" fn reporter_task() -> ! {
    loop {
        let mut checksum: u32 = 0;
        for i in 0..2000u32 {
            checksum = checksum.wrapping_add(i ^ SAMPLES.load(Ordering::Relaxed));
        }
        REPORTS.fetch_add(1, Ordering::Relaxed);
        core::hint::black_box(checksum);

        kernel::suspend_task();
    }
}

/// **Background** (priority 1)
///
/// CPU-bound; only ever preempted.
extern "C" fn background_task() -> ! {
    loop {
        BACKGROUND_SPINS.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::create_task(sampler_task, 3, Autostart::Ready).unwrap();
    let reporter = kernel::create_task(reporter_task, 2, Autostart::Suspended).unwrap();
    kernel::create_task(background_task, 1, Autostart::Ready).unwrap();

    interrupt::free(|cs| REPORTER.borrow(cs).set(reporter));

    kernel::start_scheduler(cp)
}
