//! # Tick Manager
//!
//! Runs once per timer period from the tick interrupt: advances the global
//! clock, counts down timed waits, toggles the heartbeat and re-dispatches.

use crate::port::{Port, SwitchKind};
use crate::scheduler::{Scheduler, TaskSelection};
use crate::task::{TaskId, TaskState};

impl Scheduler {
    /// Handle one elapsed timer period.
    ///
    /// A task whose countdown hits zero here is Ready for this same dispatch.
    pub fn tick<P: Port>(&mut self, port: &mut P) -> TaskSelection {
        self.global_tick = self.global_tick.wrapping_add(1);

        #[cfg(feature = "heartbeat")]
        if let Some(level) = self.heartbeat.advance() {
            port.set_heartbeat(level);
        }

        self.wake_expired();
        let selection = self.dispatch(port, SwitchKind::FromIsr);
        port.reload_timer();
        selection
    }

    fn wake_expired(&mut self) {
        for (idx, task) in self.tasks[..self.task_count].iter_mut().enumerate() {
            if task.state != TaskState::Waiting {
                continue;
            }
            task.local_tick = task.local_tick.saturating_sub(1);
            if task.local_tick == 0 {
                task.state = TaskState::Ready;
                trace!("{} woke at tick {=u32}", TaskId::new(idx), self.global_tick);
            }
        }
    }
}

/// Liveness blinker: flips its level every `HEARTBEAT_PERIOD_US`.
#[cfg(feature = "heartbeat")]
pub struct Heartbeat {
    count: u32,
    level: bool,
}

#[cfg(feature = "heartbeat")]
impl Heartbeat {
    /// Ticks between two toggles.
    pub const TICKS_PER_TOGGLE: u32 = {
        let ticks = crate::config::HEARTBEAT_PERIOD_US / crate::config::TICK_PERIOD_US;
        if ticks == 0 {
            1
        } else {
            ticks
        }
    };

    /// The pin starts high, so the first toggle drives it low.
    pub const fn new() -> Self {
        Self { count: 0, level: true }
    }

    /// Count one tick; returns the new level when it is time to toggle.
    pub fn advance(&mut self) -> Option<bool> {
        if self.count + 1 >= Self::TICKS_PER_TOGGLE {
            self.count = 0;
            self.level = !self.level;
            Some(self.level)
        } else {
            self.count += 1;
            None
        }
    }
}

#[cfg(feature = "heartbeat")]
impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::scheduler::tests::{body, boot, run_deferred_switch, tick_and_switch};
    use crate::task::Autostart;

    #[test]
    fn test_countdown_and_wake() {
        let mut sched = Scheduler::new();
        let mut port = MockPort::new();
        let sleeper = sched.create_task(body, 2, Autostart::Ready).unwrap();
        sched.create_task(body, 1, Autostart::Ready).unwrap();
        boot(&mut sched, &mut port);

        sched.delay(&mut port, 3).unwrap();
        run_deferred_switch(&mut sched, &mut port);

        tick_and_switch(&mut sched, &mut port);
        assert_eq!(sched.task(sleeper).unwrap().local_tick(), 2);
        tick_and_switch(&mut sched, &mut port);
        assert_eq!(sched.task(sleeper).unwrap().local_tick(), 1);
        assert_eq!(sched.task_state(sleeper), Some(TaskState::Waiting));

        assert_eq!(tick_and_switch(&mut sched, &mut port), TaskSelection::NewTask(sleeper));
        assert_eq!(sched.task(sleeper).unwrap().local_tick(), 0);
    }

    #[test]
    fn test_last_registered_task_is_counted_down() {
        // The idle task sits in the last slot; a waiter right before it must
        // still be scanned
        let mut sched = Scheduler::new();
        let mut port = MockPort::new();
        sched.create_task(body, 1, Autostart::Suspended).unwrap();
        let last = sched.create_task(body, 2, Autostart::Ready).unwrap();
        boot(&mut sched, &mut port);

        sched.delay(&mut port, 1).unwrap();
        run_deferred_switch(&mut sched, &mut port);
        tick_and_switch(&mut sched, &mut port);
        assert_eq!(sched.current_task(), last);
    }

    #[test]
    fn test_clock_wraps() {
        let mut sched = Scheduler::new();
        let mut port = MockPort::new();
        sched.create_task(body, 1, Autostart::Ready).unwrap();
        boot(&mut sched, &mut port);

        sched.global_tick = u32::MAX;
        sched.tick(&mut port);
        assert_eq!(sched.get_clock(), 0);
    }

    #[test]
    fn test_timer_reloaded_every_tick() {
        let mut sched = Scheduler::new();
        let mut port = MockPort::new();
        sched.create_task(body, 1, Autostart::Ready).unwrap();
        boot(&mut sched, &mut port);

        for _ in 0..7 {
            sched.tick(&mut port);
        }
        assert_eq!(port.reloads, 7);
    }

    #[cfg(feature = "heartbeat")]
    #[test]
    fn test_heartbeat_toggles_each_period() {
        let mut heartbeat = Heartbeat::new();
        let period = Heartbeat::TICKS_PER_TOGGLE;

        for _ in 1..period {
            assert_eq!(heartbeat.advance(), None);
        }
        assert_eq!(heartbeat.advance(), Some(false));
        for _ in 1..period {
            assert_eq!(heartbeat.advance(), None);
        }
        assert_eq!(heartbeat.advance(), Some(true));
    }

    #[cfg(feature = "heartbeat")]
    #[test]
    fn test_heartbeat_reaches_port() {
        let mut sched = Scheduler::new();
        let mut port = MockPort::new();
        sched.create_task(body, 1, Autostart::Ready).unwrap();
        boot(&mut sched, &mut port);

        for _ in 0..Heartbeat::TICKS_PER_TOGGLE * 3 {
            sched.tick(&mut port);
        }
        assert_eq!(port.heartbeat, [false, true, false]);
    }
}
