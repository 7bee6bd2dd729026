//! # Port Interface
//!
//! The hardware services the scheduler core consumes. The Cortex-M
//! implementation lives in [`crate::arch`]; unit tests use a recording mock.

/// Where a context switch was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchKind {
    /// From the tick interrupt. The deferred switch tail-chains once the
    /// handler returns.
    FromIsr,
    /// From task context (delay, suspend, activate). The switch must take
    /// effect before the calling API function returns to the task.
    FromTask,
}

/// Hardware services needed by the scheduler.
pub trait Port {
    /// Configure the periodic timer for `period_us` and start it. Every
    /// elapsed period must end up in [`crate::Scheduler::tick`].
    fn arm_periodic_timer(&mut self, period_us: u32);

    /// Reprogram the timer for the next period. Called at the end of every
    /// tick.
    fn reload_timer(&mut self);

    /// Pend the deferred low-priority switch interrupt. Pending it again
    /// before it runs has no further effect.
    fn request_deferred_switch(&mut self, kind: SwitchKind);

    /// Acknowledge the pending switch interrupt on handler entry.
    fn clear_deferred_switch(&mut self);

    /// Drive the liveness output.
    fn set_heartbeat(&mut self, _level: bool) {}
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// A port that records what the scheduler asked of it.
    #[derive(Debug, Default)]
    pub(crate) struct MockPort {
        pub armed_period_us: Option<u32>,
        pub reloads: u32,
        /// Raised by a request, lowered by a clear.
        pub pending: bool,
        pub requests: std::vec::Vec<SwitchKind>,
        pub clears: u32,
        pub heartbeat: std::vec::Vec<bool>,
    }

    impl MockPort {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    impl Port for MockPort {
        fn arm_periodic_timer(&mut self, period_us: u32) {
            self.armed_period_us = Some(period_us);
        }

        fn reload_timer(&mut self) {
            self.reloads += 1;
        }

        fn request_deferred_switch(&mut self, kind: SwitchKind) {
            self.pending = true;
            self.requests.push(kind);
        }

        fn clear_deferred_switch(&mut self) {
            self.pending = false;
            self.clears += 1;
        }

        fn set_heartbeat(&mut self, level: bool) {
            self.heartbeat.push(level);
        }
    }
}
