//! Injectable delay schedules for the wait engine.

use std::time::Duration;

/// Delay schedule between wait-engine probes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackoffPolicy {
    /// The same delay before every probe.
    Fixed {
        /// Delay between probes.
        interval: Duration,
    },
    /// Delay grows by an integer multiplier per probe, capped at `max`.
    Exponential {
        /// Delay before the first probe.
        initial: Duration,
        /// Growth factor applied after each probe.
        multiplier: u32,
        /// Upper bound on the delay.
        max: Duration,
    },
}

impl BackoffPolicy {
    /// Creates a fixed-interval schedule.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self::Fixed { interval }
    }

    /// Creates an exponential schedule capped at `max`.
    #[must_use]
    pub const fn exponential(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier,
            max,
        }
    }

    /// Returns the delay before probe number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { interval } => interval,
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let mut delay = initial;
                let mut step: u32 = 0;
                while step < attempt {
                    if delay >= max {
                        return max;
                    }
                    delay = delay.saturating_mul(multiplier);
                    step = step.saturating_add(1);
                }
                delay.min(max)
            }
        }
    }
}
