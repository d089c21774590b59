use tokio::time::Instant;

use crate::Millis;

/// Source of real time for a timer.
///
/// Readings must be monotonically non-decreasing and expressed in
/// milliseconds. The origin is arbitrary, only differences are used.
pub trait Clock {
    fn now(&self) -> Millis;
}

/// Monotonic clock backed by [`tokio::time::Instant`].
///
/// Because it reads tokio's clock, pausing time in a tokio test runtime also
/// freezes this clock.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        TokioClock {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Millis {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}
