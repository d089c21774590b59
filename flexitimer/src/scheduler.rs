use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

use crate::Millis;

/// One-shot delayed callback primitive.
///
/// `schedule_after` must never run the callback synchronously. Once scheduled,
/// the callback runs exactly once after at least `delay` milliseconds of real
/// time, unless its handle is cancelled first. A delay of zero or less means
/// "as soon as possible".
pub trait Scheduler {
    type Handle: TimerHandle;

    fn schedule_after(&self, delay: Millis, callback: Box<dyn FnOnce()>) -> Self::Handle;
}

/// Cancellation right for one scheduled callback.
///
/// Cancelling consumes the handle, so a callback can be cancelled at most
/// once. Dropping a handle without cancelling leaves the callback scheduled.
pub trait TimerHandle {
    fn cancel(self);
}

/// Converts a millisecond delay to a [`Duration`] the runtime accepts.
pub(crate) fn delay_to_duration(delay: Millis) -> Duration {
    // f64::max maps NaN to zero as well
    let seconds = delay.max(0.0) / 1000.0;
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Scheduler running callbacks as local tokio tasks.
///
/// Must be used from within a [`tokio::task::LocalSet`]. The callback runs in
/// the same poll in which the sleep completes, so on the single threaded local
/// executor an abort issued before that poll always wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        TokioScheduler
    }
}

#[derive(Debug)]
pub struct TokioTimerHandle(AbortHandle);

impl TimerHandle for TokioTimerHandle {
    fn cancel(self) {
        self.0.abort();
    }
}

impl Scheduler for TokioScheduler {
    type Handle = TokioTimerHandle;

    fn schedule_after(&self, delay: Millis, callback: Box<dyn FnOnce()>) -> Self::Handle {
        let duration = delay_to_duration(delay);
        trace!(?duration, "scheduling local timer task");
        let join_handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(duration).await;
            callback();
        });
        TokioTimerHandle(join_handle.abort_handle())
    }
}
