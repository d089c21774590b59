//! Deterministic clock and scheduler driven by hand.
//!
//! A [`ManualClock`] owns a virtual time that only moves when
//! [`ManualClock::advance`] is called. Schedulers made from it fire their
//! callbacks while the time is advanced, in due order, with the clock set to
//! each callback's due time as it runs.
//!
//! This is a supported part of the public API, meant for driving a
//! [`SpeedCompensatedTimer`](crate::SpeedCompensatedTimer) in tests and
//! simulations without waiting on real time:
//!
//! ```
//! use flexitimer::{manual::ManualClock, SpeedCompensatedTimer};
//!
//! let clock = ManualClock::new();
//! let timer = SpeedCompensatedTimer::new(clock.clone(), clock.make_scheduler(), || {}, 10.0)?;
//! timer.start(1000.0);
//! timer.update_speed(4.0);
//! clock.advance(250.0);
//! assert!(!timer.is_running());
//! # Ok::<(), flexitimer::TimerError>(())
//! ```

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{Clock, Millis, Scheduler, TimerHandle};

type CallbackId = u64;

struct PendingCallback {
    id: CallbackId,
    due: Millis,
    callback: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct ManualState {
    now: Millis,
    next_id: CallbackId,
    pending: Vec<PendingCallback>,
}

impl ManualState {
    /// Removes the earliest pending callback due at or before `limit`.
    /// Ties are broken by scheduling order.
    fn pop_due(&mut self, limit: Option<Millis>) -> Option<PendingCallback> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| limit.map_or(true, |limit| p.due <= limit))
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
            .map(|(index, _)| index)?;
        let next = self.pending.remove(index);
        if next.due > self.now {
            self.now = next.due;
        }
        Some(next)
    }
}

#[derive(Clone, Default)]
pub struct ManualClock {
    state: Rc<RefCell<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler whose callbacks are driven by this clock.
    pub fn make_scheduler(&self) -> ManualScheduler {
        ManualScheduler {
            state: self.state.clone(),
        }
    }

    /// Moves time forward by `delta` milliseconds, firing every callback due
    /// on the way. Callbacks scheduled while advancing fire too if they fall
    /// inside the window.
    pub fn advance(&self, delta: Millis) {
        let target = self.state.borrow().now + delta;
        loop {
            // the borrow must end before the callback runs
            let next = self.state.borrow_mut().pop_due(Some(target));
            match next {
                Some(pending) => (pending.callback)(),
                None => break,
            }
        }
        let mut state = self.state.borrow_mut();
        if target > state.now {
            state.now = target;
        }
    }

    /// Fires all pending callbacks, including ones scheduled by the callbacks
    /// themselves, moving time to the due time of the last one.
    ///
    /// Does not return while callbacks keep rescheduling themselves.
    pub fn run_all(&self) {
        loop {
            let next = self.state.borrow_mut().pop_due(None);
            match next {
                Some(pending) => (pending.callback)(),
                None => break,
            }
        }
    }

    /// Number of callbacks that are scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Millis {
        self.state.borrow().now
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ManualClock")
            .field("now", &state.now)
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct ManualScheduler {
    state: Rc<RefCell<ManualState>>,
}

#[derive(Debug)]
pub struct ManualTimerHandle {
    state: Weak<RefCell<ManualState>>,
    id: CallbackId,
}

impl TimerHandle for ManualTimerHandle {
    fn cancel(self) {
        if let Some(state) = self.state.upgrade() {
            state.borrow_mut().pending.retain(|p| p.id != self.id);
        }
    }
}

impl Scheduler for ManualScheduler {
    type Handle = ManualTimerHandle;

    fn schedule_after(&self, delay: Millis, callback: Box<dyn FnOnce()>) -> Self::Handle {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + delay.max(0.0);
        state.pending.push(PendingCallback { id, due, callback });

        ManualTimerHandle {
            state: Rc::downgrade(&self.state),
            id,
        }
    }
}
