use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{config::TimerConfig, Clock, Millis, Scheduler, TimerError, TimerHandle};

/// Symmetric bound on the speed of a timer: `[1 / max, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimits {
    max: f64,
}

impl SpeedLimits {
    pub fn new(max_speed: f64) -> Result<Self, TimerError> {
        if max_speed.is_finite() && max_speed > 1.0 {
            Ok(SpeedLimits { max: max_speed })
        } else {
            Err(TimerError::InvalidMaxSpeed(max_speed))
        }
    }

    pub fn min(&self) -> f64 {
        1.0 / self.max
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Inclusive range check. NaN is never contained.
    pub fn contains(&self, speed: f64) -> bool {
        (self.min()..=self.max).contains(&speed)
    }

    pub fn check(&self, speed: f64) -> Result<f64, TimerError> {
        if self.contains(speed) {
            Ok(speed)
        } else {
            Err(TimerError::SpeedOutOfRange {
                speed,
                min: self.min(),
                max: self.max,
            })
        }
    }
}

type SessionId = u64;

/// One running countdown.
struct Session<H> {
    id: SessionId,
    /// Length of the countdown in nominal milliseconds.
    nominal_duration: Millis,
    /// Clock reading at which the countdown (re)started.
    started_at: Millis,
    handle: H,
}

struct TimerState<C, S: Scheduler> {
    clock: C,
    scheduler: S,
    limits: SpeedLimits,
    speed: f64,
    session: Option<Session<S::Handle>>,
    next_session_id: SessionId,
    on_timeout: Rc<RefCell<dyn FnMut()>>,
}

impl<C: Clock, S: Scheduler> TimerState<C, S> {
    fn time_since_start(&self) -> Millis {
        match &self.session {
            Some(session) => (self.clock.now() - session.started_at) * self.speed,
            None => 0.0,
        }
    }

    fn time_to_expiry(&self) -> Millis {
        match &self.session {
            Some(session) => session.nominal_duration - self.time_since_start(),
            None => 0.0,
        }
    }

    /// Ends the running session, if any, cancelling its deadline.
    fn cancel_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                session.handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// Countdown timer whose firing rate can be changed while it runs.
///
/// Durations passed to [`start`](Self::start) and the values reported by
/// [`time_since_start`](Self::time_since_start) and
/// [`time_to_expiry`](Self::time_to_expiry) are nominal: they are the times
/// that would apply at 1x speed. At speed `s`, a nominal duration `d` takes
/// `d / s` milliseconds of real time.
///
/// The timer is a handle to shared single-threaded state, cloning it gives
/// another handle to the same timer. The deadline callback runs without any
/// internal borrow held, so it may restart or reconfigure the timer.
///
/// The timer owns its callback, so a callback holding a clone of the timer
/// keeps both alive forever. Capture a [`WeakTimer`] from
/// [`downgrade`](Self::downgrade) instead.
pub struct SpeedCompensatedTimer<C: Clock, S: Scheduler> {
    state: Rc<RefCell<TimerState<C, S>>>,
}

/// Non-owning handle to a [`SpeedCompensatedTimer`].
pub struct WeakTimer<C: Clock, S: Scheduler> {
    state: Weak<RefCell<TimerState<C, S>>>,
}

impl<C: Clock, S: Scheduler> WeakTimer<C, S> {
    /// Returns the timer, or `None` once every strong handle was dropped.
    pub fn upgrade(&self) -> Option<SpeedCompensatedTimer<C, S>> {
        self.state
            .upgrade()
            .map(|state| SpeedCompensatedTimer { state })
    }
}

impl<C: Clock, S: Scheduler> Clone for WeakTimer<C, S> {
    fn clone(&self) -> Self {
        WeakTimer {
            state: self.state.clone(),
        }
    }
}

impl<C, S> SpeedCompensatedTimer<C, S>
where
    C: Clock + 'static,
    S: Scheduler + 'static,
    S::Handle: 'static,
{
    /// Creates an idle timer running at 1x speed.
    ///
    /// `max_speed` must be finite and greater than 1.
    pub fn new(
        clock: C,
        scheduler: S,
        on_timeout: impl FnMut() + 'static,
        max_speed: f64,
    ) -> Result<Self, TimerError> {
        Self::with_initial_speed(clock, scheduler, on_timeout, max_speed, 1.0)
    }

    pub fn with_initial_speed(
        clock: C,
        scheduler: S,
        on_timeout: impl FnMut() + 'static,
        max_speed: f64,
        initial_speed: f64,
    ) -> Result<Self, TimerError> {
        let limits = SpeedLimits::new(max_speed)?;
        let speed = limits.check(initial_speed)?;

        Ok(SpeedCompensatedTimer {
            state: Rc::new(RefCell::new(TimerState {
                clock,
                scheduler,
                limits,
                speed,
                session: None,
                next_session_id: 0,
                on_timeout: Rc::new(RefCell::new(on_timeout)),
            })),
        })
    }

    pub fn from_config(
        clock: C,
        scheduler: S,
        on_timeout: impl FnMut() + 'static,
        config: &TimerConfig,
    ) -> Result<Self, TimerError> {
        Self::with_initial_speed(
            clock,
            scheduler,
            on_timeout,
            config.max_speed,
            config.initial_speed,
        )
    }

    pub fn downgrade(&self) -> WeakTimer<C, S> {
        WeakTimer {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Starts a countdown of `nominal_duration`, replacing any running one.
    pub fn start(&self, nominal_duration: Millis) {
        let weak = Rc::downgrade(&self.state);
        let mut state = self.state.borrow_mut();
        if state.cancel_session() {
            trace!("replacing running countdown");
        }
        Self::begin_session(&mut state, weak, nominal_duration);
        debug!(nominal_duration, speed = state.speed, "timer started");
    }

    /// Cancels the running countdown. Does nothing when idle.
    pub fn stop(&self) {
        if self.state.borrow_mut().cancel_session() {
            debug!("timer stopped");
        } else {
            trace!("stop requested on idle timer");
        }
    }

    pub fn speed(&self) -> f64 {
        self.state.borrow().speed
    }

    pub fn max_speed(&self) -> f64 {
        self.state.borrow().limits.max()
    }

    pub fn min_speed(&self) -> f64 {
        self.state.borrow().limits.min()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().session.is_some()
    }

    /// Changes the speed, keeping the nominal time to expiry of a running
    /// countdown intact.
    ///
    /// Speeds outside `[1 / max_speed, max_speed]` are ignored and leave the
    /// timer untouched. Returns whether the new speed was applied.
    pub fn update_speed(&self, speed: f64) -> bool {
        let weak = Rc::downgrade(&self.state);
        let mut state = self.state.borrow_mut();

        if !state.limits.contains(speed) {
            debug!(
                speed,
                min = state.limits.min(),
                max = state.limits.max(),
                "ignoring out of range speed"
            );
            return false;
        }

        let previous = state.speed;
        let remaining = state.time_to_expiry();
        if state.cancel_session() {
            state.speed = speed;
            Self::begin_session(&mut state, weak, remaining);
            debug!(previous, speed, remaining, "rescheduled running timer");
        } else {
            state.speed = speed;
            debug!(previous, speed, "speed changed");
        }

        true
    }

    /// Nominal time elapsed since the countdown started, 0 when idle.
    pub fn time_since_start(&self) -> Millis {
        self.state.borrow().time_since_start()
    }

    /// Nominal time left until the deadline, 0 when idle.
    ///
    /// This is not clamped: it goes negative when read after the real
    /// deadline passed but before the scheduler delivered the callback.
    pub fn time_to_expiry(&self) -> Millis {
        self.state.borrow().time_to_expiry()
    }

    fn begin_session(
        state: &mut TimerState<C, S>,
        timer: Weak<RefCell<TimerState<C, S>>>,
        nominal_duration: Millis,
    ) {
        let id = state.next_session_id;
        state.next_session_id += 1;

        let started_at = state.clock.now();
        let delay = nominal_duration / state.speed;
        trace!(id, delay, "scheduling deadline");
        let handle = state
            .scheduler
            .schedule_after(delay, Box::new(move || Self::deliver(&timer, id)));

        state.session = Some(Session {
            id,
            nominal_duration,
            started_at,
            handle,
        });
    }

    fn deliver(timer: &Weak<RefCell<TimerState<C, S>>>, id: SessionId) {
        let Some(timer) = timer.upgrade() else {
            trace!(id, "deadline fired for dropped timer");
            return;
        };

        let on_timeout = {
            let mut state = timer.borrow_mut();
            match state.session.take() {
                // the scheduler already consumed this deadline, nothing to cancel
                Some(session) if session.id == id => drop(session),
                other => {
                    state.session = other;
                    trace!(id, "ignoring deadline of replaced countdown");
                    return;
                }
            }
            state.on_timeout.clone()
        };

        debug!(id, "timer expired");
        let mut callback = on_timeout.borrow_mut();
        (&mut *callback)();
    }
}

impl<C: Clock, S: Scheduler> Clone for SpeedCompensatedTimer<C, S> {
    fn clone(&self) -> Self {
        SpeedCompensatedTimer {
            state: self.state.clone(),
        }
    }
}

impl<C: Clock, S: Scheduler> fmt::Debug for SpeedCompensatedTimer<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SpeedCompensatedTimer")
            .field("speed", &state.speed)
            .field("limits", &state.limits)
            .field("running", &state.session.is_some())
            .finish()
    }
}
