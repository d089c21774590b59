//! A countdown timer whose firing rate can be sped up or slowed down while
//! it runs.
//!
//! All times reported by [`SpeedCompensatedTimer`] are *nominal*: they are
//! expressed as if the timer always ran at 1x speed. Only the real delay
//! handed to the [`Scheduler`] changes with the speed.

mod cli;
mod clock;
pub mod config;
mod error;
pub mod manual;
mod scheduler;
mod timer;
pub mod tracing;

pub use cli::main as cli_main;
pub use clock::{Clock, TokioClock};
pub use config::Config;
pub use error::TimerError;
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler, TokioTimerHandle};
pub use timer::{SpeedCompensatedTimer, SpeedLimits, WeakTimer};

/// Time in milliseconds, used for both nominal and real quantities.
pub type Millis = f64;

pub(crate) mod exitcode {
    /// The command was used incorrectly, e.g., with the wrong number of
    /// arguments, a bad flag, a bad syntax in a parameter, or whatever.
    pub const USAGE: u8 = 64;

    /// Something was found in an unconfigured or misconfigured state.
    pub const CONFIG: u8 = 78;
}
