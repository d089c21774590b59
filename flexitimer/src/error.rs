use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TimerError {
    #[error("maximum speed must be a finite number greater than 1, got {0}")]
    InvalidMaxSpeed(f64),
    #[error("speed {speed} is outside of the allowed range [{min}, {max}]")]
    SpeedOutOfRange { speed: f64, min: f64, max: f64 },
}
