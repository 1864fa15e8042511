//! Error types for calibration and notch mapping sessions.
//!
//! Every calibration failure is recoverable by user action; the variants map
//! one-to-one onto the corrective instruction the UI shows (collect more
//! samples, hold the lever still, sweep the full travel, capture the missing
//! notches).

/// Errors raised by the guided min/sweep/max calibration wizard.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// A min/max collection step lacks samples or value spread.
    #[error(
        "Not enough samples: {collected} collected with {distinct} distinct values \
         (need {required} samples, {distinct_required} distinct)"
    )]
    InsufficientSamples {
        collected: usize,
        distinct: usize,
        required: usize,
        distinct_required: usize,
    },

    /// The sweep step lacks samples.
    #[error("Not enough sweep samples: {collected} collected (need {required})")]
    InsufficientSweepSamples { collected: usize, required: usize },

    /// The value moved too much during a min/max collection step.
    #[error("Value unstable: spread of {spread} exceeds allowed {allowed}")]
    UnstableValue { spread: u16, allowed: u16 },

    /// Advance requested on a terminal session.
    #[error("Calibration session already finished")]
    AlreadyFinished,

    /// Persisting the finished record failed.
    #[error("Failed to store calibration: {0}")]
    Store(#[from] StoreError),

    /// The session task is gone.
    #[error("Calibration session closed")]
    SessionClosed,
}

/// Errors raised by the per-lever notch mapping wizard.
#[derive(Debug, thiserror::Error)]
pub enum NotchError {
    /// Capture was never started or produced no samples for this notch.
    #[error("No range detected for notch {notch}")]
    NoRangeDetected { notch: usize },

    /// Capture ran but collected too few samples.
    #[error("Not enough samples for notch {notch}: {collected} collected (need {required})")]
    NotEnoughSamples {
        notch: usize,
        collected: usize,
        required: usize,
    },

    /// Save requested while notches are still missing ranges.
    #[error("Incomplete ranges: notches {missing:?} not captured")]
    IncompleteRanges { missing: Vec<usize> },

    /// Navigation to a notch index outside the lever's list.
    #[error("Unknown notch index {index} (lever has {count} notches)")]
    UnknownNotch { index: usize, count: usize },

    /// Persisting the captured ranges failed.
    #[error("Failed to store notch ranges: {0}")]
    Store(#[from] StoreError),

    /// The session task is gone.
    #[error("Notch mapping session closed")]
    SessionClosed,
}

/// Persistence collaborator failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);
