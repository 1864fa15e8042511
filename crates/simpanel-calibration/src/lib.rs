//! Calibration signal processing and guided capture sessions.
//!
//! The numerical core is pure: [`analyzer`] classifies a sweep's direction
//! and wraparound, [`calculator`] turns sample sets into a
//! [`CalibrationRecord`](calculator::CalibrationRecord) and normalizes raw
//! readings against one. On top sit two short-lived actors that drive the
//! human-in-the-loop wizards: [`session::CalibrationSession`] for the
//! min/sweep/max capture, [`notch::NotchSession`] for per-notch lever range
//! capture. Both consume the live input broadcast one pin at a time and
//! persist through the traits in [`store`].

#![allow(async_fn_in_trait)]

pub mod analyzer;
pub mod calculator;
pub mod error;
pub mod notch;
pub mod session;
pub mod store;

pub use analyzer::{SweepCharacteristics, analyze_sweep};
pub use calculator::{CalibrationRecord, calculate_max, calculate_min, median, normalize, total_travel};
pub use error::{CalibrationError, NotchError, StoreError};
pub use notch::{
    NotchDefinition, NotchEvent, NotchHandle, NotchKind, NotchPreview, NotchRange, NotchSession,
};
pub use session::{
    CalibrationEvent, CalibrationHandle, CalibrationSession, CalibrationStep, CalibrationTarget,
    CalibrationThresholds,
};
pub use store::{CalibrationStore, MemoryCalibrationStore, MemoryNotchStore, NotchStore};
