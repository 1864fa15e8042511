//! Calibration boundary derivation and raw-value normalization.
//!
//! All stored boundaries live in an inversion-adjusted domain: if the sweep
//! showed the sensor inverted, every raw value is reflected through the
//! hardware ceiling before use, so downstream arithmetic never cares about
//! direction. A rollover sweep additionally "unwraps" the max boundary past
//! the ceiling, making the calibrated range linear again.

use crate::analyzer::SweepCharacteristics;
use serde::{Deserialize, Serialize};

/// Finished calibration of one analog input.
///
/// Created and replaced atomically when a calibration session completes;
/// never partially written. `min_value`/`max_value` are already
/// inversion-adjusted; `max_value` may exceed the ceiling when the range
/// unwraps a rollover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub min_value: u32,
    pub max_value: u32,
    pub is_inverted: bool,
    pub has_rollover: bool,
    /// The sensor's raw ceiling, e.g. 1023 for a 10-bit ADC.
    pub max_hardware_value: u16,
}

/// Median of a sample set. `None` for an empty set.
///
/// Even-sized sets take the mean of the two middle values.
#[must_use]
pub fn median(samples: &[u16]) -> Option<u16> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(((sorted[mid - 1] as u32 + sorted[mid] as u32) / 2) as u16)
    }
}

fn adjust(value: u16, characteristics: SweepCharacteristics, max_hardware_value: u16) -> u32 {
    if characteristics.inverted {
        (max_hardware_value.saturating_sub(value)) as u32
    } else {
        value as u32
    }
}

/// Derive the stored minimum boundary from the minimum-position samples.
///
/// Returns `None` for an empty sample set (the session's gates prevent that).
#[must_use]
pub fn calculate_min(
    min_samples: &[u16],
    characteristics: SweepCharacteristics,
    max_hardware_value: u16,
) -> Option<u32> {
    median(min_samples).map(|m| adjust(m, characteristics, max_hardware_value))
}

/// Derive the stored maximum boundary.
///
/// Needs the minimum samples too: when the sweep wrapped, the adjusted max
/// can come out numerically below the adjusted min, and is then unwrapped by
/// one full sensor revolution (`ceiling + 1`) to restore a linear range.
#[must_use]
pub fn calculate_max(
    max_samples: &[u16],
    min_samples: &[u16],
    characteristics: SweepCharacteristics,
    max_hardware_value: u16,
) -> Option<u32> {
    let min_adjusted = calculate_min(min_samples, characteristics, max_hardware_value)?;
    let mut max_adjusted = median(max_samples).map(|m| adjust(m, characteristics, max_hardware_value))?;

    if characteristics.rollover && max_adjusted < min_adjusted {
        max_adjusted += max_hardware_value as u32 + 1;
    }
    Some(max_adjusted)
}

/// Full calibrated travel, in raw counts.
#[must_use]
pub fn total_travel(record: &CalibrationRecord) -> u32 {
    record.max_value - record.min_value
}

/// Normalize a raw reading into `[0, total_travel]`.
///
/// The order matters: invert first, then unwrap a rollover, then clamp, then
/// rebase onto the calibrated minimum. Clamping before unwrapping would
/// misclassify legitimate near-boundary rollover values as out-of-range.
#[must_use]
pub fn normalize(raw: u16, record: &CalibrationRecord) -> u32 {
    let mut value = if record.is_inverted {
        (record.max_hardware_value.saturating_sub(raw)) as u32
    } else {
        raw as u32
    };

    if record.has_rollover && value < record.min_value {
        value += record.max_hardware_value as u32 + 1;
    }

    value.clamp(record.min_value, record.max_value) - record.min_value
}
