//! Persistence traits for finished calibrations and notch ranges.
//!
//! Durable storage is an external collaborator; the sessions only need these
//! narrow write capabilities. The in-memory implementations back tests and
//! the CLI monitor.

use crate::calculator::CalibrationRecord;
use crate::error::StoreError;
use crate::notch::NotchRange;
use simpanel_core::PortId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sink for finished calibration records.
pub trait CalibrationStore: Send + Sync {
    /// Atomically replace the calibration of one input.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage rejects the write.
    fn save_calibration(
        &self,
        port: &PortId,
        pin: u8,
        record: &CalibrationRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Sink for a lever's captured notch ranges.
pub trait NotchStore: Send + Sync {
    /// Atomically replace all notch ranges of one lever.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage rejects the write.
    fn save_notch_ranges(
        &self,
        port: &PortId,
        pin: u8,
        ranges: &[NotchRange],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("store lock poisoned")
}

/// In-memory calibration store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCalibrationStore {
    records: Arc<Mutex<HashMap<(String, u8), CalibrationRecord>>>,
}

impl MemoryCalibrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record for one input, if any.
    #[must_use]
    pub fn get(&self, port: &PortId, pin: u8) -> Option<CalibrationRecord> {
        guard(&self.records).get(&(port.to_string(), pin)).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        guard(&self.records).len()
    }

    /// Returns `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        guard(&self.records).is_empty()
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    async fn save_calibration(
        &self,
        port: &PortId,
        pin: u8,
        record: &CalibrationRecord,
    ) -> Result<(), StoreError> {
        guard(&self.records).insert((port.to_string(), pin), record.clone());
        Ok(())
    }
}

/// In-memory notch range store.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotchStore {
    ranges: Arc<Mutex<HashMap<(String, u8), Vec<NotchRange>>>>,
}

impl MemoryNotchStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored ranges for one lever, if any.
    #[must_use]
    pub fn get(&self, port: &PortId, pin: u8) -> Option<Vec<NotchRange>> {
        guard(&self.ranges).get(&(port.to_string(), pin)).cloned()
    }
}

impl NotchStore for MemoryNotchStore {
    async fn save_notch_ranges(
        &self,
        port: &PortId,
        pin: u8,
        ranges: &[NotchRange],
    ) -> Result<(), StoreError> {
        guard(&self.ranges).insert((port.to_string(), pin), ranges.to_vec());
        Ok(())
    }
}
