//! Firmware upload orchestration.
//!
//! Flashing itself is an external collaborator (an invoked flasher tool)
//! behind the narrow [`FirmwareFlasher`] trait. This module only owns what
//! the connection core must guarantee around it: the upload lease is held for
//! the whole upload so protocol traffic never interleaves with flashing, the
//! upload runs under a hard timeout, progress is forwarded to the event
//! topic, and the lease is always released - on success, failure, timeout,
//! and cancellation alike.

use crate::error::DeviceError;
use crate::events::RegistryEvent;
use crate::registry::RegistryHandle;
use serde::{Deserialize, Serialize};
use simpanel_core::PortId;
use simpanel_core::constants::UPLOAD_TIMEOUT_MS;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Target board description handed to the flasher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Flasher-specific board identifier, e.g. `arduino:avr:leonardo`.
    pub board: String,
}

impl BoardConfig {
    #[must_use]
    pub fn new(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
        }
    }
}

/// Progress report emitted by the flasher while an upload runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub percent: u8,
    pub message: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub duration_ms: u64,
    pub log: Vec<String>,
}

/// The out-of-scope flashing subsystem, reduced to the one capability the
/// connection core needs from it.
pub trait FirmwareFlasher: Send + Sync {
    /// Flash `image_path` onto the device behind `port`, reporting progress
    /// through `progress` as it goes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flasher tool fails or rejects the image.
    async fn upload(
        &self,
        port: &PortId,
        board: &BoardConfig,
        image_path: &Path,
        progress: mpsc::Sender<UploadProgress>,
    ) -> Result<UploadReport, DeviceError>;
}

/// Default hard bound on one upload.
#[must_use]
pub fn default_upload_timeout() -> Duration {
    Duration::from_millis(UPLOAD_TIMEOUT_MS)
}

/// Run one firmware upload under the registry's lease discipline.
///
/// Acquires the upload lease (tearing down any live session on the port),
/// runs the flasher under `timeout`, forwards progress to the registry event
/// topic, and releases the lease on every exit path. Hitting `timeout`
/// cancels the upload from the caller's perspective immediately.
///
/// # Errors
///
/// Returns the lease acquisition error, the flasher's own error, or
/// `DeviceError::UploadTimeout` if the bound expired.
pub async fn run_upload<F: FirmwareFlasher>(
    flasher: &F,
    registry: &RegistryHandle,
    port: &PortId,
    board: &BoardConfig,
    image_path: &Path,
    timeout: Duration,
) -> Result<UploadReport, DeviceError> {
    let token = registry.request_upload_access(port).await?;
    registry.publish(RegistryEvent::UploadStarted {
        port: port.to_string(),
    });
    info!(port = %port, board = %board.board, "firmware upload started");

    let (progress_tx, mut progress_rx) = mpsc::channel::<UploadProgress>(16);
    let result = tokio::time::timeout(timeout, async {
        let upload = flasher.upload(port, board, image_path, progress_tx);
        tokio::pin!(upload);
        let mut progress_open = true;
        loop {
            tokio::select! {
                report = &mut upload => break report,
                progress = progress_rx.recv(), if progress_open => match progress {
                    Some(p) => registry.publish(RegistryEvent::UploadProgress {
                        port: port.to_string(),
                        percent: p.percent,
                        message: p.message,
                    }),
                    None => progress_open = false,
                },
            }
        }
    })
    .await;

    // The lease must come back no matter how the upload ended; a failed
    // release only means the registry itself is gone.
    if let Err(e) = registry.release_upload_access(port, token).await {
        warn!(port = %port, error = %e, "failed to release upload lease");
    }

    match result {
        Ok(Ok(report)) => {
            info!(port = %port, duration_ms = report.duration_ms, "firmware upload completed");
            registry.publish(RegistryEvent::UploadCompleted {
                port: port.to_string(),
                duration_ms: report.duration_ms,
            });
            Ok(report)
        }
        Ok(Err(e)) => {
            warn!(port = %port, error = %e, "firmware upload failed");
            registry.publish(RegistryEvent::UploadFailed {
                port: port.to_string(),
                reason: e.to_string(),
            });
            Err(e)
        }
        Err(_) => {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(port = %port, timeout_ms, "firmware upload timed out");
            registry.publish(RegistryEvent::UploadFailed {
                port: port.to_string(),
                reason: format!("timed out after {timeout_ms}ms"),
            });
            Err(DeviceError::UploadTimeout { timeout_ms })
        }
    }
}
