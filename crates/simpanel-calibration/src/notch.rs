//! Per-lever notch range capture wizard.
//!
//! A lever's travel divides into named notches: gates (fixed detent
//! positions) and linear sub-ranges. For each notch the user positions the
//! lever, explicitly starts a capture, and the session tracks the running
//! min/max of the samples until the notch is completed. Unlike the
//! calibration wizard, nothing is collected outside an active capture.
//!
//! Notches may be revisited out of order before the final save; the preview
//! aggregates everything captured so far, and the save step commits all
//! ranges at once through the [`NotchStore`] trait.

use crate::error::NotchError;
use crate::store::NotchStore;
use serde::{Deserialize, Serialize};
use simpanel_core::constants::MIN_NOTCH_SAMPLES;
use simpanel_core::{InputReading, PortId};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Kind of a notch in a lever's travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotchKind {
    /// A fixed detent position.
    Gate,
    /// A continuous sub-range of travel.
    Linear,
}

/// One notch of a lever, as configured before capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotchDefinition {
    pub kind: NotchKind,
    pub description: String,
}

impl NotchDefinition {
    #[must_use]
    pub fn new(kind: NotchKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

/// A captured raw-domain range for one notch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotchRange {
    pub index: usize,
    pub kind: NotchKind,
    pub description: String,
    pub min: u16,
    pub max: u16,
}

/// Preview row: a notch and whatever range has been captured for it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotchPreview {
    pub index: usize,
    pub kind: NotchKind,
    pub description: String,
    pub range: Option<(u16, u16)>,
}

/// Progress notifications of a notch mapping session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum NotchEvent {
    SessionStarted {
        port: String,
        pin: u8,
        notch_count: usize,
    },
    NotchChanged {
        port: String,
        pin: u8,
        index: usize,
    },
    CaptureStarted {
        port: String,
        pin: u8,
        index: usize,
    },
    SampleCollected {
        port: String,
        pin: u8,
        index: usize,
        value: u16,
        count: usize,
    },
    NotchCompleted {
        port: String,
        pin: u8,
        index: usize,
        min: u16,
        max: u16,
    },
    SaveResult {
        port: String,
        pin: u8,
        result: Result<Vec<NotchRange>, String>,
    },
    Cancelled {
        port: String,
        pin: u8,
    },
}

/// Running min/max of an active capture.
#[derive(Debug, Clone, Copy)]
struct Capture {
    count: usize,
    min: u16,
    max: u16,
}

impl Capture {
    fn new() -> Self {
        Self {
            count: 0,
            min: u16::MAX,
            max: u16::MIN,
        }
    }

    fn track(&mut self, value: u16) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Pure wizard state, synchronous and timing-free.
struct NotchWizard {
    notches: Vec<NotchDefinition>,
    current: usize,
    capture: Option<Capture>,
    captured: BTreeMap<usize, (u16, u16)>,
    min_samples: usize,
}

impl NotchWizard {
    fn new(notches: Vec<NotchDefinition>, min_samples: usize) -> Self {
        Self {
            notches,
            current: 0,
            capture: None,
            captured: BTreeMap::new(),
            min_samples,
        }
    }

    fn start_capture(&mut self) {
        self.capture = Some(Capture::new());
    }

    fn reset_capture(&mut self) {
        if self.capture.is_some() {
            self.capture = Some(Capture::new());
        }
    }

    /// Feed one live value; only an active capture collects. Returns the new
    /// sample count when collected.
    fn collect(&mut self, value: u16) -> Option<usize> {
        let capture = self.capture.as_mut()?;
        capture.track(value);
        Some(capture.count)
    }

    fn complete_notch(&mut self) -> Result<NotchRange, NotchError> {
        let notch = self.current;
        let Some(capture) = self.capture else {
            return Err(NotchError::NoRangeDetected { notch });
        };
        if capture.count == 0 {
            return Err(NotchError::NoRangeDetected { notch });
        }
        if capture.count < self.min_samples {
            // Keep capturing; the caller just needs to hold on longer.
            return Err(NotchError::NotEnoughSamples {
                notch,
                collected: capture.count,
                required: self.min_samples,
            });
        }

        self.captured.insert(notch, (capture.min, capture.max));
        self.capture = None;

        let definition = &self.notches[notch];
        let range = NotchRange {
            index: notch,
            kind: definition.kind,
            description: definition.description.clone(),
            min: capture.min,
            max: capture.max,
        };

        if self.current + 1 < self.notches.len() {
            self.current += 1;
        }
        Ok(range)
    }

    fn go_to(&mut self, index: usize) -> Result<(), NotchError> {
        if index >= self.notches.len() {
            return Err(NotchError::UnknownNotch {
                index,
                count: self.notches.len(),
            });
        }
        self.current = index;
        self.capture = None;
        Ok(())
    }

    fn preview(&self) -> Vec<NotchPreview> {
        self.notches
            .iter()
            .enumerate()
            .map(|(index, definition)| NotchPreview {
                index,
                kind: definition.kind,
                description: definition.description.clone(),
                range: self.captured.get(&index).copied(),
            })
            .collect()
    }

    fn save_ready(&self) -> Result<Vec<NotchRange>, NotchError> {
        let missing: Vec<usize> = (0..self.notches.len())
            .filter(|index| !self.captured.contains_key(index))
            .collect();
        if !missing.is_empty() {
            return Err(NotchError::IncompleteRanges { missing });
        }

        Ok(self
            .captured
            .iter()
            .map(|(&index, &(min, max))| {
                let definition = &self.notches[index];
                NotchRange {
                    index,
                    kind: definition.kind,
                    description: definition.description.clone(),
                    min,
                    max,
                }
            })
            .collect())
    }
}

enum Command {
    StartCapture {
        reply: oneshot::Sender<()>,
    },
    ResetCapture {
        reply: oneshot::Sender<()>,
    },
    CompleteNotch {
        reply: oneshot::Sender<Result<NotchRange, NotchError>>,
    },
    GoToNotch {
        index: usize,
        reply: oneshot::Sender<Result<(), NotchError>>,
    },
    Preview {
        reply: oneshot::Sender<Vec<NotchPreview>>,
    },
    Save {
        reply: oneshot::Sender<Result<Vec<NotchRange>, NotchError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
}

/// Caller-side handle to a running notch mapping session.
#[derive(Debug, Clone)]
pub struct NotchHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl NotchHandle {
    /// Begin (or restart) capturing the current notch.
    pub async fn start_capture(&self) -> Result<(), NotchError> {
        self.send_unit(|reply| Command::StartCapture { reply }).await
    }

    /// Discard the current capture's samples without leaving the notch.
    pub async fn reset_capture(&self) -> Result<(), NotchError> {
        self.send_unit(|reply| Command::ResetCapture { reply }).await
    }

    /// Finish the current notch, recording its detected range.
    pub async fn complete_notch(&self) -> Result<NotchRange, NotchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CompleteNotch { reply: reply_tx })
            .await
            .map_err(|_| NotchError::SessionClosed)?;
        reply_rx.await.map_err(|_| NotchError::SessionClosed)?
    }

    /// Jump to a notch by index, abandoning any active capture.
    pub async fn go_to_notch(&self, index: usize) -> Result<(), NotchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::GoToNotch {
                index,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NotchError::SessionClosed)?;
        reply_rx.await.map_err(|_| NotchError::SessionClosed)?
    }

    /// All notches with their captured ranges so far.
    pub async fn preview(&self) -> Result<Vec<NotchPreview>, NotchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Preview { reply: reply_tx })
            .await
            .map_err(|_| NotchError::SessionClosed)?;
        reply_rx.await.map_err(|_| NotchError::SessionClosed)
    }

    /// Commit every captured range. Fails with `IncompleteRanges` if any
    /// notch has not been captured yet.
    pub async fn save(&self) -> Result<Vec<NotchRange>, NotchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Save { reply: reply_tx })
            .await
            .map_err(|_| NotchError::SessionClosed)?;
        reply_rx.await.map_err(|_| NotchError::SessionClosed)?
    }

    /// Cancel the session; nothing is persisted.
    pub async fn cancel(&self) -> Result<(), NotchError> {
        self.send_unit(|reply| Command::Cancel { reply }).await
    }

    async fn send_unit(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), NotchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| NotchError::SessionClosed)?;
        reply_rx.await.map_err(|_| NotchError::SessionClosed)
    }
}

/// The notch mapping session actor.
pub struct NotchSession;

impl NotchSession {
    /// Spawn a session for one lever and return its handle.
    pub fn spawn<S>(
        port: PortId,
        pin: u8,
        notches: Vec<NotchDefinition>,
        inputs: broadcast::Receiver<InputReading>,
        store: S,
        events: broadcast::Sender<NotchEvent>,
    ) -> NotchHandle
    where
        S: NotchStore + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let actor = NotchActor {
            port,
            pin,
            wizard: NotchWizard::new(notches, MIN_NOTCH_SAMPLES),
            cmd_rx,
            inputs: Some(inputs),
            store,
            events,
        };
        tokio::spawn(actor.run());
        NotchHandle { cmd_tx }
    }
}

struct NotchActor<S> {
    port: PortId,
    pin: u8,
    wizard: NotchWizard,
    cmd_rx: mpsc::Receiver<Command>,
    inputs: Option<broadcast::Receiver<InputReading>>,
    store: S,
    events: broadcast::Sender<NotchEvent>,
}

impl<S: NotchStore + 'static> NotchActor<S> {
    async fn run(mut self) {
        info!(port = %self.port, pin = self.pin, "notch mapping session started");
        self.emit(NotchEvent::SessionStarted {
            port: self.port.to_string(),
            pin: self.pin,
            notch_count: self.wizard.notches.len(),
        });

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    let Some(command) = command else {
                        debug!(port = %self.port, pin = self.pin, "notch handle dropped");
                        return;
                    };
                    if self.handle_command(command).await {
                        return;
                    }
                }
                reading = recv_reading(&mut self.inputs), if self.inputs.is_some() => {
                    match reading {
                        Some(reading)
                            if reading.port == self.port && reading.pin == self.pin =>
                        {
                            if let Some(count) = self.wizard.collect(reading.value) {
                                self.emit(NotchEvent::SampleCollected {
                                    port: self.port.to_string(),
                                    pin: self.pin,
                                    index: self.wizard.current,
                                    value: reading.value,
                                    count,
                                });
                            }
                        }
                        Some(_) => {}
                        None => self.inputs = None,
                    }
                }
            }
        }
    }

    /// Returns `true` when the session reached a terminal state.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartCapture { reply } => {
                self.wizard.start_capture();
                self.emit(NotchEvent::CaptureStarted {
                    port: self.port.to_string(),
                    pin: self.pin,
                    index: self.wizard.current,
                });
                let _ = reply.send(());
                false
            }
            Command::ResetCapture { reply } => {
                self.wizard.reset_capture();
                let _ = reply.send(());
                false
            }
            Command::CompleteNotch { reply } => {
                let result = self.wizard.complete_notch();
                if let Ok(range) = &result {
                    self.emit(NotchEvent::NotchCompleted {
                        port: self.port.to_string(),
                        pin: self.pin,
                        index: range.index,
                        min: range.min,
                        max: range.max,
                    });
                    self.emit(NotchEvent::NotchChanged {
                        port: self.port.to_string(),
                        pin: self.pin,
                        index: self.wizard.current,
                    });
                }
                let _ = reply.send(result);
                false
            }
            Command::GoToNotch { index, reply } => {
                let result = self.wizard.go_to(index);
                if result.is_ok() {
                    self.emit(NotchEvent::NotchChanged {
                        port: self.port.to_string(),
                        pin: self.pin,
                        index,
                    });
                }
                let _ = reply.send(result);
                false
            }
            Command::Preview { reply } => {
                let _ = reply.send(self.wizard.preview());
                false
            }
            Command::Save { reply } => match self.wizard.save_ready() {
                Ok(ranges) => {
                    let outcome = self.persist(ranges).await;
                    let terminal = outcome.is_ok() || matches!(&outcome, Err(NotchError::Store(_)));
                    let _ = reply.send(outcome);
                    terminal
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    false
                }
            },
            Command::Cancel { reply } => {
                info!(port = %self.port, pin = self.pin, "notch mapping cancelled");
                self.emit(NotchEvent::Cancelled {
                    port: self.port.to_string(),
                    pin: self.pin,
                });
                let _ = reply.send(());
                true
            }
        }
    }

    async fn persist(&mut self, ranges: Vec<NotchRange>) -> Result<Vec<NotchRange>, NotchError> {
        match self
            .store
            .save_notch_ranges(&self.port, self.pin, &ranges)
            .await
        {
            Ok(()) => {
                info!(port = %self.port, pin = self.pin, count = ranges.len(), "notch ranges stored");
                self.emit(NotchEvent::SaveResult {
                    port: self.port.to_string(),
                    pin: self.pin,
                    result: Ok(ranges.clone()),
                });
                Ok(ranges)
            }
            Err(e) => {
                warn!(port = %self.port, pin = self.pin, error = %e, "notch store failed");
                self.emit(NotchEvent::SaveResult {
                    port: self.port.to_string(),
                    pin: self.pin,
                    result: Err(e.to_string()),
                });
                Err(NotchError::Store(e))
            }
        }
    }

    fn emit(&self, event: NotchEvent) {
        let _ = self.events.send(event);
    }
}

/// Receive from an optional broadcast subscription, skipping lag gaps.
async fn recv_reading(
    inputs: &mut Option<broadcast::Receiver<InputReading>>,
) -> Option<InputReading> {
    let rx = inputs.as_mut()?;
    loop {
        match rx.recv().await {
            Ok(reading) => return Some(reading),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "notch subscriber lagged behind input stream");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
