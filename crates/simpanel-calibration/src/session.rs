//! Guided min/sweep/max calibration wizard.
//!
//! One short-lived actor per input being calibrated. The user is walked
//! through holding the lever at its minimum, sweeping the full travel, and
//! holding the maximum; the session accumulates samples from the live input
//! stream (filtered to its one pin) and refuses to advance until each step
//! has enough signal. The final step runs the analyzer and calculator,
//! persists the record, and reports the result exactly once.
//!
//! # States
//!
//! `CollectingMin -> Sweeping -> CollectingMax -> Analyzing -> Complete`,
//! with `Cancelled` reachable from any non-terminal state. Failing to
//! advance never loses already-collected samples.

use crate::analyzer::analyze_sweep;
use crate::calculator::{CalibrationRecord, calculate_max, calculate_min};
use crate::error::CalibrationError;
use crate::store::CalibrationStore;
use serde::{Deserialize, Serialize};
use simpanel_core::constants::{
    DEFAULT_MAX_HARDWARE_VALUE, MIN_DISTINCT_STEP_VALUES, MIN_STEP_SAMPLES, MIN_SWEEP_SAMPLES,
    STABILITY_SPREAD_DIVISOR,
};
use simpanel_core::{InputReading, PortId};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Wizard step of a calibration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStep {
    /// Hold the lever at its physical minimum.
    CollectingMin,
    /// Sweep the lever across its full travel.
    Sweeping,
    /// Hold the lever at its physical maximum.
    CollectingMax,
    /// Transient: running the analyzer/calculator and persisting.
    Analyzing,
    /// Terminal: record persisted (or persistence failed; see the result
    /// event).
    Complete,
    /// Terminal: cancelled by the user; nothing persisted.
    Cancelled,
}

impl CalibrationStep {
    /// Terminal steps accept no further commands.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CalibrationStep::Complete | CalibrationStep::Cancelled)
    }
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalibrationStep::CollectingMin => "CollectingMin",
            CalibrationStep::Sweeping => "Sweeping",
            CalibrationStep::CollectingMax => "CollectingMax",
            CalibrationStep::Analyzing => "Analyzing",
            CalibrationStep::Complete => "Complete",
            CalibrationStep::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

/// The input a session calibrates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationTarget {
    pub port: PortId,
    pub pin: u8,
    /// The sensor's raw ceiling.
    pub max_hardware_value: u16,
}

impl CalibrationTarget {
    #[must_use]
    pub fn new(port: PortId, pin: u8) -> Self {
        Self {
            port,
            pin,
            max_hardware_value: DEFAULT_MAX_HARDWARE_VALUE,
        }
    }
}

/// Sample gates of the wizard. Defaults are the production reference values.
#[derive(Debug, Clone)]
pub struct CalibrationThresholds {
    pub min_step_samples: usize,
    pub min_distinct_values: usize,
    pub min_sweep_samples: usize,
    /// Allowed min/max-step spread is `ceiling / stability_divisor`.
    pub stability_divisor: u16,
}

impl Default for CalibrationThresholds {
    fn default() -> Self {
        Self {
            min_step_samples: MIN_STEP_SAMPLES,
            min_distinct_values: MIN_DISTINCT_STEP_VALUES,
            min_sweep_samples: MIN_SWEEP_SAMPLES,
            stability_divisor: STABILITY_SPREAD_DIVISOR,
        }
    }
}

/// Wizard progress notifications, broadcast to UI subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum CalibrationEvent {
    SessionStarted {
        port: String,
        pin: u8,
    },
    StepChanged {
        port: String,
        pin: u8,
        step: CalibrationStep,
    },
    SampleCollected {
        port: String,
        pin: u8,
        step: CalibrationStep,
        value: u16,
        count: usize,
    },
    /// Terminal outcome; emitted exactly once per session that reaches
    /// analysis.
    CalibrationResult {
        port: String,
        pin: u8,
        result: Result<CalibrationRecord, String>,
    },
}

/// What an advance produced.
#[derive(Debug)]
enum AdvanceOutcome {
    /// Moved to the next collection step.
    Step(CalibrationStep),
    /// All samples in; analysis produced this record.
    Analyzed(CalibrationRecord),
}

/// Pure wizard state machine. All sample bookkeeping and gate checks live
/// here, synchronously, so they can be tested without timing.
struct CalibrationWizard {
    target: CalibrationTarget,
    thresholds: CalibrationThresholds,
    step: CalibrationStep,
    min_samples: Vec<u16>,
    sweep_samples: Vec<u16>,
    max_samples: Vec<u16>,
}

impl CalibrationWizard {
    fn new(target: CalibrationTarget, thresholds: CalibrationThresholds) -> Self {
        Self {
            target,
            thresholds,
            step: CalibrationStep::CollectingMin,
            min_samples: Vec::new(),
            sweep_samples: Vec::new(),
            max_samples: Vec::new(),
        }
    }

    /// Feed one live value. Returns the step and new sample count when the
    /// current step collects, `None` in non-collecting states.
    fn collect(&mut self, value: u16) -> Option<(CalibrationStep, usize)> {
        let samples = match self.step {
            CalibrationStep::CollectingMin => &mut self.min_samples,
            CalibrationStep::Sweeping => &mut self.sweep_samples,
            CalibrationStep::CollectingMax => &mut self.max_samples,
            _ => return None,
        };
        samples.push(value);
        Some((self.step, samples.len()))
    }

    /// Gate a min/max collection step: enough samples, enough distinct
    /// values, and the lever held still.
    fn check_step_samples(&self, samples: &[u16]) -> Result<(), CalibrationError> {
        let distinct = samples.iter().collect::<HashSet<_>>().len();
        if samples.len() < self.thresholds.min_step_samples
            || distinct < self.thresholds.min_distinct_values
        {
            return Err(CalibrationError::InsufficientSamples {
                collected: samples.len(),
                distinct,
                required: self.thresholds.min_step_samples,
                distinct_required: self.thresholds.min_distinct_values,
            });
        }

        let min = samples.iter().min().copied().unwrap_or(0);
        let max = samples.iter().max().copied().unwrap_or(0);
        let spread = max - min;
        let allowed = self.target.max_hardware_value / self.thresholds.stability_divisor;
        if spread > allowed {
            return Err(CalibrationError::UnstableValue { spread, allowed });
        }
        Ok(())
    }

    /// Try to advance to the next step. Failure leaves the step and its
    /// samples untouched.
    fn advance(&mut self) -> Result<AdvanceOutcome, CalibrationError> {
        match self.step {
            CalibrationStep::CollectingMin => {
                self.check_step_samples(&self.min_samples)?;
                self.step = CalibrationStep::Sweeping;
                Ok(AdvanceOutcome::Step(self.step))
            }
            CalibrationStep::Sweeping => {
                if self.sweep_samples.len() < self.thresholds.min_sweep_samples {
                    return Err(CalibrationError::InsufficientSweepSamples {
                        collected: self.sweep_samples.len(),
                        required: self.thresholds.min_sweep_samples,
                    });
                }
                self.step = CalibrationStep::CollectingMax;
                Ok(AdvanceOutcome::Step(self.step))
            }
            CalibrationStep::CollectingMax => {
                self.check_step_samples(&self.max_samples)?;
                self.step = CalibrationStep::Analyzing;

                let ceiling = self.target.max_hardware_value;
                let characteristics = analyze_sweep(&self.sweep_samples, ceiling);
                let (Some(min_value), Some(max_value)) = (
                    calculate_min(&self.min_samples, characteristics, ceiling),
                    calculate_max(&self.max_samples, &self.min_samples, characteristics, ceiling),
                ) else {
                    // Unreachable past the gates, but never panic over it.
                    return Err(CalibrationError::InsufficientSamples {
                        collected: 0,
                        distinct: 0,
                        required: self.thresholds.min_step_samples,
                        distinct_required: self.thresholds.min_distinct_values,
                    });
                };

                Ok(AdvanceOutcome::Analyzed(CalibrationRecord {
                    min_value,
                    max_value,
                    is_inverted: characteristics.inverted,
                    has_rollover: characteristics.rollover,
                    max_hardware_value: ceiling,
                }))
            }
            CalibrationStep::Analyzing
            | CalibrationStep::Complete
            | CalibrationStep::Cancelled => Err(CalibrationError::AlreadyFinished),
        }
    }

    /// Release every in-memory sample and mark the session cancelled.
    fn cancel(&mut self) {
        self.min_samples = Vec::new();
        self.sweep_samples = Vec::new();
        self.max_samples = Vec::new();
        self.step = CalibrationStep::Cancelled;
    }
}

enum Command {
    Advance {
        reply: oneshot::Sender<Result<CalibrationStep, CalibrationError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Step {
        reply: oneshot::Sender<CalibrationStep>,
    },
}

/// Caller-side handle to a running calibration session.
#[derive(Debug, Clone)]
pub struct CalibrationHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl CalibrationHandle {
    /// Request the transition to the next wizard step.
    ///
    /// # Errors
    ///
    /// Returns the gate error if the current step lacks samples (collected
    /// samples are kept), or `SessionClosed` if the session is gone.
    pub async fn advance(&self) -> Result<CalibrationStep, CalibrationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Advance { reply: reply_tx })
            .await
            .map_err(|_| CalibrationError::SessionClosed)?;
        reply_rx.await.map_err(|_| CalibrationError::SessionClosed)?
    }

    /// Cancel the session, dropping all samples. Nothing is persisted.
    pub async fn cancel(&self) -> Result<(), CalibrationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Cancel { reply: reply_tx })
            .await
            .map_err(|_| CalibrationError::SessionClosed)?;
        reply_rx.await.map_err(|_| CalibrationError::SessionClosed)
    }

    /// Current wizard step.
    pub async fn step(&self) -> Result<CalibrationStep, CalibrationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Step { reply: reply_tx })
            .await
            .map_err(|_| CalibrationError::SessionClosed)?;
        reply_rx.await.map_err(|_| CalibrationError::SessionClosed)
    }
}

/// The calibration session actor.
pub struct CalibrationSession;

impl CalibrationSession {
    /// Spawn a session for one input and return its handle.
    ///
    /// `inputs` is a subscription to the live reading stream; readings for
    /// other ports or pins are ignored. `events` receives the wizard's
    /// progress notifications.
    pub fn spawn<S>(
        target: CalibrationTarget,
        thresholds: CalibrationThresholds,
        inputs: broadcast::Receiver<InputReading>,
        store: S,
        events: broadcast::Sender<CalibrationEvent>,
    ) -> CalibrationHandle
    where
        S: CalibrationStore + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let actor = SessionActor {
            wizard: CalibrationWizard::new(target, thresholds),
            cmd_rx,
            inputs: Some(inputs),
            store,
            events,
        };
        tokio::spawn(actor.run());
        CalibrationHandle { cmd_tx }
    }
}

struct SessionActor<S> {
    wizard: CalibrationWizard,
    cmd_rx: mpsc::Receiver<Command>,
    inputs: Option<broadcast::Receiver<InputReading>>,
    store: S,
    events: broadcast::Sender<CalibrationEvent>,
}

impl<S: CalibrationStore + 'static> SessionActor<S> {
    async fn run(mut self) {
        let port = self.wizard.target.port.to_string();
        let pin = self.wizard.target.pin;
        info!(%port, pin, "calibration session started");
        self.emit(CalibrationEvent::SessionStarted {
            port: port.clone(),
            pin,
        });

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    let Some(command) = command else {
                        debug!(%port, pin, "calibration handle dropped, cancelling");
                        self.wizard.cancel();
                        return;
                    };
                    if self.handle_command(command).await {
                        return;
                    }
                }
                reading = recv_reading(&mut self.inputs), if self.inputs.is_some() => {
                    match reading {
                        Some(reading)
                            if reading.port == self.wizard.target.port
                                && reading.pin == pin =>
                        {
                            if let Some((step, count)) = self.wizard.collect(reading.value) {
                                self.emit(CalibrationEvent::SampleCollected {
                                    port: port.clone(),
                                    pin,
                                    step,
                                    value: reading.value,
                                    count,
                                });
                            }
                        }
                        Some(_) => {}
                        None => {
                            // Input stream gone; keep serving commands so the
                            // caller can still cancel or observe the state.
                            self.inputs = None;
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` when the session reached a terminal state.
    async fn handle_command(&mut self, command: Command) -> bool {
        let port = self.wizard.target.port.to_string();
        let pin = self.wizard.target.pin;

        match command {
            Command::Step { reply } => {
                let _ = reply.send(self.wizard.step);
                false
            }
            Command::Cancel { reply } => {
                self.wizard.cancel();
                info!(%port, pin, "calibration cancelled");
                self.emit(CalibrationEvent::StepChanged {
                    port,
                    pin,
                    step: CalibrationStep::Cancelled,
                });
                let _ = reply.send(());
                true
            }
            Command::Advance { reply } => match self.wizard.advance() {
                Ok(AdvanceOutcome::Step(step)) => {
                    debug!(%port, pin, %step, "calibration step advanced");
                    self.emit(CalibrationEvent::StepChanged { port, pin, step });
                    let _ = reply.send(Ok(step));
                    false
                }
                Ok(AdvanceOutcome::Analyzed(record)) => {
                    self.emit(CalibrationEvent::StepChanged {
                        port: port.clone(),
                        pin,
                        step: CalibrationStep::Analyzing,
                    });
                    let outcome = self.finish(record).await;
                    let _ = reply.send(outcome);
                    true
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    false
                }
            },
        }
    }

    /// Persist the record and emit the terminal result exactly once.
    async fn finish(&mut self, record: CalibrationRecord) -> Result<CalibrationStep, CalibrationError> {
        let port = self.wizard.target.port.clone();
        let pin = self.wizard.target.pin;
        self.wizard.step = CalibrationStep::Complete;

        match self.store.save_calibration(&port, pin, &record).await {
            Ok(()) => {
                info!(port = %port, pin, ?record, "calibration stored");
                self.emit(CalibrationEvent::StepChanged {
                    port: port.to_string(),
                    pin,
                    step: CalibrationStep::Complete,
                });
                self.emit(CalibrationEvent::CalibrationResult {
                    port: port.to_string(),
                    pin,
                    result: Ok(record),
                });
                Ok(CalibrationStep::Complete)
            }
            Err(e) => {
                warn!(port = %port, pin, error = %e, "calibration store failed");
                self.emit(CalibrationEvent::CalibrationResult {
                    port: port.to_string(),
                    pin,
                    result: Err(e.to_string()),
                });
                Err(CalibrationError::Store(e))
            }
        }
    }

    fn emit(&self, event: CalibrationEvent) {
        let _ = self.events.send(event);
    }
}

/// Receive from an optional broadcast subscription, skipping lag gaps.
/// Returns `None` once the stream is closed.
async fn recv_reading(
    inputs: &mut Option<broadcast::Receiver<InputReading>>,
) -> Option<InputReading> {
    let rx = inputs.as_mut()?;
    loop {
        match rx.recv().await {
            Ok(reading) => return Some(reading),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "calibration subscriber lagged behind input stream");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCalibrationStore;
    use std::time::Duration;

    fn target() -> CalibrationTarget {
        CalibrationTarget::new(PortId::new("COM3").unwrap(), 4)
    }

    fn wizard() -> CalibrationWizard {
        CalibrationWizard::new(target(), CalibrationThresholds::default())
    }

    fn feed(wizard: &mut CalibrationWizard, values: &[u16]) {
        for &value in values {
            wizard.collect(value);
        }
    }

    #[test]
    fn advance_with_nine_samples_one_distinct_fails() {
        let mut w = wizard();
        feed(&mut w, &[10; 9]);

        let err = w.advance().unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSamples {
                collected: 9,
                distinct: 1,
                ..
            }
        ));
        assert_eq!(w.step, CalibrationStep::CollectingMin);
        // Samples survive the failed advance.
        assert_eq!(w.min_samples.len(), 9);
    }

    #[test]
    fn advance_with_enough_spread_succeeds() {
        let mut w = wizard();
        feed(&mut w, &[10, 11, 12, 10, 11, 12, 10, 11, 12, 10]);

        match w.advance().unwrap() {
            AdvanceOutcome::Step(step) => assert_eq!(step, CalibrationStep::Sweeping),
            AdvanceOutcome::Analyzed(_) => panic!("unexpected analysis"),
        }
    }

    #[test]
    fn unstable_step_is_rejected() {
        let mut w = wizard();
        // Plenty of samples and spread, but the lever is clearly moving:
        // spread 500 far exceeds 1023/8.
        feed(&mut w, &[0, 100, 200, 300, 400, 500, 400, 300, 200, 100]);

        let err = w.advance().unwrap_err();
        assert!(matches!(err, CalibrationError::UnstableValue { .. }));
    }

    #[test]
    fn sweep_gate_counts_samples_only() {
        let mut w = wizard();
        feed(&mut w, &[10, 11, 12, 10, 11, 12, 10, 11, 12, 10]);
        w.advance().unwrap();

        feed(&mut w, &[20, 40, 60, 80, 100]);
        let err = w.advance().unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSweepSamples {
                collected: 5,
                required: 10
            }
        ));

        feed(&mut w, &[120, 140, 160, 180, 200]);
        match w.advance().unwrap() {
            AdvanceOutcome::Step(step) => assert_eq!(step, CalibrationStep::CollectingMax),
            AdvanceOutcome::Analyzed(_) => panic!("unexpected analysis"),
        }
    }

    #[test]
    fn full_wizard_produces_record() {
        let mut w = wizard();
        feed(&mut w, &[10, 11, 12, 10, 11, 12, 10, 11, 12, 11]);
        w.advance().unwrap();
        feed(&mut w, &[10, 30, 50, 70, 90, 110, 130, 150, 170, 190]);
        w.advance().unwrap();
        feed(&mut w, &[188, 189, 190, 188, 189, 190, 188, 189, 190, 189]);

        match w.advance().unwrap() {
            AdvanceOutcome::Analyzed(record) => {
                assert_eq!(record.min_value, 11);
                assert_eq!(record.max_value, 189);
                assert!(!record.is_inverted);
                assert!(!record.has_rollover);
                assert_eq!(record.max_hardware_value, 1023);
            }
            AdvanceOutcome::Step(step) => panic!("expected analysis, got {step}"),
        }
        assert_eq!(w.step, CalibrationStep::Analyzing);
    }

    #[test]
    fn inverted_sweep_flows_into_record() {
        let mut w = wizard();
        // Sensor wired backwards: minimum position reads high.
        feed(&mut w, &[900, 901, 902, 900, 901, 902, 900, 901, 902, 901]);
        w.advance().unwrap();
        feed(&mut w, &[900, 800, 700, 600, 500, 400, 300, 200, 150, 100]);
        w.advance().unwrap();
        feed(&mut w, &[100, 101, 102, 100, 101, 102, 100, 101, 102, 101]);

        match w.advance().unwrap() {
            AdvanceOutcome::Analyzed(record) => {
                assert!(record.is_inverted);
                // 1023 - 901 and 1023 - 101.
                assert_eq!(record.min_value, 122);
                assert_eq!(record.max_value, 922);
            }
            AdvanceOutcome::Step(step) => panic!("expected analysis, got {step}"),
        }
    }

    #[test]
    fn cancel_releases_samples() {
        let mut w = wizard();
        feed(&mut w, &[10; 20]);
        w.cancel();

        assert_eq!(w.step, CalibrationStep::Cancelled);
        assert!(w.min_samples.is_empty());
        assert!(matches!(
            w.advance().unwrap_err(),
            CalibrationError::AlreadyFinished
        ));
    }

    // Actor-level tests.

    async fn advance_when_ready(handle: &CalibrationHandle) -> CalibrationStep {
        let poll = async {
            loop {
                match handle.advance().await {
                    Ok(step) => return step,
                    Err(
                        CalibrationError::InsufficientSamples { .. }
                        | CalibrationError::InsufficientSweepSamples { .. },
                    ) => tokio::time::sleep(Duration::from_millis(2)).await,
                    Err(e) => panic!("advance failed: {e}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .expect("advance never became ready")
    }

    fn reading(pin: u8, value: u16) -> InputReading {
        InputReading {
            port: PortId::new("COM3").unwrap(),
            pin,
            value,
        }
    }

    #[tokio::test]
    async fn session_runs_end_to_end_and_persists_once() {
        let (input_tx, input_rx) = broadcast::channel(256);
        let (event_tx, mut event_rx) = broadcast::channel(256);
        let store = MemoryCalibrationStore::new();

        let handle = CalibrationSession::spawn(
            target(),
            CalibrationThresholds::default(),
            input_rx,
            store.clone(),
            event_tx,
        );

        // Min hold, with a reading for another pin mixed in. The advance only
        // succeeds once all ten matching readings have been drained, so each
        // batch stays confined to its own step.
        for value in [10, 11, 12, 10, 11, 12, 10, 11, 12, 11] {
            let _ = input_tx.send(reading(4, value));
        }
        let _ = input_tx.send(reading(9, 999));
        assert_eq!(advance_when_ready(&handle).await, CalibrationStep::Sweeping);

        for value in [10, 30, 50, 70, 90, 110, 130, 150, 170, 190] {
            let _ = input_tx.send(reading(4, value));
        }
        assert_eq!(
            advance_when_ready(&handle).await,
            CalibrationStep::CollectingMax
        );

        for value in [188, 189, 190, 188, 189, 190, 188, 189, 190, 189] {
            let _ = input_tx.send(reading(4, value));
        }
        assert_eq!(advance_when_ready(&handle).await, CalibrationStep::Complete);

        // The record was persisted for the right input.
        let record = store
            .get(&PortId::new("COM3").unwrap(), 4)
            .expect("record persisted");
        assert!(!record.is_inverted);

        // Exactly one terminal result event, and it is the success.
        let mut results = 0;
        while let Ok(event) = event_rx.try_recv() {
            if let CalibrationEvent::CalibrationResult { result, .. } = event {
                assert!(result.is_ok());
                results += 1;
            }
        }
        assert_eq!(results, 1);

        // The session is gone after completion.
        assert!(matches!(
            handle.step().await,
            Err(CalibrationError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn cancelled_session_persists_nothing() {
        let (_input_tx, input_rx) = broadcast::channel::<InputReading>(16);
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let store = MemoryCalibrationStore::new();

        let handle = CalibrationSession::spawn(
            target(),
            CalibrationThresholds::default(),
            input_rx,
            store.clone(),
            event_tx,
        );

        handle.cancel().await.unwrap();
        assert!(store.is_empty());

        let mut saw_cancelled = false;
        while let Ok(event) = event_rx.try_recv() {
            match event {
                CalibrationEvent::StepChanged {
                    step: CalibrationStep::Cancelled,
                    ..
                } => saw_cancelled = true,
                CalibrationEvent::CalibrationResult { .. } => {
                    panic!("cancelled session must not emit a result")
                }
                _ => {}
            }
        }
        assert!(saw_cancelled);
    }

    #[tokio::test]
    async fn failed_advance_keeps_samples_and_session_alive() {
        let (input_tx, input_rx) = broadcast::channel(64);
        let (event_tx, _event_rx) = broadcast::channel(64);
        let store = MemoryCalibrationStore::new();

        let handle = CalibrationSession::spawn(
            target(),
            CalibrationThresholds::default(),
            input_rx,
            store.clone(),
            event_tx,
        );

        // Nothing collected yet: advance must fail and leave the session on
        // the first step.
        let err = handle.advance().await.unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientSamples { .. }));
        assert_eq!(handle.step().await.unwrap(), CalibrationStep::CollectingMin);

        // After enough signal it advances normally.
        for value in [10, 11, 12, 10, 11, 12, 10, 11, 12, 11] {
            let _ = input_tx.send(reading(4, value));
        }
        assert_eq!(advance_when_ready(&handle).await, CalibrationStep::Sweeping);
    }
}
