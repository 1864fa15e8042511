//! Per-port device session.
//!
//! One session task owns one port for its whole lifetime: open, identity
//! handshake, connected streaming, teardown. The session is the only code
//! that touches the port handle, so a slow or wedged device stalls nothing
//! but its own task. It reports lifecycle changes to the registry over an
//! update channel and fans live input readings out on a broadcast channel.
//!
//! # Handshake
//!
//! On start the session opens the port, sends an identity request with a
//! fresh request id, drains, and reads with a short timeout. Three outcomes:
//!
//! - a matching identity response (correlated by request id, not arrival
//!   order) connects the session;
//! - a read timeout fails immediately, with no retry - an absent device will
//!   not become present by asking again;
//! - decoded messages of the wrong type (stray heartbeats, buffered input
//!   values) are retried up to a bound; exhaustion is a distinct
//!   `no_valid_response` failure pointing at incompatible firmware.
//!
//! # Connected loop
//!
//! The loop alternates draining the command mailbox (non-blocking) with
//! bounded port reads. Read timeouts while connected are benign; decode
//! errors are logged and the codec resynchronizes; any other I/O error fails
//! the session. Failure always closes the handle, clears tracked values, and
//! reports upward before the task exits.

use crate::error::DeviceError;
use bytes::BytesMut;
use simpanel_core::constants::{
    CONFIG_ACK_TIMEOUT_MS, CONNECTED_READ_POLL_MS, HANDSHAKE_READ_ATTEMPTS,
    HANDSHAKE_READ_TIMEOUT_MS,
};
use simpanel_core::{FirmwareVersion, InputConfig, InputReading, PortId};
use simpanel_ports::{PortHandle, PortProvider};
use simpanel_protocol::{CodecError, Message, PanelCodec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, info, trace, warn};

/// Timing configuration of one session. Defaults are the production
/// reference values; tests shrink them.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity response read timeout.
    pub handshake_timeout: Duration,
    /// Wrong-type messages tolerated during the handshake.
    pub handshake_attempts: u32,
    /// Bound on waiting for a configuration acknowledgement.
    pub config_ack_timeout: Duration,
    /// Per-iteration read bound of the connected loop.
    pub read_poll: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(HANDSHAKE_READ_TIMEOUT_MS),
            handshake_attempts: HANDSHAKE_READ_ATTEMPTS,
            config_ack_timeout: Duration::from_millis(CONFIG_ACK_TIMEOUT_MS),
            read_poll: Duration::from_millis(CONNECTED_READ_POLL_MS),
        }
    }
}

/// Commands accepted by a running session.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    ApplyConfiguration {
        config_id: u32,
        inputs: Vec<InputConfig>,
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
    ReadValue {
        pin: u8,
        reply: oneshot::Sender<Result<Option<u16>, DeviceError>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
}

/// Lifecycle reports from a session to the registry.
///
/// `epoch` identifies which spawn of the port's session sent the update, so
/// a late report from a superseded session can never corrupt the record of
/// its replacement.
#[derive(Debug)]
pub(crate) enum SessionUpdate {
    Connecting {
        port: PortId,
        epoch: u64,
    },
    Connected {
        port: PortId,
        epoch: u64,
        version: FirmwareVersion,
        config_id: Option<u32>,
    },
    ConfigurationStored {
        port: PortId,
        epoch: u64,
        config_id: u32,
    },
    Failed {
        port: PortId,
        epoch: u64,
        reason: String,
        failed_at: Instant,
    },
    Disconnected {
        port: PortId,
        epoch: u64,
    },
}

/// Registry-side handle to a spawned session.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) cmd_tx: mpsc::Sender<SessionCommand>,
    _task: JoinHandle<()>,
}

static REQUEST_ID: AtomicU32 = AtomicU32::new(1);

fn next_request_id() -> u32 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// How the connected loop ended.
enum DriveOutcome {
    /// Explicit disconnect, or the registry dropped us.
    Disconnected,
    /// Fatal I/O or protocol failure.
    Failed(String),
}

pub(crate) struct DeviceSession<P: PortProvider> {
    port: PortId,
    epoch: u64,
    provider: P,
    codec: PanelCodec,
    buffer: BytesMut,
    values: HashMap<u8, u16>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    updates: mpsc::Sender<SessionUpdate>,
    inputs: broadcast::Sender<InputReading>,
    config: SessionConfig,
    last_heartbeat: Option<Instant>,
}

impl<P> DeviceSession<P>
where
    P: PortProvider + 'static,
    P::Handle: 'static,
{
    /// Spawn the session task for one candidate port.
    pub(crate) fn spawn(
        port: PortId,
        epoch: u64,
        provider: P,
        config: SessionConfig,
        updates: mpsc::Sender<SessionUpdate>,
        inputs: broadcast::Sender<InputReading>,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let session = DeviceSession {
            port,
            epoch,
            provider,
            codec: PanelCodec::new(),
            buffer: BytesMut::with_capacity(1024),
            values: HashMap::new(),
            cmd_rx,
            updates,
            inputs,
            config,
            last_heartbeat: None,
        };
        let task = tokio::spawn(session.run());
        SessionHandle {
            cmd_tx,
            _task: task,
        }
    }

    async fn run(mut self) {
        debug!(port = %self.port, "device session started");

        let mut handle = match self.provider.open(&self.port).await {
            Ok(handle) => handle,
            Err(e) => {
                self.report_failed(e.to_string()).await;
                return;
            }
        };
        self.send_update(SessionUpdate::Connecting {
            port: self.port.clone(),
            epoch: self.epoch,
        })
        .await;

        let request_id = next_request_id();
        match self.handshake(&mut handle, request_id).await {
            Ok((version, config_id)) => {
                info!(port = %self.port, %version, ?config_id, "device connected");
                self.send_update(SessionUpdate::Connected {
                    port: self.port.clone(),
                    epoch: self.epoch,
                    version,
                    config_id,
                })
                .await;
            }
            Err(e) => {
                let _ = handle.close().await;
                self.report_failed(e.to_string()).await;
                return;
            }
        }

        let outcome = self.drive(&mut handle).await;
        let _ = handle.close().await;
        self.values.clear();
        match outcome {
            DriveOutcome::Disconnected => {
                info!(port = %self.port, "device session disconnected");
                self.send_update(SessionUpdate::Disconnected {
                    port: self.port.clone(),
                    epoch: self.epoch,
                })
                .await;
            }
            DriveOutcome::Failed(reason) => self.report_failed(reason).await,
        }
    }

    /// Identity exchange. `request_id` correlates the response; anything else
    /// decoded meanwhile counts against the wrong-type bound.
    async fn handshake(
        &mut self,
        handle: &mut P::Handle,
        request_id: u32,
    ) -> Result<(FirmwareVersion, Option<u32>), DeviceError> {
        let frame = Message::IdentityRequest { request_id }.encode()?;
        handle.write(&frame).await?;
        handle.drain().await?;

        let mut wrong = 0u32;
        loop {
            let bytes = match handle.read(self.config.handshake_timeout).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_timeout() => {
                    return Err(DeviceError::handshake_timeout(self.port.as_str()));
                }
                Err(e) => return Err(e.into()),
            };
            self.buffer.extend_from_slice(&bytes);

            while let Some(message) = self.next_message() {
                match message {
                    Message::IdentityResponse {
                        request_id: id,
                        config_id,
                        version,
                    } if id == request_id => {
                        // A config id of zero means the device is unconfigured.
                        return Ok((version, (config_id != 0).then_some(config_id)));
                    }
                    other => {
                        wrong += 1;
                        debug!(
                            port = %self.port,
                            message = ?other,
                            attempt = wrong,
                            "unexpected message during handshake"
                        );
                        if wrong >= self.config.handshake_attempts {
                            return Err(DeviceError::no_valid_response(self.port.as_str(), wrong));
                        }
                    }
                }
            }
        }
    }

    /// Connected loop: drain commands, then read. Commands are drained
    /// without blocking so each port read runs to completion; command latency
    /// is bounded by `read_poll`.
    async fn drive(&mut self, handle: &mut P::Handle) -> DriveOutcome {
        loop {
            loop {
                match self.cmd_rx.try_recv() {
                    Ok(SessionCommand::Disconnect { reply }) => {
                        let _ = reply.send(Ok(()));
                        return DriveOutcome::Disconnected;
                    }
                    Ok(SessionCommand::ReadValue { pin, reply }) => {
                        let _ = reply.send(Ok(self.values.get(&pin).copied()));
                    }
                    Ok(SessionCommand::ApplyConfiguration {
                        config_id,
                        inputs,
                        reply,
                    }) => {
                        let result = self.apply_configuration(handle, config_id, inputs).await;
                        let fatal = result
                            .as_ref()
                            .err()
                            .map(|e| (e.is_fatal_io(), e.to_string()));
                        let _ = reply.send(result);
                        if let Some((true, reason)) = fatal {
                            return DriveOutcome::Failed(reason);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return DriveOutcome::Disconnected,
                }
            }

            match handle.read(self.config.read_poll).await {
                Ok(bytes) => {
                    self.buffer.extend_from_slice(&bytes);
                    while let Some(message) = self.next_message() {
                        self.dispatch(message);
                    }
                }
                Err(e) if e.is_timeout() => {
                    // Idle device; heartbeats keep their own cadence.
                }
                Err(e) => return DriveOutcome::Failed(e.to_string()),
            }
        }
    }

    /// Push a configuration and wait (bounded) for the correlated store or
    /// reject acknowledgement. Live values keep flowing while waiting.
    async fn apply_configuration(
        &mut self,
        handle: &mut P::Handle,
        config_id: u32,
        inputs: Vec<InputConfig>,
    ) -> Result<(), DeviceError> {
        if inputs.is_empty() {
            return Err(DeviceError::NoInputs);
        }

        let frame = Message::ConfigurationApply { config_id, inputs }.encode()?;
        handle.write(&frame).await?;
        handle.drain().await?;

        let deadline = tokio::time::Instant::now() + self.config.config_ack_timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(DeviceError::ConfigurationTimeout { config_id });
            }
            let window = (deadline - now).min(self.config.read_poll);

            match handle.read(window).await {
                Ok(bytes) => {
                    self.buffer.extend_from_slice(&bytes);
                    while let Some(message) = self.next_message() {
                        match message {
                            Message::ConfigurationStored { config_id: id } if id == config_id => {
                                self.send_update(SessionUpdate::ConfigurationStored {
                                    port: self.port.clone(),
                                    epoch: self.epoch,
                                    config_id,
                                })
                                .await;
                                return Ok(());
                            }
                            Message::ConfigurationError { config_id: id } if id == config_id => {
                                return Err(DeviceError::DeviceRejected { config_id });
                            }
                            other => self.dispatch(other),
                        }
                    }
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Decode the next complete message from the read buffer. Decode errors
    /// are logged and skipped; the codec resynchronizes byte by byte.
    fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(message)) => return Some(message),
                Ok(None) => return None,
                Err(CodecError::Decode(e)) => {
                    warn!(port = %self.port, error = %e, "skipping undecodable byte");
                }
                Err(e) => {
                    warn!(port = %self.port, error = %e, "codec error");
                    return None;
                }
            }
        }
    }

    /// Route a decoded message in the connected state.
    fn dispatch(&mut self, message: Message) {
        match message {
            Message::InputValue { pin, value } => {
                self.values.insert(pin, value);
                let _ = self.inputs.send(InputReading {
                    port: self.port.clone(),
                    pin,
                    value,
                });
            }
            Message::Heartbeat => {
                self.last_heartbeat = Some(Instant::now());
                trace!(port = %self.port, "heartbeat");
            }
            other => {
                debug!(port = %self.port, message = ?other, "ignoring unexpected message");
            }
        }
    }

    async fn report_failed(&mut self, reason: String) {
        warn!(port = %self.port, %reason, "device session failed");
        self.values.clear();
        self.send_update(SessionUpdate::Failed {
            port: self.port.clone(),
            epoch: self.epoch,
            reason,
            failed_at: Instant::now(),
        })
        .await;
    }

    async fn send_update(&self, update: SessionUpdate) {
        // The registry may already be gone during shutdown; nothing to do.
        let _ = self.updates.send(update).await;
    }
}
