//! Connection registry: the single owner of the port map.
//!
//! The registry runs as one actor task holding `port -> DeviceConnection`.
//! Sessions never touch the map; they report lifecycle changes over an
//! update channel and the registry folds them in. Callers hold a clonable
//! [`RegistryHandle`] whose methods are message sends with oneshot replies,
//! so no lock is ever shared across tasks.
//!
//! Scans are idempotent: a tracked, non-failed port is a no-op; a failed
//! port is respawned only once its backoff window has elapsed; ports that
//! vanished from the host enumeration are dropped. Every state change
//! publishes a fresh device-list snapshot on the event channel.

use crate::connection::{ConnectionStatus, DeviceConnection, DeviceSnapshot, eligible_for_retry};
use crate::error::DeviceError;
use crate::events::RegistryEvent;
use crate::session::{DeviceSession, SessionCommand, SessionConfig, SessionHandle, SessionUpdate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use simpanel_core::constants::RECONNECT_BACKOFF_MS;
use simpanel_core::{InputConfig, InputReading, PortId};
use simpanel_ports::{PortProvider, filter_candidate_ports};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry configuration. Defaults are the production reference values.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Minimum wait before a failed port is rescanned.
    pub backoff: Duration,
    /// Timing configuration handed to each spawned session.
    pub session: SessionConfig,
    /// Capacity of the registry event broadcast channel.
    pub events_capacity: usize,
    /// Capacity of the live input reading broadcast channel.
    pub inputs_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(RECONNECT_BACKOFF_MS),
            session: SessionConfig::default(),
            events_capacity: 64,
            inputs_capacity: 1024,
        }
    }
}

/// Result of one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Ports a session was spawned for (new candidates and expired backoffs).
    pub started: Vec<String>,
    /// Tracked ports dropped because the host no longer lists them.
    pub removed: Vec<String>,
}

enum RegistryCommand {
    Scan {
        reply: oneshot::Sender<Result<ScanSummary, DeviceError>>,
    },
    ListDevices {
        reply: oneshot::Sender<Vec<DeviceSnapshot>>,
    },
    Disconnect {
        port: PortId,
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
    ApplyConfiguration {
        port: PortId,
        config_id: u32,
        inputs: Vec<InputConfig>,
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
    ReadValue {
        port: PortId,
        pin: u8,
        reply: oneshot::Sender<Result<Option<u16>, DeviceError>>,
    },
    RequestUploadAccess {
        port: PortId,
        reply: oneshot::Sender<Result<Uuid, DeviceError>>,
    },
    ReleaseUploadAccess {
        port: PortId,
        token: Uuid,
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
}

struct Entry {
    connection: DeviceConnection,
    session: Option<SessionHandle>,
    /// Spawn generation; updates from earlier generations are stale.
    epoch: u64,
}

/// Clonable front door to the registry actor.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<RegistryEvent>,
    inputs: broadcast::Sender<InputReading>,
}

impl RegistryHandle {
    /// Trigger enumeration and session spawning for new candidates.
    pub async fn scan(&self) -> Result<ScanSummary, DeviceError> {
        self.request(|reply| RegistryCommand::Scan { reply }).await?
    }

    /// Snapshot of every tracked connection.
    pub async fn list_devices(&self) -> Result<Vec<DeviceSnapshot>, DeviceError> {
        self.request(|reply| RegistryCommand::ListDevices { reply })
            .await
    }

    /// Tear down the session on `port`, closing its handle regardless of
    /// state, and drop the port from the registry.
    pub async fn disconnect(&self, port: &PortId) -> Result<(), DeviceError> {
        self.request(|reply| RegistryCommand::Disconnect {
            port: port.clone(),
            reply,
        })
        .await?
    }

    /// Push a configuration to a connected device and wait for its
    /// acknowledgement.
    pub async fn apply_configuration(
        &self,
        port: &PortId,
        config_id: u32,
        inputs: Vec<InputConfig>,
    ) -> Result<(), DeviceError> {
        self.request(|reply| RegistryCommand::ApplyConfiguration {
            port: port.clone(),
            config_id,
            inputs,
            reply,
        })
        .await?
    }

    /// Latest streamed value for one pin, if any has arrived.
    pub async fn read_value(&self, port: &PortId, pin: u8) -> Result<Option<u16>, DeviceError> {
        self.request(|reply| RegistryCommand::ReadValue {
            port: port.clone(),
            pin,
            reply,
        })
        .await?
    }

    /// Acquire the upload lease for `port`, tearing down any live session so
    /// flashing and protocol traffic never interleave.
    pub async fn request_upload_access(&self, port: &PortId) -> Result<Uuid, DeviceError> {
        self.request(|reply| RegistryCommand::RequestUploadAccess {
            port: port.clone(),
            reply,
        })
        .await?
    }

    /// Release a previously acquired upload lease.
    pub async fn release_upload_access(
        &self,
        port: &PortId,
        token: Uuid,
    ) -> Result<(), DeviceError> {
        self.request(|reply| RegistryCommand::ReleaseUploadAccess {
            port: port.clone(),
            token,
            reply,
        })
        .await?
    }

    /// Subscribe to connectivity and upload lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Subscribe to the live input reading stream.
    #[must_use]
    pub fn subscribe_inputs(&self) -> broadcast::Receiver<InputReading> {
        self.inputs.subscribe()
    }

    pub(crate) fn publish(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| DeviceError::RegistryClosed)?;
        reply_rx.await.map_err(|_| DeviceError::RegistryClosed)
    }
}

/// The registry actor.
pub struct ConnectionRegistry<P: PortProvider> {
    provider: P,
    config: RegistryConfig,
    entries: HashMap<PortId, Entry>,
    next_epoch: u64,
    cmd_rx: mpsc::Receiver<RegistryCommand>,
    update_tx: mpsc::Sender<SessionUpdate>,
    update_rx: mpsc::Receiver<SessionUpdate>,
    events: broadcast::Sender<RegistryEvent>,
    inputs: broadcast::Sender<InputReading>,
}

impl<P> ConnectionRegistry<P>
where
    P: PortProvider + Clone + 'static,
    P::Handle: 'static,
{
    /// Spawn the registry actor and return its handle.
    #[must_use]
    pub fn spawn(provider: P, config: RegistryConfig) -> RegistryHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (update_tx, update_rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(config.events_capacity);
        let (inputs, _) = broadcast::channel(config.inputs_capacity);

        let registry = ConnectionRegistry {
            provider,
            config,
            entries: HashMap::new(),
            next_epoch: 0,
            cmd_rx,
            update_tx,
            update_rx,
            events: events.clone(),
            inputs: inputs.clone(),
        };
        let handle = RegistryHandle {
            cmd_tx,
            events,
            inputs,
        };
        tokio::spawn(registry.run());
        handle
    }

    async fn run(mut self) {
        info!("connection registry started");
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    let Some(command) = command else {
                        info!("connection registry shutting down");
                        return;
                    };
                    self.handle_command(command).await;
                }
                update = self.update_rx.recv() => {
                    // The registry holds its own sender, so this never closes.
                    if let Some(update) = update {
                        self.handle_update(update);
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Scan { reply } => {
                let _ = reply.send(self.scan().await);
            }
            RegistryCommand::ListDevices { reply } => {
                let _ = reply.send(self.snapshots());
            }
            RegistryCommand::Disconnect { port, reply } => self.disconnect(port, reply),
            RegistryCommand::ApplyConfiguration {
                port,
                config_id,
                inputs,
                reply,
            } => self.apply_configuration(port, config_id, inputs, reply),
            RegistryCommand::ReadValue { port, pin, reply } => self.read_value(port, pin, reply),
            RegistryCommand::RequestUploadAccess { port, reply } => {
                let _ = reply.send(self.request_upload_access(port));
            }
            RegistryCommand::ReleaseUploadAccess { port, token, reply } => {
                let _ = reply.send(self.release_upload_access(port, token));
            }
        }
    }

    async fn scan(&mut self) -> Result<ScanSummary, DeviceError> {
        let ports = self.provider.enumerate().await?;
        let candidates = filter_candidate_ports(ports);
        let mut summary = ScanSummary::default();
        let mut changed = false;

        // Drop tracked ports the host no longer lists; their sessions notice
        // the closed command channel and wind down on their own.
        let gone: Vec<PortId> = self
            .entries
            .keys()
            .filter(|port| !candidates.contains(port))
            .cloned()
            .collect();
        for port in gone {
            debug!(port = %port, "port disappeared from enumeration");
            self.entries.remove(&port);
            summary.removed.push(port.to_string());
            changed = true;
        }

        let now = Instant::now();
        for port in candidates {
            match self.entries.get_mut(&port) {
                None => {
                    self.start_session(port.clone());
                    summary.started.push(port.to_string());
                    changed = true;
                }
                Some(entry) if entry.connection.upload_token.is_some() => {
                    // Leased for flashing; leave it alone.
                }
                Some(entry) if entry.connection.status == ConnectionStatus::Failed => {
                    let expired = entry
                        .connection
                        .failed_at
                        .is_none_or(|failed_at| eligible_for_retry(failed_at, now, self.config.backoff));
                    if expired {
                        entry.connection.reset_for_retry();
                        self.start_session(port.clone());
                        summary.started.push(port.to_string());
                        changed = true;
                    }
                }
                Some(_) => {
                    // Already tracked and live; concurrent scans are no-ops.
                }
            }
        }

        if changed {
            self.publish_devices();
        }
        Ok(summary)
    }

    fn start_session(&mut self, port: PortId) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let session = DeviceSession::spawn(
            port.clone(),
            epoch,
            self.provider.clone(),
            self.config.session.clone(),
            self.update_tx.clone(),
            self.inputs.clone(),
        );

        let entry = self.entries.entry(port.clone()).or_insert_with(|| Entry {
            connection: DeviceConnection::new(port),
            session: None,
            epoch,
        });
        entry.session = Some(session);
        entry.epoch = epoch;
    }

    fn disconnect(&mut self, port: PortId, reply: oneshot::Sender<Result<(), DeviceError>>) {
        let Some(entry) = self.entries.get_mut(&port) else {
            let _ = reply.send(Err(DeviceError::unknown_port(port.as_str())));
            return;
        };

        match entry.session.take() {
            Some(session) => {
                // Forward the caller's reply straight to the session; the
                // entry is dropped when its Disconnected update arrives.
                if entry.connection.status.can_transition_to(ConnectionStatus::Disconnecting) {
                    entry.connection.status = ConnectionStatus::Disconnecting;
                }
                match session.cmd_tx.try_send(SessionCommand::Disconnect { reply }) {
                    Ok(()) => self.publish_devices(),
                    Err(TrySendError::Full(SessionCommand::Disconnect { reply }))
                    | Err(TrySendError::Closed(SessionCommand::Disconnect { reply })) => {
                        // Session unreachable; drop the entry ourselves.
                        self.entries.remove(&port);
                        self.publish_devices();
                        let _ = reply.send(Ok(()));
                    }
                    Err(_) => unreachable!("disconnect command returns itself"),
                }
            }
            None => {
                // No live session (failed or mid-flash); dropping the record
                // is all there is to do.
                self.entries.remove(&port);
                self.publish_devices();
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn apply_configuration(
        &mut self,
        port: PortId,
        config_id: u32,
        inputs: Vec<InputConfig>,
        reply: oneshot::Sender<Result<(), DeviceError>>,
    ) {
        let Some(entry) = self.entries.get(&port) else {
            let _ = reply.send(Err(DeviceError::unknown_port(port.as_str())));
            return;
        };
        if entry.connection.upload_token.is_some() {
            let _ = reply.send(Err(DeviceError::UploadInProgress {
                port: port.to_string(),
            }));
            return;
        }
        if entry.connection.status != ConnectionStatus::Connected {
            let _ = reply.send(Err(DeviceError::not_connected(port.as_str())));
            return;
        }
        let Some(session) = entry.session.as_ref() else {
            let _ = reply.send(Err(DeviceError::not_connected(port.as_str())));
            return;
        };

        let command = SessionCommand::ApplyConfiguration {
            config_id,
            inputs,
            reply,
        };
        Self::forward(session, command, &port);
    }

    fn read_value(
        &mut self,
        port: PortId,
        pin: u8,
        reply: oneshot::Sender<Result<Option<u16>, DeviceError>>,
    ) {
        let Some(entry) = self.entries.get(&port) else {
            let _ = reply.send(Err(DeviceError::unknown_port(port.as_str())));
            return;
        };
        let Some(session) = entry.session.as_ref() else {
            let _ = reply.send(Err(DeviceError::not_connected(port.as_str())));
            return;
        };
        Self::forward(session, SessionCommand::ReadValue { pin, reply }, &port);
    }

    /// Forward a command to a session without ever blocking the actor on a
    /// stuck session. The reply channel travels inside the command.
    fn forward(session: &SessionHandle, command: SessionCommand, port: &PortId) {
        match session.cmd_tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                Self::reply_error(command, DeviceError::SessionBusy {
                    port: port.to_string(),
                });
            }
            Err(TrySendError::Closed(command)) => {
                Self::reply_error(command, DeviceError::not_connected(port.as_str()));
            }
        }
    }

    fn reply_error(command: SessionCommand, error: DeviceError) {
        match command {
            SessionCommand::ApplyConfiguration { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::ReadValue { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::Disconnect { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }

    fn request_upload_access(&mut self, port: PortId) -> Result<Uuid, DeviceError> {
        let Some(entry) = self.entries.get_mut(&port) else {
            return Err(DeviceError::unknown_port(port.as_str()));
        };
        if entry.connection.upload_token.is_some() {
            return Err(DeviceError::UploadInProgress {
                port: port.to_string(),
            });
        }

        let token = Uuid::new_v4();
        entry.connection.upload_token = Some(token);

        // Tear down any live session so the flasher gets the port to itself.
        if let Some(session) = entry.session.take() {
            if entry.connection.status.can_transition_to(ConnectionStatus::Disconnecting) {
                entry.connection.status = ConnectionStatus::Disconnecting;
            }
            let (reply, _ignored) = oneshot::channel();
            let _ = session.cmd_tx.try_send(SessionCommand::Disconnect { reply });
        }

        info!(port = %port, "upload lease acquired");
        self.publish_devices();
        Ok(token)
    }

    fn release_upload_access(&mut self, port: PortId, token: Uuid) -> Result<(), DeviceError> {
        let Some(entry) = self.entries.get_mut(&port) else {
            return Err(DeviceError::unknown_port(port.as_str()));
        };
        if entry.connection.upload_token != Some(token) {
            return Err(DeviceError::LeaseMismatch {
                port: port.to_string(),
            });
        }

        entry.connection.upload_token = None;
        // The session was torn down when the lease was taken; drop the record
        // and let the next scan rediscover the device on fresh firmware.
        if entry.session.is_none() {
            self.entries.remove(&port);
        }
        info!(port = %port, "upload lease released");
        self.publish_devices();
        Ok(())
    }

    fn handle_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Connecting { port, epoch } => {
                if let Some(connection) = self.current(&port, epoch)
                    && connection.transition(ConnectionStatus::Connecting).is_ok()
                {
                    self.publish_devices();
                }
            }
            SessionUpdate::Connected {
                port,
                epoch,
                version,
                config_id,
            } => {
                if let Some(connection) = self.current(&port, epoch)
                    && connection.transition(ConnectionStatus::Connected).is_ok()
                {
                    connection.version = Some(version);
                    connection.config_id = config_id;
                    connection.error_reason = None;
                    connection.connected_at = Some(Utc::now());
                    self.publish_devices();
                }
            }
            SessionUpdate::ConfigurationStored {
                port,
                epoch,
                config_id,
            } => {
                if let Some(connection) = self.current(&port, epoch) {
                    connection.config_id = Some(config_id);
                    self.publish_devices();
                }
            }
            SessionUpdate::Failed {
                port,
                epoch,
                reason,
                failed_at,
            } => {
                if let Some(entry) = self.entries.get_mut(&port)
                    && entry.epoch == epoch
                {
                    entry.connection.mark_failed(reason, failed_at);
                    entry.session = None;
                    self.publish_devices();
                }
            }
            SessionUpdate::Disconnected { port, epoch } => {
                let Some(entry) = self.entries.get_mut(&port) else {
                    return;
                };
                if entry.epoch != epoch {
                    return;
                }
                entry.session = None;
                if entry.connection.upload_token.is_none() {
                    // Explicit disconnects forget the device; a later scan
                    // rediscovers it if it is still plugged in.
                    self.entries.remove(&port);
                } else {
                    debug!(port = %port, "session parked for firmware upload");
                }
                self.publish_devices();
            }
        }
    }

    /// Current connection record for `port`, ignoring stale session epochs.
    fn current(&mut self, port: &PortId, epoch: u64) -> Option<&mut DeviceConnection> {
        match self.entries.get_mut(port) {
            Some(entry) if entry.epoch == epoch => Some(&mut entry.connection),
            Some(_) => {
                warn!(port = %port, "ignoring update from superseded session");
                None
            }
            None => None,
        }
    }

    fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut devices: Vec<DeviceSnapshot> = self
            .entries
            .values()
            .map(|entry| entry.connection.snapshot())
            .collect();
        devices.sort_by(|a, b| a.port.cmp(&b.port));
        devices
    }

    fn publish_devices(&self) {
        let _ = self.events.send(RegistryEvent::DeviceListChanged {
            devices: self.snapshots(),
        });
    }
}
