//! Integration tests for the connection registry over the mock port layer.
//!
//! These tests exercise the full public surface: scan filtering, idempotent
//! scans, backoff gating, connect/disconnect lifecycle, configuration pushes,
//! and upload leases. Devices are played by scripted mock ports.

use simpanel_core::{InputConfig, InputKind, PortId};
use simpanel_device::{
    ConnectionRegistry, ConnectionStatus, DeviceError, DeviceSnapshot, RegistryConfig,
    RegistryHandle, SessionConfig,
};
use simpanel_ports::{MockPortController, MockPortProvider};
use simpanel_protocol::Message;
use std::time::Duration;

fn port(name: &str) -> PortId {
    PortId::new(name).unwrap()
}

fn test_config() -> RegistryConfig {
    RegistryConfig {
        backoff: Duration::from_millis(30_000),
        session: SessionConfig {
            handshake_timeout: Duration::from_millis(50),
            handshake_attempts: 3,
            config_ack_timeout: Duration::from_millis(200),
            read_poll: Duration::from_millis(10),
        },
        ..RegistryConfig::default()
    }
}

/// Scan freshly written bytes for protocol messages of interest.
fn decode_all(mut bytes: &[u8]) -> Vec<Message> {
    let mut messages = Vec::new();
    while !bytes.is_empty() {
        match Message::decode(bytes) {
            Ok(Some((message, consumed))) => {
                messages.push(message);
                bytes = &bytes[consumed..];
            }
            Ok(None) => break,
            Err(_) => bytes = &bytes[1..],
        }
    }
    messages
}

/// Wait for the session's identity request and answer it.
async fn respond_identity(controller: &MockPortController, config_id: u32, version: &str) {
    loop {
        let request_id = decode_all(&controller.take_written())
            .into_iter()
            .find_map(|message| match message {
                Message::IdentityRequest { request_id } => Some(request_id),
                _ => None,
            });
        if let Some(request_id) = request_id {
            let response = Message::IdentityResponse {
                request_id,
                config_id,
                version: simpanel_core::FirmwareVersion::new(version).unwrap(),
            };
            controller.push_read(&response.encode().unwrap());
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Poll the registry until `name` reaches `status`.
async fn await_status(
    registry: &RegistryHandle,
    name: &str,
    status: ConnectionStatus,
) -> DeviceSnapshot {
    let poll = async {
        loop {
            let devices = registry.list_devices().await.unwrap();
            if let Some(device) = devices
                .into_iter()
                .find(|d| d.port == name && d.status == status)
            {
                return device;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .unwrap_or_else(|_| panic!("{name} never reached {status}"))
}

async fn await_empty(registry: &RegistryHandle) {
    let poll = async {
        loop {
            if registry.list_devices().await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("registry never emptied");
}

#[tokio::test]
async fn scan_skips_ignored_ports() {
    let provider = MockPortProvider::new();
    provider.add_port(port("COM3"));
    provider.add_port(port("/dev/cu.Bluetooth-Incoming-Port"));
    provider.add_port(port("/dev/cu.wlan-debug"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    let summary = registry.scan().await.unwrap();

    assert_eq!(summary.started, vec!["COM3".to_string()]);
    let devices = registry.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].port, "COM3");
}

#[tokio::test]
async fn concurrent_scans_are_idempotent() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    let first = registry.scan().await.unwrap();
    let second = registry.scan().await.unwrap();

    assert_eq!(first.started, vec!["COM3".to_string()]);
    assert!(second.started.is_empty());
    assert_eq!(controller.open_count(), 1);
}

#[tokio::test]
async fn connect_records_version_and_config_id() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    registry.scan().await.unwrap();
    respond_identity(&controller, 12, "1.2.0").await;

    let device = await_status(&registry, "COM3", ConnectionStatus::Connected).await;
    assert_eq!(device.version.as_deref(), Some("1.2.0"));
    assert_eq!(device.config_id, Some(12));
    assert!(device.connected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_port_respects_backoff_window() {
    let provider = MockPortProvider::new();
    // No scripted identity response: the handshake read times out.
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    registry.scan().await.unwrap();

    let device = await_status(&registry, "COM3", ConnectionStatus::Failed).await;
    assert!(device.error_reason.is_some());
    assert_eq!(controller.open_count(), 1);

    // Well inside the backoff window: scans must not respawn.
    let summary = registry.scan().await.unwrap();
    assert!(summary.started.is_empty());
    assert_eq!(controller.open_count(), 1);

    // Past the window the port becomes eligible again.
    tokio::time::advance(Duration::from_millis(30_000)).await;
    let summary = registry.scan().await.unwrap();
    assert_eq!(summary.started, vec!["COM3".to_string()]);

    await_status(&registry, "COM3", ConnectionStatus::Failed).await;
    assert_eq!(controller.open_count(), 2);
}

#[tokio::test]
async fn vanished_port_is_dropped_from_registry() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider.clone(), test_config());
    registry.scan().await.unwrap();
    respond_identity(&controller, 0, "1.0.0").await;
    await_status(&registry, "COM3", ConnectionStatus::Connected).await;

    provider.remove_port(&port("COM3"));
    let summary = registry.scan().await.unwrap();
    assert_eq!(summary.removed, vec!["COM3".to_string()]);
    assert!(registry.list_devices().await.unwrap().is_empty());
}

#[tokio::test]
async fn disconnect_closes_handle_and_forgets_device() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    registry.scan().await.unwrap();
    respond_identity(&controller, 0, "1.0.0").await;
    await_status(&registry, "COM3", ConnectionStatus::Connected).await;

    registry.disconnect(&port("COM3")).await.unwrap();
    await_empty(&registry).await;
    assert!(controller.is_closed());
}

#[tokio::test]
async fn disconnect_unknown_port_errors() {
    let provider = MockPortProvider::new();
    let registry = ConnectionRegistry::spawn(provider, test_config());

    let err = registry.disconnect(&port("COM9")).await.unwrap_err();
    assert!(matches!(err, DeviceError::UnknownPort { .. }));
}

#[tokio::test]
async fn apply_configuration_end_to_end() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    registry.scan().await.unwrap();
    respond_identity(&controller, 0, "1.0.0").await;
    await_status(&registry, "COM3", ConnectionStatus::Connected).await;

    // Acknowledge the configuration push once it appears on the wire.
    let responder = controller.clone();
    tokio::spawn(async move {
        loop {
            let config_id = decode_all(&responder.take_written())
                .into_iter()
                .find_map(|message| match message {
                    Message::ConfigurationApply { config_id, .. } => Some(config_id),
                    _ => None,
                });
            if let Some(config_id) = config_id {
                let ack = Message::ConfigurationStored { config_id };
                responder.push_read(&ack.encode().unwrap());
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let inputs = vec![
        InputConfig::new(0, InputKind::Axis),
        InputConfig::new(4, InputKind::Button),
    ];
    registry
        .apply_configuration(&port("COM3"), 42, inputs)
        .await
        .unwrap();

    // The stored configuration id lands in the snapshot.
    let poll = async {
        loop {
            let devices = registry.list_devices().await.unwrap();
            if devices.iter().any(|d| d.config_id == Some(42)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("config id never recorded");
}

#[tokio::test]
async fn apply_configuration_requires_connection() {
    let provider = MockPortProvider::new();
    let registry = ConnectionRegistry::spawn(provider, test_config());

    let inputs = vec![InputConfig::new(0, InputKind::Axis)];
    let err = registry
        .apply_configuration(&port("COM3"), 1, inputs)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::UnknownPort { .. }));
}

#[tokio::test]
async fn input_values_stream_to_subscribers() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    let mut inputs = registry.subscribe_inputs();

    registry.scan().await.unwrap();
    respond_identity(&controller, 0, "1.0.0").await;
    await_status(&registry, "COM3", ConnectionStatus::Connected).await;

    controller.push_read(&Message::InputValue { pin: 5, value: 901 }.encode().unwrap());

    let reading = tokio::time::timeout(Duration::from_secs(5), inputs.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reading.port.as_str(), "COM3");
    assert_eq!(reading.pin, 5);
    assert_eq!(reading.value, 901);

    // The latest value is also queryable through the registry.
    let poll = async {
        loop {
            if let Some(value) = registry.read_value(&port("COM3"), 5).await.unwrap() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    let value = tokio::time::timeout(Duration::from_secs(5), poll).await.unwrap();
    assert_eq!(value, 901);
}

#[tokio::test]
async fn device_list_changed_events_are_published() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    let mut events = registry.subscribe_events();

    registry.scan().await.unwrap();
    respond_identity(&controller, 0, "1.0.0").await;
    await_status(&registry, "COM3", ConnectionStatus::Connected).await;

    // At minimum: discovering (scan), connecting, connected.
    let mut seen = Vec::new();
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        if let simpanel_device::RegistryEvent::DeviceListChanged { devices } = event
            && let Some(device) = devices.first()
        {
            seen.push(device.status);
        }
    }
    assert!(seen.contains(&ConnectionStatus::Connected));
    assert!(seen.len() >= 2);
}

#[tokio::test]
async fn upload_lease_blocks_configuration_and_tears_down_session() {
    let provider = MockPortProvider::new();
    let controller = provider.add_port(port("COM3"));

    let registry = ConnectionRegistry::spawn(provider, test_config());
    registry.scan().await.unwrap();
    respond_identity(&controller, 0, "1.0.0").await;
    await_status(&registry, "COM3", ConnectionStatus::Connected).await;

    let token = registry.request_upload_access(&port("COM3")).await.unwrap();

    // Configuration pushes are refused while the lease is held.
    let inputs = vec![InputConfig::new(0, InputKind::Axis)];
    let err = registry
        .apply_configuration(&port("COM3"), 1, inputs)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::UploadInProgress { .. }));

    // A second lease on the same port is refused too.
    let err = registry.request_upload_access(&port("COM3")).await.unwrap_err();
    assert!(matches!(err, DeviceError::UploadInProgress { .. }));

    // Wrong token cannot release it.
    let err = registry
        .release_upload_access(&port("COM3"), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::LeaseMismatch { .. }));

    registry
        .release_upload_access(&port("COM3"), token)
        .await
        .unwrap();

    // After release the device is forgotten and rediscoverable.
    await_empty(&registry).await;
    assert!(controller.is_closed());
}
