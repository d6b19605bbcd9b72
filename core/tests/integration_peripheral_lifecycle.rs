//! Lifecycle tests for the peripheral runtime
//!
//! Drives a running peripheral task through the loopback host stack:
//! power-up, registration, advertising, the first-subscriber stop, power loss
//! and recovery.
//!
//! Run with: cargo test --test integration_peripheral_lifecycle

use perilink_core::transport::{LoopbackTransport, TransportError};
use perilink_core::{
    start_peripheral, AdapterState, AdvertisingState, PeripheralConfig, PeripheralError,
    PeripheralEvent, PeripheralHandle, CHARACTERISTIC_UUID, SERVICE_UUID,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    transport: Arc<LoopbackTransport>,
    handle: PeripheralHandle,
    events: mpsc::UnboundedReceiver<PeripheralEvent>,
}

fn start(config: PeripheralConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (transport, transport_rx) = LoopbackTransport::new();
    let (event_tx, events) = mpsc::unbounded_channel();
    let handle = start_peripheral(config, transport.clone(), transport_rx, event_tx)
        .expect("Failed to start peripheral");
    Harness {
        transport,
        handle,
        events,
    }
}

impl Harness {
    /// Wait for a status message containing `needle`
    async fn expect_status(&mut self, needle: &str) -> String {
        let wait = async {
            while let Some(event) = self.events.recv().await {
                if let PeripheralEvent::Status(message) = event {
                    if message.contains(needle) {
                        return message;
                    }
                }
            }
            panic!("Event stream closed while waiting for {:?}", needle);
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for status {:?}", needle))
    }

    /// Round-trip a command; the task drains pending host events first
    async fn settle(&self) {
        self.handle.status().await.expect("Peripheral not running");
    }
}

#[tokio::test]
async fn test_power_on_publishes_and_advertises() {
    let mut h = start(PeripheralConfig::default());
    h.transport.power_on();
    h.expect_status("Advertising").await;

    let services = h.transport.published_services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].uuid, SERVICE_UUID);
    assert_eq!(services[0].characteristics[0].uuid, CHARACTERISTIC_UUID);

    let advertisement = h.transport.advertisement().expect("Not advertising");
    assert_eq!(advertisement.service_uuids, vec![SERVICE_UUID]);
    assert_eq!(advertisement.local_name.as_deref(), Some("perilink"));

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.adapter, AdapterState::PoweredOn);
    assert_eq!(status.advertising, AdvertisingState::Advertising);
    assert!(status.registered);
}

#[tokio::test]
async fn test_empty_name_left_out_of_advertisement() {
    let mut h = start(PeripheralConfig::default().with_local_name(""));
    h.transport.power_on();
    h.expect_status("Advertising").await;

    assert_eq!(h.transport.advertisement().unwrap().local_name, None);
}

#[tokio::test]
async fn test_no_registration_until_powered_on() {
    let mut h = start(PeripheralConfig::default());
    h.transport.set_adapter_state(AdapterState::Unauthorized);
    h.expect_status("Unauthorized").await;

    assert!(h.transport.published_services().is_empty());
    assert_eq!(h.transport.advertising_starts(), 0);
    assert!(matches!(
        h.handle.start_advertising().await,
        Err(PeripheralError::Advertising(_))
    ));
}

#[tokio::test]
async fn test_repeated_power_on_registers_once() {
    let mut h = start(PeripheralConfig::default());
    h.transport.power_on();
    h.transport.power_on();
    h.expect_status("Advertising").await;
    h.settle().await;

    assert_eq!(h.transport.published_services().len(), 1);
    assert_eq!(h.transport.advertising_starts(), 1);
}

#[tokio::test]
async fn test_first_subscriber_stops_advertising() {
    let mut h = start(PeripheralConfig::default());
    h.transport.power_on();
    h.expect_status("Advertising").await;

    h.transport.subscribe("alice", CHARACTERISTIC_UUID);
    h.expect_status("advertising stopped").await;
    h.transport.subscribe("bob", CHARACTERISTIC_UUID);
    h.transport.unsubscribe("alice", CHARACTERISTIC_UUID);
    h.settle().await;

    assert!(!h.transport.is_advertising());
    assert_eq!(h.transport.advertising_stops(), 1);
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.advertising, AdvertisingState::Stopped);
    assert_eq!(status.subscribers, 1);
}

#[tokio::test]
async fn test_operator_can_resume_advertising() {
    let mut h = start(PeripheralConfig::default());
    h.transport.power_on();
    h.expect_status("Advertising").await;
    h.transport.subscribe("alice", CHARACTERISTIC_UUID);
    h.expect_status("advertising stopped").await;

    assert!(h.handle.start_advertising().await.unwrap());
    h.expect_status("Advertising").await;
    assert!(h.transport.is_advertising());

    assert!(h.handle.stop_advertising().await.unwrap());
    assert!(!h.handle.stop_advertising().await.unwrap());
}

#[tokio::test]
async fn test_power_cycle_restarts_session() {
    let mut h = start(PeripheralConfig::default());
    h.transport.power_on();
    h.expect_status("Advertising").await;
    h.transport.subscribe("alice", CHARACTERISTIC_UUID);
    h.expect_status("advertising stopped").await;

    h.transport.power_off();
    h.expect_status("PoweredOff").await;

    let status = h.handle.status().await.unwrap();
    assert!(!status.registered);
    assert_eq!(status.subscribers, 0);
    assert!(matches!(
        h.handle.send(b"lost".to_vec()).await,
        Err(PeripheralError::Exchange(_))
    ));

    h.transport.power_on();
    h.expect_status("Advertising").await;
    assert_eq!(h.transport.published_services().len(), 1);
    assert_eq!(h.transport.advertising_starts(), 2);
}

#[tokio::test]
async fn test_registration_rejected_synchronously() {
    let mut h = start(PeripheralConfig::default());
    h.transport
        .reject_registrations(Some(TransportError::MalformedDescriptor(
            "bad properties".to_string(),
        )));
    h.transport.power_on();

    h.expect_status("bad properties").await;
    assert_eq!(h.transport.advertising_starts(), 0);
    assert!(!h.handle.status().await.unwrap().registered);
}

#[tokio::test]
async fn test_registration_failure_blocks_advertising() {
    let mut h = start(PeripheralConfig::default());
    h.transport.fail_registrations(Some("database full".to_string()));
    h.transport.power_on();

    h.expect_status("database full").await;
    h.settle().await;
    assert_eq!(h.transport.advertising_starts(), 0);
}

#[tokio::test]
async fn test_advertising_failure_reported() {
    let mut h = start(PeripheralConfig::default());
    h.transport.fail_advertising(Some("radio busy".to_string()));
    h.transport.power_on();

    h.expect_status("radio busy").await;
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.advertising, AdvertisingState::Stopped);
    assert!(status.registered);
}

#[tokio::test]
async fn test_shutdown_closes_handle() {
    let h = start(PeripheralConfig::default());
    h.handle.shutdown().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Err(PeripheralError::NotRunning) = h.handle.status().await {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(result.is_ok());
}
