//! Peripheral: owns the GATT state machine and dispatches host stack events
//!
//! Control flow:
//! adapter PoweredOn -> build + submit service -> confirmation -> advertise;
//! first subscriber -> stop advertising; writes/reads -> exchange engine.
//!
//! The `Peripheral` is not synchronized. It expects a single owner feeding it
//! events in arrival order (see [`crate::runtime`]).

use crate::config::{ConfigError, PeripheralConfig};
use crate::gatt::{
    AdapterState, AdapterStateTracker, AdapterTransition, AdvertisingController,
    AdvertisingError, AdvertisingState, AttributeRegistry, ExchangeEngine, ExchangeError,
    ExchangeStats, RegistrationPhase, SubscriptionManager, SubscriptionPolicy,
};
use crate::transport::{PeripheralTransport, ReadRequest, RemoteId, TransportEvent, WriteRequest};
use crate::PeripheralDelegate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Point-in-time view of the peripheral, for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralStatus {
    pub adapter: AdapterState,
    pub advertising: AdvertisingState,
    pub registered: bool,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub subscribers: usize,
    pub stats: ExchangeStats,
}

pub struct Peripheral {
    config: PeripheralConfig,
    transport: Arc<dyn PeripheralTransport>,
    delegate: Arc<dyn PeripheralDelegate>,
    adapter: AdapterStateTracker,
    attributes: AttributeRegistry,
    advertising: AdvertisingController,
    subscriptions: SubscriptionManager,
    exchange: ExchangeEngine,
}

impl Peripheral {
    pub fn new(
        config: PeripheralConfig,
        transport: Arc<dyn PeripheralTransport>,
        delegate: Arc<dyn PeripheralDelegate>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let attributes = AttributeRegistry::new(config.service_uuid, config.characteristic_uuid)
            .with_static_value(config.read_value.as_ref().map(|v| v.as_bytes().to_vec()))
            .with_write_mode(config.write_mode);

        Ok(Self {
            config,
            transport,
            delegate,
            adapter: AdapterStateTracker::new(),
            attributes,
            advertising: AdvertisingController::new(),
            subscriptions: SubscriptionManager::new(),
            exchange: ExchangeEngine::new(),
        })
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub fn advertising_state(&self) -> AdvertisingState {
        self.advertising.state()
    }

    pub fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn status(&self) -> PeripheralStatus {
        PeripheralStatus {
            adapter: self.adapter.state(),
            advertising: self.advertising.state(),
            registered: self.attributes.is_registered(),
            service_uuid: self.config.service_uuid,
            characteristic_uuid: self.config.characteristic_uuid,
            subscribers: self.subscriptions.total_subscribers(),
            stats: self.exchange.stats(),
        }
    }

    /// Handle one event from the host stack
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            TransportEvent::ServiceRegistered { service_id, error } => {
                self.on_service_registered(service_id, error)
            }
            TransportEvent::AdvertisingStarted { generation, error } => {
                match self.advertising.on_started(generation, error) {
                    Ok(()) if self.advertising.is_advertising() => {
                        self.status_message(format!(
                            "Advertising {} as \"{}\"",
                            self.config.service_uuid, self.config.local_name
                        ));
                    }
                    Ok(()) => {}
                    Err(e) => self.status_message(e.to_string()),
                }
            }
            TransportEvent::Subscribed {
                remote,
                characteristic_id,
            } => self.on_subscribe(remote, characteristic_id),
            TransportEvent::Unsubscribed {
                remote,
                characteristic_id,
            } => {
                self.subscriptions.on_unsubscribe(&remote, characteristic_id);
            }
            TransportEvent::WriteReceived(requests) => self.on_write_received(&requests),
            TransportEvent::ReadRequested(request) => self.on_read_requested(&request),
            TransportEvent::ReadyToUpdateSubscribers => {
                debug!("Transport ready for further updates");
                self.delegate.on_ready_to_update();
            }
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        let Some(transition) = self.adapter.apply(state) else {
            return;
        };

        match transition {
            AdapterTransition::BecameReady => {
                info!("Adapter powered on");
                self.status_message("Adapter powered on".to_string());
                self.register_service();
            }
            AdapterTransition::LostPower(now) => {
                // The host stack drops published services and advertising with power
                info!("Adapter left PoweredOn ({}); session reset", now);
                self.attributes.reset();
                self.subscriptions.clear();
                self.advertising.reset();
                self.status_message(format!("Adapter {}", now));
            }
            AdapterTransition::Idle(now) => {
                debug!("Adapter state {}", now);
                self.status_message(format!("Adapter {}", now));
            }
        }
    }

    fn register_service(&mut self) {
        match self.attributes.build_and_register(self.transport.as_ref()) {
            Ok(()) => debug!("Service {} submitted", self.config.service_uuid),
            Err(e) => {
                warn!("Service registration failed: {}", e);
                self.status_message(e.to_string());
            }
        }
    }

    fn on_service_registered(&mut self, service_id: Uuid, error: Option<String>) {
        let published = match self.attributes.on_registered(service_id, error) {
            Ok(Some(service)) => service.uuid,
            Ok(None) => return,
            Err(e) => {
                self.status_message(e.to_string());
                return;
            }
        };

        self.subscriptions
            .track(self.attributes.characteristics().ids());
        self.status_message(format!("Service {} registered", published));
        self.advertising
            .start(published, &self.config.local_name, self.transport.as_ref());
    }

    fn on_subscribe(&mut self, remote: RemoteId, characteristic_id: Uuid) {
        let policy = self
            .subscriptions
            .on_subscribe(remote.clone(), characteristic_id);

        if policy == Some(SubscriptionPolicy::StopAdvertising)
            && self.advertising.stop(self.transport.as_ref())
        {
            self.status_message(format!("{} subscribed; advertising stopped", remote));
        }
    }

    fn on_write_received(&mut self, requests: &[WriteRequest]) {
        if let Some(inbound) =
            self.exchange
                .on_write_received(requests, &self.attributes, self.transport.as_ref())
        {
            debug!("Write from {}: {:?}", inbound.remote, inbound.text);
            self.delegate.display_inbound(inbound.text);
        }
    }

    fn on_read_requested(&mut self, request: &ReadRequest) {
        self.exchange
            .on_read_requested(request, &self.attributes, self.transport.as_ref());
    }

    /// Broadcast a payload to subscribers of a registered characteristic
    pub fn send_notification(
        &mut self,
        payload: &[u8],
        characteristic_id: Uuid,
    ) -> Result<usize, ExchangeError> {
        self.exchange.send_notification(
            payload,
            characteristic_id,
            self.adapter.state(),
            &self.attributes,
            &self.subscriptions,
            self.transport.as_ref(),
        )
    }

    /// Operator request to (re)start advertising.
    ///
    /// Returns false when advertising is already starting or running.
    pub fn start_advertising(&mut self) -> Result<bool, AdvertisingError> {
        if !self.adapter.is_ready() || *self.attributes.phase() != RegistrationPhase::Registered {
            return Err(AdvertisingError::NotRegistered);
        }
        Ok(self.advertising.start(
            self.config.service_uuid,
            &self.config.local_name,
            self.transport.as_ref(),
        ))
    }

    /// Operator request to stop advertising. Returns false when already stopped.
    pub fn stop_advertising(&mut self) -> bool {
        let stopped = self.advertising.stop(self.transport.as_ref());
        if stopped {
            self.status_message("Advertising stopped".to_string());
        }
        stopped
    }

    fn status_message(&self, message: String) {
        self.delegate.display_status(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::{CHARACTERISTIC_UUID, SERVICE_UUID};
    use crate::transport::{AttResult, MockPeripheralTransport, TransportError};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDelegate {
        inbound: Mutex<Vec<String>>,
        status: Mutex<Vec<String>>,
    }

    impl PeripheralDelegate for RecordingDelegate {
        fn display_inbound(&self, text: String) {
            self.inbound.lock().push(text);
        }

        fn display_status(&self, message: String) {
            self.status.lock().push(message);
        }
    }

    fn peripheral(transport: MockPeripheralTransport) -> (Peripheral, Arc<RecordingDelegate>) {
        let delegate = Arc::new(RecordingDelegate::default());
        let peripheral = Peripheral::new(
            PeripheralConfig::default(),
            Arc::new(transport),
            delegate.clone(),
        )
        .expect("Valid config");
        (peripheral, delegate)
    }

    fn permissive_transport() -> MockPeripheralTransport {
        let mut transport = MockPeripheralTransport::new();
        transport.expect_register_service().returning(|_| Ok(()));
        transport.expect_start_advertising().return_const(());
        transport.expect_stop_advertising().return_const(());
        transport.expect_update_value().return_const(true);
        transport.expect_respond_to_read().return_const(());
        transport
    }

    fn bring_up(peripheral: &mut Peripheral) {
        peripheral.handle_event(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        peripheral.handle_event(TransportEvent::ServiceRegistered {
            service_id: SERVICE_UUID,
            error: None,
        });
        let generation = peripheral.advertising.generation();
        peripheral.handle_event(TransportEvent::AdvertisingStarted {
            generation,
            error: None,
        });
    }

    #[test]
    fn test_power_on_registers_and_advertises() {
        let mut transport = MockPeripheralTransport::new();
        transport
            .expect_register_service()
            .withf(|service| service.uuid == SERVICE_UUID && service.characteristics.len() == 1)
            .times(1)
            .returning(|_| Ok(()));
        transport
            .expect_start_advertising()
            .withf(|data, _| data.local_name.as_deref() == Some("perilink"))
            .times(1)
            .return_const(());
        let (mut peripheral, _) = peripheral(transport);

        bring_up(&mut peripheral);

        assert_eq!(peripheral.advertising_state(), AdvertisingState::Advertising);
        assert_eq!(peripheral.attributes().characteristics().len(), 1);
        assert!(peripheral.status().registered);
    }

    #[test]
    fn test_nothing_happens_before_power_on() {
        let mut transport = MockPeripheralTransport::new();
        transport.expect_register_service().times(0);
        let (mut peripheral, delegate) = peripheral(transport);

        peripheral.handle_event(TransportEvent::AdapterStateChanged(AdapterState::Unauthorized));
        peripheral.handle_event(TransportEvent::AdapterStateChanged(AdapterState::PoweredOff));

        assert_eq!(peripheral.advertising_state(), AdvertisingState::Stopped);
        assert!(!peripheral.status().registered);
        assert_eq!(delegate.status.lock().len(), 2);
    }

    #[test]
    fn test_first_subscriber_stops_advertising_once() {
        let mut transport = MockPeripheralTransport::new();
        transport.expect_register_service().returning(|_| Ok(()));
        transport.expect_start_advertising().times(1).return_const(());
        transport.expect_stop_advertising().times(1).return_const(());
        let (mut peripheral, _) = peripheral(transport);
        bring_up(&mut peripheral);

        for remote in ["a", "b"] {
            peripheral.handle_event(TransportEvent::Subscribed {
                remote: RemoteId::from(remote),
                characteristic_id: CHARACTERISTIC_UUID,
            });
        }
        peripheral.handle_event(TransportEvent::Unsubscribed {
            remote: RemoteId::from("a"),
            characteristic_id: CHARACTERISTIC_UUID,
        });

        assert_eq!(peripheral.advertising_state(), AdvertisingState::Stopped);
        assert_eq!(
            peripheral.subscriptions().subscriber_count(&CHARACTERISTIC_UUID),
            1
        );
    }

    #[test]
    fn test_write_displayed_without_response() {
        let mut transport = permissive_transport();
        transport.expect_respond_to_write().times(0);
        let (mut peripheral, delegate) = peripheral(transport);
        bring_up(&mut peripheral);

        peripheral.handle_event(TransportEvent::WriteReceived(vec![WriteRequest::new(
            RemoteId::from("central"),
            CHARACTERISTIC_UUID,
            vec![0x68, 0x69],
        )]));

        assert_eq!(*delegate.inbound.lock(), vec!["hi".to_string()]);
    }

    #[test]
    fn test_read_always_answered_once() {
        let mut transport = MockPeripheralTransport::new();
        transport.expect_register_service().returning(|_| Ok(()));
        transport.expect_start_advertising().return_const(());
        transport
            .expect_respond_to_read()
            .withf(|_, result, _| *result == AttResult::Success)
            .times(1)
            .return_const(());
        let (mut peripheral, _) = peripheral(transport);
        bring_up(&mut peripheral);

        peripheral.handle_event(TransportEvent::ReadRequested(ReadRequest {
            request_id: 1,
            remote: RemoteId::from("central"),
            characteristic_id: CHARACTERISTIC_UUID,
            offset: 0,
        }));
    }

    #[test]
    fn test_power_loss_suppresses_notify_and_resets() {
        let mut transport = permissive_transport();
        transport.expect_respond_to_write().return_const(());
        let (mut peripheral, _) = peripheral(transport);
        bring_up(&mut peripheral);
        peripheral.handle_event(TransportEvent::Subscribed {
            remote: RemoteId::from("a"),
            characteristic_id: CHARACTERISTIC_UUID,
        });

        peripheral.handle_event(TransportEvent::AdapterStateChanged(AdapterState::PoweredOff));

        assert_eq!(
            peripheral.send_notification(b"ok", CHARACTERISTIC_UUID),
            Err(ExchangeError::AdapterNotReady(AdapterState::PoweredOff))
        );
        assert_eq!(peripheral.subscriptions().total_subscribers(), 0);
        assert!(!peripheral.status().registered);
        assert_eq!(peripheral.advertising_state(), AdvertisingState::Stopped);

        // Next power-on runs a fresh session
        bring_up(&mut peripheral);
        assert_eq!(peripheral.advertising_state(), AdvertisingState::Advertising);
        assert_eq!(peripheral.send_notification(b"ok", CHARACTERISTIC_UUID), Ok(0));
    }

    #[test]
    fn test_registration_rejection_reported() {
        let mut transport = MockPeripheralTransport::new();
        transport
            .expect_register_service()
            .times(1)
            .returning(|_| Err(TransportError::MalformedDescriptor("bad uuid".to_string())));
        transport.expect_start_advertising().times(0);
        let (mut peripheral, delegate) = peripheral(transport);

        peripheral.handle_event(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));

        let status = delegate.status.lock();
        assert!(status.iter().any(|m| m.contains("bad uuid")));
        assert_eq!(peripheral.advertising_state(), AdvertisingState::Stopped);
    }

    #[test]
    fn test_advertising_failure_reported() {
        let (mut peripheral, delegate) = peripheral(permissive_transport());
        peripheral.handle_event(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        peripheral.handle_event(TransportEvent::ServiceRegistered {
            service_id: SERVICE_UUID,
            error: None,
        });
        peripheral.handle_event(TransportEvent::AdvertisingStarted {
            generation: 1,
            error: Some("radio busy".to_string()),
        });

        assert_eq!(peripheral.advertising_state(), AdvertisingState::Stopped);
        assert!(delegate
            .status
            .lock()
            .iter()
            .any(|m| m.contains("radio busy")));
    }

    #[test]
    fn test_operator_start_requires_registration() {
        let (mut peripheral, _) = peripheral(permissive_transport());
        assert_eq!(
            peripheral.start_advertising(),
            Err(AdvertisingError::NotRegistered)
        );

        bring_up(&mut peripheral);
        assert!(peripheral.stop_advertising());
        assert_eq!(peripheral.start_advertising(), Ok(true));
        assert_eq!(peripheral.start_advertising(), Ok(false));
    }

    #[test]
    fn test_unsubscribe_never_resumes_advertising() {
        let (mut peripheral, _) = peripheral(permissive_transport());
        bring_up(&mut peripheral);

        let remote = RemoteId::from("a");
        peripheral.handle_event(TransportEvent::Subscribed {
            remote: remote.clone(),
            characteristic_id: CHARACTERISTIC_UUID,
        });
        peripheral.handle_event(TransportEvent::Unsubscribed {
            remote,
            characteristic_id: CHARACTERISTIC_UUID,
        });

        assert_eq!(peripheral.advertising_state(), AdvertisingState::Stopped);
    }
}
