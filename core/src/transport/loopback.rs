// Loopback transport: an in-process host stack
//
// Completes registrations and advertising starts immediately, records every
// call the peripheral makes, and lets a caller inject the remote side
// (power changes, subscriptions, writes, reads). Used by the CLI's
// interactive mode and by the integration tests.

use super::abstraction::{
    AdvertisementData, AttResult, PeripheralTransport, ReadRequest, RemoteId, TransportError,
    TransportEvent, WriteRequest,
};
use crate::gatt::{AdapterState, ServiceDescriptor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

/// One `update_value` call that the loopback accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUpdate {
    pub characteristic_id: Uuid,
    pub payload: Vec<u8>,
    pub targets: Option<Vec<RemoteId>>,
}

/// One `respond_to_read` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub request_id: u64,
    pub result: AttResult,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    published: Vec<ServiceDescriptor>,
    advertisement: Option<AdvertisementData>,
    advertising_starts: usize,
    advertising_stops: usize,
    updates: Vec<SentUpdate>,
    read_responses: Vec<ReadResponse>,
    write_responses: Vec<(RemoteId, AttResult)>,
    saturated: bool,
    reject_registration: Option<TransportError>,
    registration_failure: Option<String>,
    advertising_failure: Option<String>,
}

pub struct LoopbackTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<LoopbackState>,
    next_request_id: AtomicU64,
    read_answered: Notify,
}

impl LoopbackTransport {
    /// Create a loopback and the event stream the peripheral should consume
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events,
            state: Mutex::new(LoopbackState::default()),
            next_request_id: AtomicU64::new(1),
            read_answered: Notify::new(),
        });
        (transport, rx)
    }

    fn emit(&self, event: TransportEvent) {
        debug!("loopback -> {}", event);
        if self.events.send(event).is_err() {
            debug!("loopback event dropped; receiver closed");
        }
    }

    // ========================================================================
    // REMOTE SIDE
    // ========================================================================

    /// Leaving PoweredOn clears the published database, as a host stack does
    pub fn set_adapter_state(&self, state: AdapterState) {
        if !state.is_powered_on() {
            self.clear_database();
        }
        self.emit(TransportEvent::AdapterStateChanged(state));
    }

    pub fn power_on(&self) {
        self.set_adapter_state(AdapterState::PoweredOn);
    }

    pub fn power_off(&self) {
        self.set_adapter_state(AdapterState::PoweredOff);
    }

    pub fn subscribe(&self, remote: impl Into<RemoteId>, characteristic_id: Uuid) {
        self.emit(TransportEvent::Subscribed {
            remote: remote.into(),
            characteristic_id,
        });
    }

    pub fn unsubscribe(&self, remote: impl Into<RemoteId>, characteristic_id: Uuid) {
        self.emit(TransportEvent::Unsubscribed {
            remote: remote.into(),
            characteristic_id,
        });
    }

    /// Deliver a single-request write batch
    pub fn write(&self, remote: impl Into<RemoteId>, characteristic_id: Uuid, value: Vec<u8>) {
        self.write_batch(vec![WriteRequest::new(
            remote.into(),
            characteristic_id,
            value,
        )]);
    }

    pub fn write_batch(&self, requests: Vec<WriteRequest>) {
        self.emit(TransportEvent::WriteReceived(requests));
    }

    /// Issue a read; returns the request id the answer will carry
    pub fn read(&self, remote: impl Into<RemoteId>, characteristic_id: Uuid, offset: usize) -> u64 {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.emit(TransportEvent::ReadRequested(ReadRequest {
            request_id,
            remote: remote.into(),
            characteristic_id,
            offset,
        }));
        request_id
    }

    /// Make `update_value` report a full queue. Clearing it signals
    /// `ReadyToUpdateSubscribers`.
    pub fn set_saturated(&self, saturated: bool) {
        let was = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.saturated, saturated)
        };
        if was && !saturated {
            self.emit(TransportEvent::ReadyToUpdateSubscribers);
        }
    }

    /// Refuse every `register_service` call synchronously
    pub fn reject_registrations(&self, error: Option<TransportError>) {
        self.state.lock().reject_registration = error;
    }

    /// Confirm registrations with an error
    pub fn fail_registrations(&self, reason: Option<String>) {
        self.state.lock().registration_failure = reason;
    }

    /// Confirm advertising starts with an error
    pub fn fail_advertising(&self, reason: Option<String>) {
        self.state.lock().advertising_failure = reason;
    }

    fn clear_database(&self) {
        let mut state = self.state.lock();
        state.published.clear();
        state.advertisement = None;
    }

    // ========================================================================
    // RECORDED CALLS
    // ========================================================================

    pub fn published_services(&self) -> Vec<ServiceDescriptor> {
        self.state.lock().published.clone()
    }

    pub fn advertisement(&self) -> Option<AdvertisementData> {
        self.state.lock().advertisement.clone()
    }

    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertisement.is_some()
    }

    pub fn advertising_starts(&self) -> usize {
        self.state.lock().advertising_starts
    }

    pub fn advertising_stops(&self) -> usize {
        self.state.lock().advertising_stops
    }

    pub fn updates(&self) -> Vec<SentUpdate> {
        self.state.lock().updates.clone()
    }

    pub fn read_responses(&self) -> Vec<ReadResponse> {
        self.state.lock().read_responses.clone()
    }

    /// Wait until the peripheral answers the read with this id
    pub async fn read_response(&self, request_id: u64) -> ReadResponse {
        loop {
            // Registered before the check so an answer in between still wakes us
            let answered = self.read_answered.notified();
            let found = self
                .state
                .lock()
                .read_responses
                .iter()
                .find(|r| r.request_id == request_id)
                .cloned();
            if let Some(response) = found {
                return response;
            }
            answered.await;
        }
    }

    pub fn write_responses(&self) -> Vec<(RemoteId, AttResult)> {
        self.state.lock().write_responses.clone()
    }
}

impl PeripheralTransport for LoopbackTransport {
    fn register_service(&self, service: &ServiceDescriptor) -> Result<(), TransportError> {
        let failure = {
            let mut state = self.state.lock();
            if let Some(error) = state.reject_registration.clone() {
                return Err(error);
            }
            if state.published.iter().any(|s| s.uuid == service.uuid) {
                return Err(TransportError::AlreadyPublished(service.uuid));
            }
            if state.registration_failure.is_none() {
                state.published.push(service.clone());
            }
            state.registration_failure.clone()
        };

        self.emit(TransportEvent::ServiceRegistered {
            service_id: service.uuid,
            error: failure,
        });
        Ok(())
    }

    fn start_advertising(&self, data: &AdvertisementData, generation: u64) {
        let failure = {
            let mut state = self.state.lock();
            state.advertising_starts += 1;
            if state.advertising_failure.is_none() {
                state.advertisement = Some(data.clone());
            }
            state.advertising_failure.clone()
        };
        self.emit(TransportEvent::AdvertisingStarted {
            generation,
            error: failure,
        });
    }

    fn stop_advertising(&self) {
        let mut state = self.state.lock();
        state.advertising_stops += 1;
        state.advertisement = None;
    }

    fn update_value(
        &self,
        payload: &[u8],
        characteristic_id: Uuid,
        targets: Option<Vec<RemoteId>>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.saturated {
            return false;
        }
        state.updates.push(SentUpdate {
            characteristic_id,
            payload: payload.to_vec(),
            targets,
        });
        true
    }

    fn respond_to_read(&self, request_id: u64, result: AttResult, payload: &[u8]) {
        self.state.lock().read_responses.push(ReadResponse {
            request_id,
            result,
            payload: payload.to_vec(),
        });
        self.read_answered.notify_waiters();
    }

    fn respond_to_write(&self, remote: &RemoteId, result: AttResult) {
        self.state
            .lock()
            .write_responses
            .push((remote.clone(), result));
    }
}
