/// Notify / write / read exchange
///
/// Outbound payloads are broadcast to every subscriber of a registered
/// characteristic. Inbound writes are decoded as text for display; inbound
/// reads always get exactly one response.

use super::adapter::AdapterState;
use super::attributes::AttributeRegistry;
use super::subscription::SubscriptionManager;
use crate::transport::{AttResult, PeripheralTransport, ReadRequest, RemoteId, WriteRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Text shown in place of a payload that is not valid UTF-8
pub const DECODE_PLACEHOLDER: &str = "error string";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),
    #[error("Transport queue full; retry later")]
    TransportBackpressure,
    #[error("Adapter not ready ({0})")]
    AdapterNotReady(AdapterState),
}

/// Decode a payload for display, falling back to [`DECODE_PLACEHOLDER`].
///
/// Returns the text and whether decoding succeeded.
pub fn decode_payload(payload: &[u8]) -> (String, bool) {
    match std::str::from_utf8(payload) {
        Ok(text) => (text.to_string(), true),
        Err(_) => (DECODE_PLACEHOLDER.to_string(), false),
    }
}

/// A processed inbound write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundWrite {
    pub remote: RemoteId,
    pub characteristic_id: Uuid,
    pub text: String,
    pub decoded: bool,
    /// Requests after the first one in the batch, which were not processed
    pub discarded: usize,
}

/// Running counters, reported through the peripheral status
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStats {
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub backpressure_events: u64,
    pub writes_received: u64,
    pub decode_failures: u64,
    pub reads_answered: u64,
}

#[derive(Debug, Default)]
pub struct ExchangeEngine {
    stats: ExchangeStats,
}

impl ExchangeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ExchangeStats {
        self.stats
    }

    /// Broadcast a payload to every subscriber of `characteristic_id`.
    ///
    /// Zero subscribers is not an error; the transport still gets the update.
    /// Returns the number of subscribers targeted.
    pub fn send_notification(
        &mut self,
        payload: &[u8],
        characteristic_id: Uuid,
        adapter: AdapterState,
        attributes: &AttributeRegistry,
        subscriptions: &SubscriptionManager,
        transport: &dyn PeripheralTransport,
    ) -> Result<usize, ExchangeError> {
        if !adapter.is_powered_on() {
            self.stats.notifications_failed += 1;
            return Err(ExchangeError::AdapterNotReady(adapter));
        }

        if attributes.lookup(&characteristic_id).is_none() {
            self.stats.notifications_failed += 1;
            return Err(ExchangeError::CharacteristicNotFound(characteristic_id));
        }

        let targeted = subscriptions.subscriber_count(&characteristic_id);
        if !transport.update_value(payload, characteristic_id, None) {
            warn!(
                "Transport queue full; {} byte notification on {} not sent",
                payload.len(),
                characteristic_id
            );
            self.stats.notifications_failed += 1;
            self.stats.backpressure_events += 1;
            return Err(ExchangeError::TransportBackpressure);
        }

        self.stats.notifications_sent += 1;
        debug!(
            "Notified {} subscriber(s) on {} ({} bytes)",
            targeted,
            characteristic_id,
            payload.len()
        );
        Ok(targeted)
    }

    /// Process an inbound write batch.
    ///
    /// Only the first request is processed. Write-without-response
    /// characteristics get no acknowledgement; write-with-response ones get
    /// exactly one for the batch.
    pub fn on_write_received(
        &mut self,
        requests: &[WriteRequest],
        attributes: &AttributeRegistry,
        transport: &dyn PeripheralTransport,
    ) -> Option<InboundWrite> {
        let (first, rest) = requests.split_first()?;
        if !rest.is_empty() {
            debug!("Write batch of {}; processing first only", requests.len());
        }

        let wants_response = attributes
            .lookup(&first.characteristic_id)
            .map(|c| c.requires_write_response())
            .unwrap_or(false);
        if wants_response {
            transport.respond_to_write(&first.remote, AttResult::Success);
        }

        let (text, decoded) = decode_payload(&first.value);
        self.stats.writes_received += 1;
        if !decoded {
            self.stats.decode_failures += 1;
            debug!(
                "Write from {} is not UTF-8 ({} bytes)",
                first.remote,
                first.value.len()
            );
        }

        Some(InboundWrite {
            remote: first.remote.clone(),
            characteristic_id: first.characteristic_id,
            text,
            decoded,
            discarded: rest.len(),
        })
    }

    /// Answer a read request. Exactly one response is sent per call.
    pub fn on_read_requested(
        &mut self,
        request: &ReadRequest,
        attributes: &AttributeRegistry,
        transport: &dyn PeripheralTransport,
    ) -> AttResult {
        let (result, payload): (AttResult, &[u8]) =
            match attributes.lookup(&request.characteristic_id) {
                None => (AttResult::AttributeNotFound, &[][..]),
                Some(characteristic) => {
                    let value = characteristic.value.as_deref().unwrap_or(&[]);
                    match value.get(request.offset..) {
                        Some(tail) => (AttResult::Success, tail),
                        None => (AttResult::InvalidOffset, &[][..]),
                    }
                }
            };

        transport.respond_to_read(request.request_id, result, payload);
        self.stats.reads_answered += 1;
        debug!(
            "Read {} from {} on {} -> {}",
            request.request_id, request.remote, request.characteristic_id, result
        );
        result
    }
}
