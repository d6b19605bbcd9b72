//! Transport abstraction layer for perilink
//!
//! Defines the contract between the peripheral core and the host radio stack:
//! the inbound events the stack delivers and the calls the core makes on it.
//! Completions of asynchronous calls (registration, advertising start) come
//! back as events, never as return values.

use crate::gatt::{AdapterState, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque handle of a remote party (central) as reported by the host stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// ATT protocol result codes used when answering read/write requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttResult {
    Success,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidOffset,
    AttributeNotFound,
    UnlikelyError,
}

impl AttResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AttResult::Success)
    }
}

impl fmt::Display for AttResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttResult::Success => write!(f, "Success"),
            AttResult::InvalidHandle => write!(f, "InvalidHandle"),
            AttResult::ReadNotPermitted => write!(f, "ReadNotPermitted"),
            AttResult::WriteNotPermitted => write!(f, "WriteNotPermitted"),
            AttResult::InvalidOffset => write!(f, "InvalidOffset"),
            AttResult::AttributeNotFound => write!(f, "AttributeNotFound"),
            AttResult::UnlikelyError => write!(f, "UnlikelyError"),
        }
    }
}

/// A single remote write, as delivered inside a write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub remote: RemoteId,
    pub characteristic_id: Uuid,
    pub value: Vec<u8>,
    pub offset: usize,
}

impl WriteRequest {
    pub fn new(remote: RemoteId, characteristic_id: Uuid, value: Vec<u8>) -> Self {
        Self {
            remote,
            characteristic_id,
            value,
            offset: 0,
        }
    }
}

/// A remote read awaiting exactly one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Transport-assigned id used to route the response
    pub request_id: u64,
    pub remote: RemoteId,
    pub characteristic_id: Uuid,
    pub offset: usize,
}

/// Payload of an advertising broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementData {
    pub service_uuids: Vec<Uuid>,
    /// `None` when the configured name is empty
    pub local_name: Option<String>,
}

/// Errors reported by the host radio stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Radio adapter unavailable")]
    Unavailable,
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),
    #[error("Service already published: {0}")]
    AlreadyPublished(Uuid),
    #[error("Transport failure: {0}")]
    Other(String),
}

/// Events delivered by the host radio stack, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Adapter power state changed
    AdapterStateChanged(AdapterState),
    /// Completion of `register_service`
    ServiceRegistered {
        service_id: Uuid,
        error: Option<String>,
    },
    /// Completion of `start_advertising`, echoing the generation it was given
    AdvertisingStarted {
        generation: u64,
        error: Option<String>,
    },
    /// A remote party enabled notifications on a characteristic
    Subscribed {
        remote: RemoteId,
        characteristic_id: Uuid,
    },
    /// A remote party disabled notifications on a characteristic
    Unsubscribed {
        remote: RemoteId,
        characteristic_id: Uuid,
    },
    /// A batch of remote writes
    WriteReceived(Vec<WriteRequest>),
    /// A remote read request
    ReadRequested(ReadRequest),
    /// The transmit queue drained after an `update_value` returned false
    ReadyToUpdateSubscribers,
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::AdapterStateChanged(state) => {
                write!(f, "AdapterStateChanged({})", state)
            }
            TransportEvent::ServiceRegistered { service_id, error } => write!(
                f,
                "ServiceRegistered {{ service_id: {}, ok: {} }}",
                service_id,
                error.is_none()
            ),
            TransportEvent::AdvertisingStarted { generation, error } => write!(
                f,
                "AdvertisingStarted {{ generation: {}, ok: {} }}",
                generation,
                error.is_none()
            ),
            TransportEvent::Subscribed {
                remote,
                characteristic_id,
            } => write!(
                f,
                "Subscribed {{ remote: {}, characteristic: {} }}",
                remote, characteristic_id
            ),
            TransportEvent::Unsubscribed {
                remote,
                characteristic_id,
            } => write!(
                f,
                "Unsubscribed {{ remote: {}, characteristic: {} }}",
                remote, characteristic_id
            ),
            TransportEvent::WriteReceived(requests) => {
                write!(f, "WriteReceived {{ requests: {} }}", requests.len())
            }
            TransportEvent::ReadRequested(request) => write!(
                f,
                "ReadRequested {{ id: {}, remote: {}, characteristic: {} }}",
                request.request_id, request.remote, request.characteristic_id
            ),
            TransportEvent::ReadyToUpdateSubscribers => write!(f, "ReadyToUpdateSubscribers"),
        }
    }
}

/// Host radio stack calls made by the peripheral core.
///
/// None of these block: completions for `register_service` and
/// `start_advertising` are delivered later as [`TransportEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait PeripheralTransport: Send + Sync {
    /// Submit a service for publication. `Err` means the stack refused the
    /// submission outright.
    fn register_service(&self, service: &ServiceDescriptor) -> Result<(), TransportError>;

    /// Begin broadcasting the given advertisement. The completion event must
    /// carry the same `generation`.
    fn start_advertising(&self, data: &AdvertisementData, generation: u64);

    /// Halt advertising
    fn stop_advertising(&self);

    /// Push a value to subscribers of a characteristic. `targets == None`
    /// broadcasts to every subscriber. Returns false when the transmit queue is
    /// saturated.
    fn update_value(
        &self,
        payload: &[u8],
        characteristic_id: Uuid,
        targets: Option<Vec<RemoteId>>,
    ) -> bool;

    /// Answer a read request
    fn respond_to_read(&self, request_id: u64, result: AttResult, payload: &[u8]);

    /// Acknowledge a write-with-response batch
    fn respond_to_write(&self, remote: &RemoteId, result: AttResult);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_id_display() {
        let remote = RemoteId::new("central-1");
        assert_eq!(remote.to_string(), "central-1");
        assert_eq!(remote.as_str(), "central-1");
        assert_eq!(RemoteId::from("central-1"), remote);
    }

    #[test]
    fn test_att_result_success() {
        assert!(AttResult::Success.is_success());
        assert!(!AttResult::AttributeNotFound.is_success());
        assert!(!AttResult::InvalidOffset.is_success());
    }

    #[test]
    fn test_write_request_default_offset() {
        let request = WriteRequest::new(RemoteId::from("c"), Uuid::nil(), vec![1, 2]);
        assert_eq!(request.offset, 0);
        assert_eq!(request.value, vec![1, 2]);
    }

    #[test]
    fn test_event_display() {
        let event = TransportEvent::WriteReceived(vec![WriteRequest::new(
            RemoteId::from("c"),
            Uuid::nil(),
            b"hi".to_vec(),
        )]);
        assert_eq!(event.to_string(), "WriteReceived { requests: 1 }");

        let event = TransportEvent::AdvertisingStarted {
            generation: 3,
            error: Some("busy".to_string()),
        };
        assert_eq!(
            event.to_string(),
            "AdvertisingStarted { generation: 3, ok: false }"
        );
    }
}
