/// Advertising lifecycle
///
/// Stopped -> Starting -> Advertising -> Stopped. The controller only toggles
/// discoverability; accepting connections stays with the host stack.
///
/// Every start carries a generation number that the host stack echoes in its
/// confirmation. A confirmation for any generation but the latest belongs to a
/// start that was stopped or lost with adapter power, and is dropped.

use crate::transport::{AdvertisementData, PeripheralTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisingState {
    Stopped,
    /// Start issued, awaiting the host stack's confirmation
    Starting,
    Advertising,
}

impl Default for AdvertisingState {
    fn default() -> Self {
        AdvertisingState::Stopped
    }
}

impl fmt::Display for AdvertisingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisingState::Stopped => write!(f, "Stopped"),
            AdvertisingState::Starting => write!(f, "Starting"),
            AdvertisingState::Advertising => write!(f, "Advertising"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvertisingError {
    #[error("Service not registered; cannot advertise")]
    NotRegistered,
    #[error("Advertising failed to start: {0}")]
    StartFailed(String),
}

#[derive(Debug, Default)]
pub struct AdvertisingController {
    state: AdvertisingState,
    advertisement: Option<AdvertisementData>,
    generation: u64,
}

impl AdvertisingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    pub fn is_advertising(&self) -> bool {
        self.state == AdvertisingState::Advertising
    }

    /// Generation of the most recent start
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Last advertisement requested from the host stack
    pub fn advertisement(&self) -> Option<&AdvertisementData> {
        self.advertisement.as_ref()
    }

    /// Begin broadcasting the service id and optional local name.
    ///
    /// An empty name is left out of the advertisement. Returns false when a
    /// broadcast is already starting or running.
    pub fn start(
        &mut self,
        service_id: Uuid,
        local_name: &str,
        transport: &dyn PeripheralTransport,
    ) -> bool {
        if self.state != AdvertisingState::Stopped {
            debug!("Advertising already {}; start ignored", self.state);
            return false;
        }

        let data = AdvertisementData {
            service_uuids: vec![service_id],
            local_name: if local_name.is_empty() {
                None
            } else {
                Some(local_name.to_string())
            },
        };

        self.generation += 1;
        transport.start_advertising(&data, self.generation);
        self.advertisement = Some(data);
        self.state = AdvertisingState::Starting;
        debug!(
            "Advertising starting for service {} (generation {})",
            service_id, self.generation
        );
        true
    }

    /// Handle the host stack's start confirmation
    pub fn on_started(
        &mut self,
        generation: u64,
        error: Option<String>,
    ) -> Result<(), AdvertisingError> {
        if generation != self.generation {
            debug!(
                "Ignoring confirmation for superseded start (generation {}, current {})",
                generation, self.generation
            );
            return Ok(());
        }
        if self.state != AdvertisingState::Starting {
            // Stopped while the start was in flight
            debug!("Ignoring advertising confirmation in state {}", self.state);
            return Ok(());
        }

        match error {
            None => {
                self.state = AdvertisingState::Advertising;
                info!("Advertising started");
                Ok(())
            }
            Some(reason) => {
                warn!("Advertising failed to start: {}", reason);
                self.state = AdvertisingState::Stopped;
                Err(AdvertisingError::StartFailed(reason))
            }
        }
    }

    /// Halt broadcasting. Returns false when already stopped.
    pub fn stop(&mut self, transport: &dyn PeripheralTransport) -> bool {
        if self.state == AdvertisingState::Stopped {
            return false;
        }
        transport.stop_advertising();
        self.state = AdvertisingState::Stopped;
        info!("Advertising stopped");
        true
    }

    /// Mark advertising stopped without a transport call; the host stack has
    /// already dropped it along with adapter power.
    pub fn reset(&mut self) {
        self.state = AdvertisingState::Stopped;
    }
}
