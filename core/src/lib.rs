// Perilink Core: GATT peripheral state machine
//
// Publishes one service with one data-exchange characteristic, advertises
// until the first central subscribes, then relays text both ways:
// notifications out, writes in, static reads answered.
//
// The radio itself sits behind `transport::PeripheralTransport`.

pub mod config;
pub mod gatt;
pub mod peripheral;
pub mod runtime;
pub mod transport;

use thiserror::Error;

pub use config::{ConfigError, PeripheralConfig};
pub use gatt::{
    AdapterState, AdvertisingError, AdvertisingState, ExchangeError, ExchangeStats, WriteMode,
    CHARACTERISTIC_UUID, SERVICE_UUID,
};
pub use peripheral::{Peripheral, PeripheralStatus};
pub use runtime::{start_peripheral, PeripheralCommand, PeripheralEvent, PeripheralHandle};
pub use transport::{LoopbackTransport, PeripheralTransport, TransportEvent};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Advertising(#[from] AdvertisingError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Peripheral task not running")]
    NotRunning,
}

// ============================================================================
// PERIPHERAL DELEGATE TRAIT
// ============================================================================

/// Callback interface for presentation (terminal, UI, logs)
pub trait PeripheralDelegate: Send + Sync {
    /// Decoded text of a remote write
    fn display_inbound(&self, text: String);
    /// A state change or error worth showing the operator
    fn display_status(&self, message: String);
    /// The transport can accept updates again after backpressure
    fn on_ready_to_update(&self) {}
}
