// Peripheral configuration
//
// Identifiers, advertised name, and runtime buffer sizes. Defaults match the
// fixed protocol identifiers (service 0xA001, characteristic 0xC001).

use crate::gatt::{WriteMode, CHARACTERISTIC_UUID, SERVICE_UUID};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default advertised device name
pub const DEFAULT_LOCAL_NAME: &str = "perilink";

/// Longest local name that still fits a legacy advertising payload next to
/// one 128-bit service UUID
pub const MAX_LOCAL_NAME_LEN: usize = 29;

/// Default capacity of the runtime's command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Service and characteristic UUIDs must differ")]
    DuplicateUuid,
    #[error("Local name is {0} bytes; at most {} fit in an advertisement", MAX_LOCAL_NAME_LEN)]
    LocalNameTooLong(usize),
    #[error("Command buffer must be > 0")]
    ZeroCommandBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Service UUID published and advertised
    pub service_uuid: Uuid,
    /// Data-exchange characteristic UUID
    pub characteristic_uuid: Uuid,
    /// Name included in advertisements; empty omits it
    pub local_name: String,
    /// Static value served to remote reads
    pub read_value: Option<String>,
    /// Acknowledgement behaviour for remote writes
    pub write_mode: WriteMode,
    /// Capacity of the runtime's command channel
    pub command_buffer: usize,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            characteristic_uuid: CHARACTERISTIC_UUID,
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            read_value: None,
            write_mode: WriteMode::WithoutResponse,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl PeripheralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_uuid == self.characteristic_uuid {
            return Err(ConfigError::DuplicateUuid);
        }
        if self.local_name.len() > MAX_LOCAL_NAME_LEN {
            return Err(ConfigError::LocalNameTooLong(self.local_name.len()));
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::ZeroCommandBuffer);
        }
        Ok(())
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn with_read_value(mut self, value: impl Into<String>) -> Self {
        self.read_value = Some(value.into());
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }
}
