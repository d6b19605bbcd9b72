/// GATT attribute definitions and the registration handshake
///
/// The peripheral publishes one primary service holding one data-exchange
/// characteristic. The descriptor is built when the adapter powers on, handed
/// to the host stack, and only becomes visible to lookups once the stack
/// confirms the registration.

use crate::transport::{PeripheralTransport, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bluetooth base UUID (0000xxxx-0000-1000-8000-00805F9B34FB)
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;

/// Data-exchange service (0xA001)
pub const SERVICE_UUID: Uuid = uuid_from_u16(0xA001);

/// Data-exchange characteristic (0xC001)
pub const CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0xC001);

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// How remote writes to the exchange characteristic are acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// The remote never waits for an acknowledgement
    #[default]
    WithoutResponse,
    /// Every write batch is acknowledged once
    WithResponse,
}

/// Characteristic property flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CharacteristicProperty {
    /// Notify; subscribing requires an encrypted link
    NotifyEncryptionRequired,
    WriteWithoutResponse,
    /// Write with response; every write batch gets one acknowledgement
    Write,
    Read,
}

/// Attribute permission flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributePermission {
    WriteEncryptionRequired,
    ReadEncryptionRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub properties: BTreeSet<CharacteristicProperty>,
    pub permissions: BTreeSet<AttributePermission>,
    /// Static value served to reads; `None` serves an empty value
    pub value: Option<Vec<u8>>,
}

impl CharacteristicDescriptor {
    pub fn new(
        uuid: Uuid,
        properties: impl IntoIterator<Item = CharacteristicProperty>,
        permissions: impl IntoIterator<Item = AttributePermission>,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            uuid,
            properties: properties.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
            value,
        }
    }

    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn has_permission(&self, permission: AttributePermission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn supports_notify(&self) -> bool {
        self.has_property(CharacteristicProperty::NotifyEncryptionRequired)
    }

    /// Whether remote writes must be acknowledged
    pub fn requires_write_response(&self) -> bool {
        self.has_property(CharacteristicProperty::Write)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// Characteristic lookup table, keyed by characteristic UUID
#[derive(Debug, Default, Clone)]
pub struct CharacteristicRegistry {
    entries: HashMap<Uuid, CharacteristicDescriptor>,
}

impl CharacteristicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn populate(&mut self, service: &ServiceDescriptor) {
        self.entries = service
            .characteristics
            .iter()
            .map(|characteristic| (characteristic.uuid, characteristic.clone()))
            .collect();
    }

    pub fn get(&self, id: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &Uuid> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Service submission rejected: {0}")]
    Rejected(#[from] TransportError),
    #[error("Service registration failed: {0}")]
    Failed(String),
    #[error("Service already registered or pending")]
    AlreadyRegistered,
    #[error("Registration failed earlier in this session")]
    SessionFailed,
}

/// Progress of the registration handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationPhase {
    Unregistered,
    /// Submitted, awaiting the host stack's confirmation
    Pending,
    Registered,
    /// Fatal for the current power session
    Failed(String),
}

/// Owns the service definition and the characteristic lookup table
#[derive(Debug)]
pub struct AttributeRegistry {
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    static_value: Option<Vec<u8>>,
    write_mode: WriteMode,
    phase: RegistrationPhase,
    service: Option<ServiceDescriptor>,
    characteristics: CharacteristicRegistry,
}

impl AttributeRegistry {
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            characteristic_uuid,
            static_value: None,
            write_mode: WriteMode::default(),
            phase: RegistrationPhase::Unregistered,
            service: None,
            characteristics: CharacteristicRegistry::new(),
        }
    }

    /// Serve a static value to reads; adds the read property
    pub fn with_static_value(mut self, value: Option<Vec<u8>>) -> Self {
        self.static_value = value;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn characteristic_uuid(&self) -> Uuid {
        self.characteristic_uuid
    }

    pub fn phase(&self) -> &RegistrationPhase {
        &self.phase
    }

    pub fn is_registered(&self) -> bool {
        self.phase == RegistrationPhase::Registered
    }

    /// The published service, once confirmed
    pub fn service(&self) -> Option<&ServiceDescriptor> {
        self.service.as_ref()
    }

    pub fn characteristics(&self) -> &CharacteristicRegistry {
        &self.characteristics
    }

    pub fn lookup(&self, id: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.get(id)
    }

    /// Build the service definition.
    ///
    /// The exchange characteristic is notify (encrypted) plus
    /// write-without-response, and writes need an encrypted link. A configured
    /// static value adds the read property.
    pub fn build_service(&self) -> ServiceDescriptor {
        let write = match self.write_mode {
            WriteMode::WithoutResponse => CharacteristicProperty::WriteWithoutResponse,
            WriteMode::WithResponse => CharacteristicProperty::Write,
        };
        let mut properties = vec![CharacteristicProperty::NotifyEncryptionRequired, write];
        if self.static_value.is_some() {
            properties.push(CharacteristicProperty::Read);
        }

        let characteristic = CharacteristicDescriptor::new(
            self.characteristic_uuid,
            properties,
            [AttributePermission::WriteEncryptionRequired],
            self.static_value.clone(),
        );

        ServiceDescriptor {
            uuid: self.service_uuid,
            primary: true,
            characteristics: vec![characteristic],
        }
    }

    /// Build the service and submit it to the host stack.
    ///
    /// Lookups stay empty until [`on_registered`](Self::on_registered)
    /// confirms the submission.
    pub fn build_and_register(
        &mut self,
        transport: &dyn PeripheralTransport,
    ) -> Result<(), RegistrationError> {
        match &self.phase {
            RegistrationPhase::Unregistered => {}
            RegistrationPhase::Failed(_) => return Err(RegistrationError::SessionFailed),
            RegistrationPhase::Pending | RegistrationPhase::Registered => {
                return Err(RegistrationError::AlreadyRegistered)
            }
        }

        let service = self.build_service();
        debug!(
            "Submitting service {} with {} characteristic(s)",
            service.uuid,
            service.characteristics.len()
        );

        if let Err(e) = transport.register_service(&service) {
            warn!("Host stack rejected service {}: {}", service.uuid, e);
            self.phase = RegistrationPhase::Failed(e.to_string());
            return Err(RegistrationError::Rejected(e));
        }

        self.service = Some(service);
        self.phase = RegistrationPhase::Pending;
        Ok(())
    }

    /// Handle the host stack's registration confirmation.
    ///
    /// Returns the newly published service, or `None` when the confirmation
    /// does not match a pending submission.
    pub fn on_registered(
        &mut self,
        service_id: Uuid,
        error: Option<String>,
    ) -> Result<Option<&ServiceDescriptor>, RegistrationError> {
        if self.phase != RegistrationPhase::Pending || service_id != self.service_uuid {
            warn!(
                "Ignoring registration confirmation for {} in phase {:?}",
                service_id, self.phase
            );
            return Ok(None);
        }

        if let Some(reason) = error {
            warn!("Service {} registration failed: {}", service_id, reason);
            self.service = None;
            self.phase = RegistrationPhase::Failed(reason.clone());
            return Err(RegistrationError::Failed(reason));
        }

        self.phase = RegistrationPhase::Registered;
        if let Some(service) = &self.service {
            self.characteristics.populate(service);
        }
        info!(
            "Service {} registered ({} characteristic(s))",
            service_id,
            self.characteristics.len()
        );
        Ok(self.service.as_ref())
    }

    /// Forget the published service after the adapter lost power
    pub fn reset(&mut self) {
        self.phase = RegistrationPhase::Unregistered;
        self.service = None;
        self.characteristics.clear();
    }
}
