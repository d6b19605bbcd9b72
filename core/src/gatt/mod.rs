/// GATT peripheral state machine
///
/// - **adapter**: radio power tracking and gating
/// - **attributes**: service/characteristic definitions and registration
/// - **advertising**: discoverability lifecycle
/// - **subscription**: subscriber sets and the stop-advertising policy
/// - **exchange**: notify / write / read handling
///
/// Everything here is synchronous and owned by a single writer; see
/// [`crate::peripheral::Peripheral`] for the composition.

pub mod adapter;
pub mod advertising;
pub mod attributes;
pub mod exchange;
pub mod subscription;

pub use adapter::{AdapterState, AdapterStateTracker, AdapterTransition};

pub use advertising::{AdvertisingController, AdvertisingError, AdvertisingState};

pub use attributes::{
    uuid_from_u16, AttributePermission, AttributeRegistry, CharacteristicDescriptor,
    CharacteristicProperty, CharacteristicRegistry, RegistrationError, RegistrationPhase,
    ServiceDescriptor, WriteMode, BLUETOOTH_BASE_UUID, CHARACTERISTIC_UUID, SERVICE_UUID,
};

pub use exchange::{
    decode_payload, ExchangeEngine, ExchangeError, ExchangeStats, InboundWrite,
    DECODE_PLACEHOLDER,
};

pub use subscription::{SubscriberSet, SubscriptionManager, SubscriptionPolicy};
