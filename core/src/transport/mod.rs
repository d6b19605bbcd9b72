// Transport module: the seam between the peripheral and a host radio stack

pub mod abstraction;
pub mod loopback;

pub use abstraction::{
    AdvertisementData, AttResult, PeripheralTransport, ReadRequest, RemoteId, TransportError,
    TransportEvent, WriteRequest,
};
pub use loopback::{LoopbackTransport, ReadResponse, SentUpdate};

#[cfg(test)]
pub use abstraction::MockPeripheralTransport;
