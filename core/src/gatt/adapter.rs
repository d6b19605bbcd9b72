/// Radio adapter power tracking
///
/// The host stack is the only source of adapter state. The tracker records it
/// and reports the two transitions the rest of the core cares about: gaining
/// power (register the service) and losing it (tear the session down).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Power state of the host radio adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// State not yet reported by the host stack
    Unknown,
    /// Adapter is resetting; a new state will follow
    Resetting,
    /// Hardware lacks the peripheral role
    Unsupported,
    /// Application is not permitted to use the radio
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn is_powered_on(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

impl Default for AdapterState {
    fn default() -> Self {
        AdapterState::Unknown
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterState::Unknown => write!(f, "Unknown"),
            AdapterState::Resetting => write!(f, "Resetting"),
            AdapterState::Unsupported => write!(f, "Unsupported"),
            AdapterState::Unauthorized => write!(f, "Unauthorized"),
            AdapterState::PoweredOff => write!(f, "PoweredOff"),
            AdapterState::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// Transition reported by [`AdapterStateTracker::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterTransition {
    /// Entered PoweredOn from any other state
    BecameReady,
    /// Left PoweredOn
    LostPower(AdapterState),
    /// Moved between two non-powered states
    Idle(AdapterState),
}

#[derive(Debug, Default)]
pub struct AdapterStateTracker {
    state: AdapterState,
}

impl AdapterStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_powered_on()
    }

    /// Record a state reported by the host stack.
    ///
    /// Returns `None` when the state is unchanged, so a repeated PoweredOn
    /// never yields a second `BecameReady`.
    pub fn apply(&mut self, next: AdapterState) -> Option<AdapterTransition> {
        let previous = self.state;
        if previous == next {
            return None;
        }
        self.state = next;

        let transition = match (previous.is_powered_on(), next.is_powered_on()) {
            (false, true) => AdapterTransition::BecameReady,
            (true, false) => AdapterTransition::LostPower(next),
            _ => AdapterTransition::Idle(next),
        };
        Some(transition)
    }
}
