/// Subscriber tracking per characteristic
///
/// Sets exist only for registered characteristics; events for anything else
/// are dropped. The first subscriber of a characteristic asks for advertising
/// to stop. Nothing here ever asks for it to resume.

use crate::transport::RemoteId;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Remote parties subscribed to one characteristic
#[derive(Debug, Default, Clone)]
pub struct SubscriberSet {
    remotes: HashSet<RemoteId>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, remote: &RemoteId) -> bool {
        self.remotes.contains(remote)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteId> {
        self.remotes.iter()
    }
}

/// Side effect requested by a subscription change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPolicy {
    /// First consumer attached; further discovery is unnecessary
    StopAdvertising,
}

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscribers: HashMap<Uuid, SubscriberSet>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty subscriber sets for freshly registered characteristics
    pub fn track<'a>(&mut self, characteristic_ids: impl IntoIterator<Item = &'a Uuid>) {
        for id in characteristic_ids {
            self.subscribers.entry(*id).or_default();
        }
    }

    /// Drop every set; used when the adapter loses power
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn on_subscribe(
        &mut self,
        remote: RemoteId,
        characteristic_id: Uuid,
    ) -> Option<SubscriptionPolicy> {
        let Some(set) = self.subscribers.get_mut(&characteristic_id) else {
            debug!(
                "Subscribe from {} to unknown characteristic {} ignored",
                remote, characteristic_id
            );
            return None;
        };

        let was_empty = set.is_empty();
        if !set.remotes.insert(remote.clone()) {
            debug!("{} already subscribed to {}", remote, characteristic_id);
            return None;
        }
        debug!(
            "{} subscribed to {} ({} subscriber(s))",
            remote,
            characteristic_id,
            set.len()
        );

        was_empty.then_some(SubscriptionPolicy::StopAdvertising)
    }

    /// Returns whether the remote was subscribed
    pub fn on_unsubscribe(&mut self, remote: &RemoteId, characteristic_id: Uuid) -> bool {
        let removed = self
            .subscribers
            .get_mut(&characteristic_id)
            .map(|set| set.remotes.remove(remote))
            .unwrap_or(false);
        if removed {
            debug!("{} unsubscribed from {}", remote, characteristic_id);
        }
        removed
    }

    pub fn subscribers(&self, characteristic_id: &Uuid) -> Option<&SubscriberSet> {
        self.subscribers.get(characteristic_id)
    }

    pub fn subscriber_count(&self, characteristic_id: &Uuid) -> usize {
        self.subscribers
            .get(characteristic_id)
            .map(SubscriberSet::len)
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.subscribers.values().map(SubscriberSet::len).sum()
    }
}
