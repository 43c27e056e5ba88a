//! Desired subscriptions, replayed whenever a session is established

use crate::transport::{QoS, Transport, TransportError};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Desired state of one topic filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active(QoS),
    /// Unsubscribe on next connect, then forget the entry
    PendingRemoval,
}

/// Topic filter to desired state
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: BTreeMap<String, SubscriptionState>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an active subscription and return what was there before
    pub fn set(&mut self, filter: &str, qos: QoS) -> Option<SubscriptionState> {
        self.entries
            .insert(filter.to_string(), SubscriptionState::Active(qos))
    }

    /// Undo a [`set`](Self::set) by restoring the previous entry
    pub fn restore(&mut self, filter: &str, previous: Option<SubscriptionState>) {
        match previous {
            Some(state) => {
                self.entries.insert(filter.to_string(), state);
            }
            None => {
                self.entries.remove(filter);
            }
        }
    }

    /// Record that the next session must unsubscribe `filter`.
    ///
    /// Unknown filters are recorded too, since the broker may still hold a
    /// subscription from an earlier session.
    pub fn mark_removed(&mut self, filter: &str) {
        self.entries
            .insert(filter.to_string(), SubscriptionState::PendingRemoval);
    }

    pub fn remove(&mut self, filter: &str) -> Option<SubscriptionState> {
        self.entries.remove(filter)
    }

    pub fn get(&self, filter: &str) -> Option<SubscriptionState> {
        self.entries.get(filter).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bring a fresh session in line with the table.
    ///
    /// Active entries are subscribed with no-local set. Pending removals are
    /// unsubscribed and dropped once the transport accepts the request;
    /// rejected ones are kept for the next session.
    pub fn replay(&mut self, transport: &dyn Transport) {
        let mut unsubscribed = Vec::new();
        for (filter, state) in &self.entries {
            let result: Result<(), TransportError> = match state {
                SubscriptionState::Active(qos) => transport.subscribe(filter, *qos, true),
                SubscriptionState::PendingRemoval => transport.unsubscribe(filter).map(|()| {
                    unsubscribed.push(filter.clone());
                }),
            };
            if let Err(e) = result {
                error!(topic = %filter, error = %e, "Failed to restore subscription state");
            }
        }
        for filter in unsubscribed {
            self.entries.remove(&filter);
        }
        debug!(count = self.entries.len(), "Replayed subscriptions");
    }
}
