//! Outbound publish requests
//!
//! A [`Message`] lives in a [`MessagePool`](crate::pool::MessagePool) slot
//! from creation until it is consumed or released. The payload is only
//! copied into the message when it has to wait for a free publishing slot.

use crate::error::DeliveryFailure;
use crate::transport::{MessageId, PublishProperties, QoS};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SEQ_NR: AtomicU64 = AtomicU64::new(0);

/// Priority class of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Middle,
    High,
}

impl Priority {
    /// All priorities, highest first
    pub const DESCENDING: [Priority; 3] = [Priority::High, Priority::Middle, Priority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Middle => 1,
            Priority::High => 2,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "middle" => Ok(Priority::Middle),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// One publish request
#[derive(Debug)]
pub struct Message {
    topic: String,
    payload: Option<Bytes>,
    properties: Option<PublishProperties>,
    qos: QoS,
    priority: Priority,
    sync: bool,
    seq_nr: u64,
    mid: Option<MessageId>,
    result: Result<(), DeliveryFailure>,
}

impl Message {
    /// Create a message with an empty payload and the next sequence number
    pub fn new(topic: &str, qos: QoS, priority: Priority, sync: bool) -> Self {
        Self {
            topic: topic.to_string(),
            payload: None,
            properties: None,
            qos,
            priority,
            sync,
            seq_nr: NEXT_SEQ_NR.fetch_add(1, Ordering::Relaxed),
            mid: None,
            result: Ok(()),
        }
    }

    /// Deep-copy payload and properties so the message can wait in the queue
    pub fn fill_payload(&mut self, payload: &[u8], properties: Option<&PublishProperties>) {
        if !payload.is_empty() {
            self.payload = Some(Bytes::copy_from_slice(payload));
        }
        self.properties = properties.cloned();
    }

    /// Hand the queued payload and properties over for submission
    pub(crate) fn take_payload(&mut self) -> (Bytes, Option<PublishProperties>) {
        (
            self.payload.take().unwrap_or_default(),
            self.properties.take(),
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn properties(&self) -> Option<&PublishProperties> {
        self.properties.as_ref()
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub fn seq_nr(&self) -> u64 {
        self.seq_nr
    }

    /// Transport message id, set once the message has been submitted
    pub fn mid(&self) -> Option<MessageId> {
        self.mid
    }

    pub(crate) fn set_mid(&mut self, mid: MessageId) {
        self.mid = Some(mid);
    }

    pub fn result(&self) -> &Result<(), DeliveryFailure> {
        &self.result
    }

    pub(crate) fn set_result(&mut self, result: Result<(), DeliveryFailure>) {
        self.result = result;
    }

    pub(crate) fn is_at_most_once(&self) -> bool {
        matches!(self.qos, QoS::AtMostOnce)
    }
}
