//! Transport layer for remote event publishing
//!
//! This module defines the contract the client expects from an MQTT v5
//! transport and ships the rumqttc-backed implementation in [`mqtt`].
//! The client never touches wire framing; it only submits requests and
//! reacts to the [`TransportEvent`]s returned by [`Transport::poll`].

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

pub use rumqttc::v5::mqttbytes::v5::PublishProperties;
pub use rumqttc::v5::mqttbytes::QoS;

/// Identifier the transport assigns to a submitted publish.
///
/// Completion events refer back to the message through this id.
pub type MessageId = u32;

/// Transport-level failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,
    #[error("No previous session to reconnect")]
    NoSession,
    #[error("No broker available")]
    NoBroker,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Broker refused connection: {0}")]
    ConnectRefused(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Connection closed by client")]
    Closed,
    #[error("Request rejected: {0}")]
    RequestRejected(String),
    #[error("Invalid transport options: {0}")]
    InvalidOptions(String),
}

/// Reason attached to a client-initiated disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Regular disconnect, the broker discards the will message
    Normal,
    /// Ask the broker to publish the will message right away
    WithWillMessage,
}

impl DisconnectReason {
    /// MQTT v5 reason code for this disconnect
    pub fn code(self) -> u8 {
        match self {
            DisconnectReason::Normal => 0x00,
            DisconnectReason::WithWillMessage => 0x04,
        }
    }
}

/// Result of a publish as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Acknowledged (or written, for QoS 0)
    Success,
    /// Acknowledged, but nobody subscribes to the topic
    NoMatchingSubscribers,
    /// Rejected by the broker or abandoned by the transport
    Failed(String),
}

impl PublishOutcome {
    /// Both acknowledgement flavours count as delivered; QoS guarantees do
    /// not depend on subscriber presence.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PublishOutcome::Success | PublishOutcome::NoMatchingSubscribers
        )
    }
}

/// Inbound publish from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub properties: Option<PublishProperties>,
}

/// Notifications produced by the transport's event loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected,
    /// Broker answered CONNECT with a failure reason
    ConnectFailed(String),
    /// Connection dropped or broker sent DISCONNECT
    Disconnected(String),
    /// Publish received on a subscribed topic
    MessageReceived(ReceivedMessage),
    /// A submitted publish reached a terminal state
    PublishCompleted {
        id: MessageId,
        outcome: PublishOutcome,
    },
}

/// MQTT v5 transport contract
///
/// Request methods (`publish`, `subscribe`, `unsubscribe`, `disconnect`) may
/// be called from any thread. `connect`, `reconnect` and `poll` are only
/// driven by the connection manager thread, and every event is delivered
/// through `poll` on that thread. Implementations resend in-flight QoS>=1
/// publishes after reconnecting within the same session.
pub trait Transport: Send + Sync {
    /// Open a new session to `host:port`
    fn connect(&self, host: &str, port: u16, keep_alive: Duration) -> Result<(), TransportError>;

    /// Re-establish the previous session against the same broker
    fn reconnect(&self) -> Result<(), TransportError>;

    /// Close the connection; a blocked `poll` returns an error promptly
    fn disconnect(&self, reason: DisconnectReason) -> Result<(), TransportError>;

    /// Subscribe to a topic filter
    fn subscribe(&self, topic: &str, qos: QoS, no_local: bool) -> Result<(), TransportError>;

    /// Remove a topic filter subscription
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Submit a publish and return its transport message id.
    ///
    /// The payload is only borrowed for the duration of the call.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        properties: Option<&PublishProperties>,
    ) -> Result<MessageId, TransportError>;

    /// Run the event loop for at most `timeout`.
    ///
    /// Returns the events observed (possibly none). An error means the
    /// connection is gone and the caller must reconnect.
    fn poll(&self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError>;
}
