//! Error types for the remote event client
//!
//! Every facade operation returns [`ClientResult`]. Variants follow the
//! client's failure taxonomy: load shedding, offline QoS 0 traffic, bad
//! arguments, transport rejections and terminal delivery failures.

use crate::config::ConfigError;
use crate::topic::TopicError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to an MQTT broker")]
    NotConnected,

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("Illegal argument: {message}")]
    IllegalArgument { message: String },

    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("Publish failed: {0}")]
    PublishFailed(#[from] DeliveryFailure),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to start connection thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Coarse classification of [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    ResourceExhausted,
    IllegalArgument,
    Timeout,
    Delivery,
    Transport,
    Config,
    Internal,
}

/// Terminal failure recorded on a synchronous message
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("broker rejected publish: {0}")]
    Rejected(String),
    #[error("connection lost before QoS 0 message was delivered")]
    DroppedOnDisconnect,
    #[error("transport refused queued message: {0}")]
    SubmitFailed(String),
}

impl ClientError {
    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    pub fn illegal_argument<S: Into<String>>(message: S) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    pub fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotConnected => ErrorKind::NotConnected,
            ClientError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            ClientError::IllegalArgument { .. } | ClientError::Topic(_) => {
                ErrorKind::IllegalArgument
            }
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::PublishFailed(_) => ErrorKind::Delivery,
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::ThreadSpawn(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
