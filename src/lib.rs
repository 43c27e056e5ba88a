//! Remote event client over MQTT v5
//!
//! Carries event-admin events between frameworks through an MQTT broker.
//!
//! # Overview
//!
//! - A fixed-capacity message pool with priority admission (load shedding
//!   for low-priority traffic under pressure)
//! - A dispatch engine with a priority-ordered waiting queue, a bounded set
//!   of in-flight publishes and a table of completed synchronous results
//! - A background connection manager that fails over between discovered
//!   brokers and backs off linearly
//! - Subscriptions that survive reconnects
//!
//! # Quick Start
//!
//! ```rust
//! use remote_event_mqtt::testing::{MockTransport, RecordingHandler};
//! use remote_event_mqtt::{ClientConfig, EventAdminClient, Priority, QoS};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MockTransport::new());
//! let handler = Arc::new(RecordingHandler::new());
//! let client = EventAdminClient::new(&ClientConfig::default(), transport, handler)?;
//!
//! client.subscribe("org/example/*", QoS::AtLeastOnce)?;
//! // QoS 1 messages queue until a broker is known
//! client.publish_async("org/example/ping", b"{}", QoS::AtLeastOnce, None, Priority::Middle)?;
//! assert_eq!(client.stats().waiting, 1);
//!
//! client.shutdown();
//! # Ok::<(), remote_event_mqtt::ClientError>(())
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod observability;
pub mod pool;
pub mod subscription;
pub mod testing;
pub mod topic;
pub mod transport;

pub use broker::{BrokerInfo, ServiceId};
pub use client::{ChannelForwarder, EventAdminClient, HandlerEvent, QueueStats, RemoteEventHandler};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult, DeliveryFailure, ErrorKind};
pub use message::Priority;
pub use transport::mqtt::MqttTransport;
pub use transport::{PublishProperties, QoS, ReceivedMessage, Transport, TransportError};
