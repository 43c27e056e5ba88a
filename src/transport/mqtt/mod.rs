//! MQTT v5 transport over rumqttc
//!
//! Split the same way as the rest of the transport code: pure pieces that
//! are easy to test, and one impure piece doing the I/O.
//!
//! - [`connection`] - building `MqttOptions` (session, will, credentials)
//! - [`message_handler`] - classifying rumqttc events
//! - [`client`] - the [`Transport`](crate::transport::Transport) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use remote_event_mqtt::config::ClientConfig;
//! use remote_event_mqtt::transport::mqtt::MqttTransport;
//! use remote_event_mqtt::transport::Transport;
//! use std::time::Duration;
//!
//! let transport = MqttTransport::from_config(&ClientConfig::default())?;
//! transport.connect("localhost", 1883, Duration::from_secs(60))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, MqttSettings, WillSettings};
pub use message_handler::{EventRoute, MessageHandler};
