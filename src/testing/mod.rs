//! Testing utilities and mock implementations
//!
//! Lets the client be exercised end to end without an MQTT broker.

pub mod mocks;

pub use mocks::*;
