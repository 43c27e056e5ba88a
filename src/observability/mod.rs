//! Observability for the remote event client
//!
//! Structured logging only; the library emits `tracing` events and the
//! binary decides where they go.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
