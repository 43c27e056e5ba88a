//! Connection manager thread
//!
//! Idles while no broker is known, connects (preferring the broker of the
//! previous session), then stays in the transport's event loop until the
//! connection drops. Failed attempts back off linearly. The loop ends once
//! the client clears its `running` flag.

use super::backoff::RetryState;
use super::{callbacks, Shared};
use crate::broker::ServiceId;
use crate::transport::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) struct ConnectionManager {
    shared: Arc<Shared>,
    retry: RetryState,
    /// Broker of the last successful connection
    active_broker: Option<ServiceId>,
}

impl ConnectionManager {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            retry: RetryState::default(),
            active_broker: None,
        }
    }

    pub(crate) fn run(mut self) {
        let span = crate::mqtt_span!(operation = "connection_manager", client_id = %self.shared.client_id);
        let _guard = span.enter();
        debug!("Connection manager started");

        let mut delay: Option<Duration> = None;
        while self.wait_for_attempt(&mut delay) {
            let connected = self.connect_broker();
            match &connected {
                Ok(()) => self.retry.reset(),
                Err(e) => {
                    let next = self.retry.record_failure(&self.shared.reconnect);
                    info!(
                        error = %e,
                        retry_in_secs = next.as_secs(),
                        "Failed to connect to broker, retrying"
                    );
                    delay = Some(next);
                }
            }

            // a shutdown racing with a successful connect must not enter the event loop
            if !self.shared.state.lock().running {
                break;
            }
            if connected.is_ok() {
                self.event_loop();
            }
        }
        debug!("Connection manager stopped");
    }

    /// Block until a connection attempt is due. Returns false on shutdown.
    fn wait_for_attempt(&self, delay: &mut Option<Duration>) -> bool {
        let mut state = self.shared.state.lock();
        while state.running && (state.brokers.is_empty() || delay.is_some()) {
            match delay.take() {
                Some(timeout) => {
                    self.shared.broker_changed.wait_for(&mut state, timeout);
                }
                None => self.shared.broker_changed.wait(&mut state),
            }
        }
        state.running
    }

    /// Reconnect to the previous broker if it is still registered, otherwise
    /// try every known broker in registry order.
    fn connect_broker(&mut self) -> Result<(), TransportError> {
        let transport = self.shared.transport.as_ref();
        let (reuse_session, candidates) = {
            let state = self.shared.state.lock();
            let reuse = self
                .active_broker
                .is_some_and(|id| state.brokers.contains(id));
            (reuse, state.brokers.snapshot())
        };

        if reuse_session {
            match transport.reconnect() {
                Ok(()) => {
                    debug!(service_id = ?self.active_broker, "Reconnected to previous broker");
                    return Ok(());
                }
                Err(e) => debug!(error = %e, "Reconnect failed, trying all brokers"),
            }
        }

        let mut last_error = TransportError::NoBroker;
        for (service_id, info) in candidates {
            match transport.connect(&info.host, info.port, self.shared.keep_alive) {
                Ok(()) => {
                    info!(broker = %info, service_id, "Connected to broker");
                    self.active_broker = Some(service_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!(broker = %info, error = %e, "Failed to connect to broker");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Drive the transport until the connection is gone
    fn event_loop(&self) {
        loop {
            match self.shared.transport.poll(self.shared.keep_alive) {
                Ok(events) => {
                    for event in events {
                        callbacks::handle_event(&self.shared, event);
                    }
                }
                Err(e) => {
                    callbacks::on_disconnected(&self.shared, &e.to_string());
                    return;
                }
            }
        }
    }
}
