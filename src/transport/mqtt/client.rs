//! rumqttc-backed transport
//!
//! Wraps the blocking `rumqttc::v5::{Client, Connection}` pair. Requests go
//! through the [`Client`] from any thread; the [`Connection`] is driven only
//! by the connection manager thread through `connect`, `reconnect` and
//! `poll`.
//!
//! rumqttc does not report packet ids at submit time, so the transport hands
//! out its own message ids. Publishes leave the event loop in submission
//! order, which lets each `Outgoing::Publish(pkid)` be matched to the oldest
//! unsent id. QoS 0 publishes complete once written, QoS 1 on PUBACK and
//! QoS 2 on PUBCOMP (or a failing PUBREC).
//!
//! One client and event loop live for the whole transport. Switching brokers
//! retargets the event loop, so unacknowledged publishes are resent to the new
//! broker instead of being abandoned.

use super::connection::{configure_mqtt_options, MqttSettings};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::transport::{
    DisconnectReason, MessageId, PublishOutcome, PublishProperties, QoS, Transport,
    TransportError, TransportEvent,
};
use parking_lot::Mutex;
use rumqttc::v5::mqttbytes::v5::Filter;
use rumqttc::v5::{Client, Connection, Event};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Longest single wait on the connection, so a shutdown is noticed promptly
const POLL_SLICE: Duration = Duration::from_millis(100);

/// How long a normal disconnect waits for DISCONNECT to be written
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

/// Request-side state, shared with caller threads
#[derive(Default)]
struct Requester {
    client: Option<Client>,
    next_id: MessageId,
    /// Submitted but not yet written, in submission order
    awaiting: VecDeque<(MessageId, QoS)>,
    /// Written and waiting for an acknowledgement, by packet id
    inflight: HashMap<u16, MessageId>,
}

/// Event-loop side, owned by the connection manager thread
#[derive(Default)]
struct Driver {
    connection: Option<Connection>,
    broker: Option<(String, u16)>,
    keep_alive: Duration,
    backlog: Vec<TransportEvent>,
}

/// MQTT v5 transport over rumqttc
pub struct MqttTransport {
    client_id: String,
    settings: MqttSettings,
    request_capacity: usize,
    requester: Mutex<Requester>,
    driver: Mutex<Driver>,
    closing: AtomicBool,
}

impl MqttTransport {
    pub fn new(client_id: &str, settings: MqttSettings, request_capacity: usize) -> Self {
        Self {
            client_id: client_id.to_string(),
            settings,
            request_capacity: request_capacity.max(1),
            requester: Mutex::new(Requester::default()),
            driver: Mutex::new(Driver::default()),
            closing: AtomicBool::new(false),
        }
    }

    /// Transport for the configured client id, credentials and last will
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let settings = MqttSettings::from_config(config)?;
        // room for every in-flight publish plus subscription traffic
        let capacity = config.client.parallel_msg_capacity * 2 + 16;
        Ok(Self::new(&config.resolve_client_id(), settings, capacity))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Drive the connection until the broker acknowledges the session
    fn await_connack(&self, driver: &mut Driver, timeout: Duration) -> Result<(), String> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return Err("transport closed".to_string());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err("timed out waiting for CONNACK".to_string());
            }
            let Some(connection) = driver.connection.as_mut() else {
                return Err("no connection".to_string());
            };
            match connection.recv_timeout(remaining.min(POLL_SLICE)) {
                Ok(Ok(event)) => match MessageHandler::route_event(&event) {
                    EventRoute::ConnectionAcknowledged { session_present } => {
                        debug!(session_present, "CONNACK received");
                        driver.backlog.push(TransportEvent::Connected);
                        return Ok(());
                    }
                    EventRoute::ConnectionRefused(reason) => return Err(reason),
                    other => self.apply(other, &mut driver.backlog),
                },
                Ok(Err(e)) => return Err(e.to_string()),
                // nothing arrived within the slice
                Err(_) => continue,
            }
        }
    }

    /// Translate a routed event into transport events
    fn apply(&self, route: EventRoute, backlog: &mut Vec<TransportEvent>) {
        match route {
            EventRoute::ConnectionAcknowledged { .. } => backlog.push(TransportEvent::Connected),
            EventRoute::ConnectionRefused(reason) => {
                backlog.push(TransportEvent::ConnectFailed(reason))
            }
            EventRoute::MessageReceived(message) => {
                backlog.push(TransportEvent::MessageReceived(message))
            }
            EventRoute::PublishSent(pkid) => self.on_publish_sent(pkid, backlog),
            EventRoute::PublishAcknowledged { pkid, outcome } => {
                match self.requester.lock().inflight.remove(&pkid) {
                    Some(id) => backlog.push(TransportEvent::PublishCompleted { id, outcome }),
                    None => trace!(pkid, "Acknowledgement for untracked packet"),
                }
            }
            EventRoute::Disconnected(reason) => backlog.push(TransportEvent::Disconnected(reason)),
            EventRoute::DisconnectSent | EventRoute::Other => {}
        }
    }

    fn on_publish_sent(&self, pkid: u16, backlog: &mut Vec<TransportEvent>) {
        let mut requester = self.requester.lock();
        if pkid != 0 && requester.inflight.contains_key(&pkid) {
            trace!(pkid, "Publish resent after reconnect");
            return;
        }
        match requester.awaiting.pop_front() {
            Some((id, QoS::AtMostOnce)) => backlog.push(TransportEvent::PublishCompleted {
                id,
                outcome: PublishOutcome::Success,
            }),
            Some((id, _)) => {
                requester.inflight.insert(pkid, id);
            }
            None => trace!(pkid, "Outgoing publish not submitted through this transport"),
        }
    }

    /// Drive a closing connection until DISCONNECT is on the wire
    fn flush_disconnect(connection: &mut Connection) {
        let deadline = Instant::now() + DISCONNECT_FLUSH;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("DISCONNECT not written before the flush deadline");
                return;
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(event)) => {
                    if MessageHandler::route_event(&event) == EventRoute::DisconnectSent {
                        return;
                    }
                }
                Ok(Err(_)) | Err(_) => return,
            }
        }
    }

    fn closed_error(&self) -> Option<TransportError> {
        self.closing
            .load(Ordering::SeqCst)
            .then_some(TransportError::Closed)
    }
}

impl Transport for MqttTransport {
    fn connect(&self, host: &str, port: u16, keep_alive: Duration) -> Result<(), TransportError> {
        let options = configure_mqtt_options(&self.client_id, host, port, keep_alive, &self.settings)?;
        self.closing.store(false, Ordering::SeqCst);

        let mut guard = self.driver.lock();
        let driver = &mut *guard;
        match driver.connection.as_mut() {
            // pending publishes stay queued in the event loop and are resent
            Some(connection) => connection.eventloop.options = options,
            None => {
                let (client, connection) = Client::new(options, self.request_capacity);
                self.requester.lock().client = Some(client);
                driver.connection = Some(connection);
            }
        }
        driver.broker = Some((host.to_string(), port));
        driver.keep_alive = keep_alive;

        match self.await_connack(driver, keep_alive) {
            Ok(()) => {
                debug!(host, port, "MQTT session established");
                Ok(())
            }
            Err(reason) => Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                port,
                reason,
            }),
        }
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        self.closing.store(false, Ordering::SeqCst);
        let mut guard = self.driver.lock();
        let driver = &mut *guard;
        let Some((host, port)) = driver.broker.clone() else {
            return Err(TransportError::NoSession);
        };
        let keep_alive = driver.keep_alive;
        self.await_connack(driver, keep_alive)
            .map_err(|reason| TransportError::ConnectionFailed { host, port, reason })
    }

    fn disconnect(&self, reason: DisconnectReason) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        // a running poll sees `closing` within one slice and releases the driver
        let mut driver = self.driver.lock();
        let client = self.requester.lock().client.take();
        let connection = driver.connection.take();
        driver.broker = None;
        let (Some(client), Some(mut connection)) = (client, connection) else {
            return Ok(());
        };

        match reason {
            DisconnectReason::Normal => {
                debug!(code = reason.code(), "Sending DISCONNECT");
                client
                    .try_disconnect()
                    .map_err(|e| TransportError::RequestRejected(e.to_string()))?;
                Self::flush_disconnect(&mut connection);
            }
            DisconnectReason::WithWillMessage => {
                // rumqttc can only send reason 0x00, which discards the will,
                // so the socket is closed without DISCONNECT instead
                debug!(code = reason.code(), "Closing connection with the last will armed");
            }
        }
        drop(connection);
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS, no_local: bool) -> Result<(), TransportError> {
        let requester = self.requester.lock();
        let client = requester.client.as_ref().ok_or(TransportError::NotConnected)?;
        let mut filter = Filter::new(topic, qos);
        filter.nolocal = no_local;
        client
            .try_subscribe_many(vec![filter])
            .map_err(|e| TransportError::RequestRejected(e.to_string()))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let requester = self.requester.lock();
        let client = requester.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::RequestRejected(e.to_string()))
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        properties: Option<&PublishProperties>,
    ) -> Result<MessageId, TransportError> {
        let mut requester = self.requester.lock();
        let client = requester.client.as_ref().ok_or(TransportError::NotConnected)?;
        let submitted = match properties {
            Some(properties) => client.try_publish_with_properties(
                topic,
                qos,
                false,
                payload.to_vec(),
                properties.clone(),
            ),
            None => client.try_publish(topic, qos, false, payload.to_vec()),
        };
        submitted.map_err(|e| TransportError::RequestRejected(e.to_string()))?;

        requester.next_id = requester.next_id.wrapping_add(1).max(1);
        let id = requester.next_id;
        requester.awaiting.push_back((id, qos));
        Ok(id)
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        if let Some(closed) = self.closed_error() {
            return Err(closed);
        }
        let mut guard = self.driver.lock();
        let driver = &mut *guard;
        if !driver.backlog.is_empty() {
            return Ok(std::mem::take(&mut driver.backlog));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(closed) = self.closed_error() {
                return Err(closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let Some(connection) = driver.connection.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            let event: Event = match connection.recv_timeout(remaining.min(POLL_SLICE)) {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    return Err(self
                        .closed_error()
                        .unwrap_or_else(|| TransportError::ConnectionLost(e.to_string())))
                }
                Err(_) => continue,
            };
            self.apply(MessageHandler::route_event(&event), &mut driver.backlog);
            if !driver.backlog.is_empty() {
                return Ok(std::mem::take(&mut driver.backlog));
            }
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("client_id", &self.client_id)
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
