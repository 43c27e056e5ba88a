//! Mock implementations for testing
//!
//! [`MockTransport`] is a scriptable in-memory stand-in for the MQTT
//! transport, and [`RecordingHandler`] captures the upward callbacks.

use crate::client::RemoteEventHandler;
use crate::transport::{
    DisconnectReason, MessageId, PublishOutcome, PublishProperties, QoS, ReceivedMessage,
    Transport, TransportError, TransportEvent,
};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Publish recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub properties: Option<PublishProperties>,
}

/// Subscribe request recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeCall {
    pub topic: String,
    pub qos: QoS,
    pub no_local: bool,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    closed: bool,
    session: Option<(String, u16)>,
    refused_hosts: HashSet<String>,
    failing_publishes: usize,
    fail_subscribe: bool,
    auto_complete: bool,
    next_id: MessageId,
    events: VecDeque<TransportEvent>,
    connect_attempts: Vec<(String, u16)>,
    reconnects: usize,
    subscriptions: Vec<SubscribeCall>,
    unsubscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
    disconnects: Vec<DisconnectReason>,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    changed: Condvar,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge every publish as soon as it is submitted
    pub fn with_auto_complete() -> Self {
        let transport = Self::new();
        transport.state.lock().auto_complete = true;
        transport
    }

    pub fn refuse_host(&self, host: &str) {
        self.state.lock().refused_hosts.insert(host.to_string());
    }

    pub fn accept_host(&self, host: &str) {
        self.state.lock().refused_hosts.remove(host);
    }

    /// Reject the next publish submission
    pub fn fail_next_publish(&self) {
        self.state.lock().failing_publishes += 1;
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    /// Report a terminal outcome for a submitted publish
    pub fn complete(&self, id: MessageId, outcome: PublishOutcome) {
        self.push_event(TransportEvent::PublishCompleted { id, outcome });
    }

    /// Acknowledge every publish submitted so far
    pub fn complete_all(&self) {
        let ids: Vec<MessageId> = self.state.lock().published.iter().map(|p| p.id).collect();
        for id in ids {
            self.complete(id, PublishOutcome::Success);
        }
    }

    /// Deliver an inbound publish
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.push_event(TransportEvent::MessageReceived(ReceivedMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            properties: None,
        }));
    }

    /// Simulate the broker going away; the next `poll` fails
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        self.changed.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connect_attempts(&self) -> Vec<(String, u16)> {
        self.state.lock().connect_attempts.clone()
    }

    pub fn reconnect_count(&self) -> usize {
        self.state.lock().reconnects
    }

    pub fn subscriptions(&self) -> Vec<SubscribeCall> {
        self.state.lock().subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.state.lock().unsubscriptions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn disconnect_reasons(&self) -> Vec<DisconnectReason> {
        self.state.lock().disconnects.clone()
    }

    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.connect_attempts.clear();
        state.subscriptions.clear();
        state.unsubscriptions.clear();
        state.published.clear();
        state.reconnects = 0;
    }

    fn push_event(&self, event: TransportEvent) {
        self.state.lock().events.push_back(event);
        self.changed.notify_all();
    }

    fn open_session(&self, state: &mut MockState) {
        state.connected = true;
        state.closed = false;
        state.events.push_back(TransportEvent::Connected);
        self.changed.notify_all();
    }
}

impl Transport for MockTransport {
    fn connect(&self, host: &str, port: u16, _keep_alive: Duration) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts.push((host.to_string(), port));
        if state.refused_hosts.contains(host) {
            return Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                port,
                reason: "connection refused".to_string(),
            });
        }
        state.session = Some((host.to_string(), port));
        self.open_session(&mut state);
        Ok(())
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.reconnects += 1;
        let host = match &state.session {
            Some((host, _)) => host.clone(),
            None => return Err(TransportError::NoSession),
        };
        if state.refused_hosts.contains(&host) {
            return Err(TransportError::ConnectRefused(format!("{host} unavailable")));
        }
        self.open_session(&mut state);
        Ok(())
    }

    fn disconnect(&self, reason: DisconnectReason) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.disconnects.push(reason);
        state.connected = false;
        state.closed = true;
        self.changed.notify_all();
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS, no_local: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_subscribe {
            return Err(TransportError::RequestRejected("subscribe refused".to_string()));
        }
        state.subscriptions.push(SubscribeCall {
            topic: topic.to_string(),
            qos,
            no_local,
        });
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.state.lock().unsubscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        properties: Option<&PublishProperties>,
    ) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(TransportError::RequestRejected("outgoing queue full".to_string()));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.published.push(PublishedMessage {
            id,
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            properties: properties.cloned(),
        });
        if state.auto_complete {
            state.events.push_back(TransportEvent::PublishCompleted {
                id,
                outcome: PublishOutcome::Success,
            });
            self.changed.notify_all();
        }
        Ok(id)
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.events.is_empty() {
                return Ok(state.events.drain(..).collect());
            }
            if state.closed {
                return Err(TransportError::Closed);
            }
            if !state.connected {
                return Err(TransportError::ConnectionLost("connection reset".to_string()));
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return Ok(Vec::new());
            }
        }
    }
}

/// Upward callback recorded by [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Received(ReceivedMessage),
    Connected,
}

/// Handler that stores every callback for later inspection
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn connected_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, RecordedEvent::Connected))
            .count()
    }

    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Received(message) => Some(message.clone()),
                RecordedEvent::Connected => None,
            })
            .collect()
    }
}

impl RemoteEventHandler for RecordingHandler {
    fn on_receive(&self, message: ReceivedMessage) {
        self.events.lock().push(RecordedEvent::Received(message));
    }

    fn on_connected(&self) {
        self.events.lock().push(RecordedEvent::Connected);
    }
}
