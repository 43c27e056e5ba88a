//! Reactions to transport events, run on the connection manager thread
//!
//! State changes happen under the client mutex. Upward notifications to the
//! [`RemoteEventHandler`](super::RemoteEventHandler) are made after the lock
//! is released so handlers may call back into the client.

use super::Shared;
use crate::transport::{MessageId, PublishOutcome, ReceivedMessage, TransportEvent};
use tracing::{debug, error, info, trace};

/// Apply one transport event to the shared state
pub(crate) fn handle_event(shared: &Shared, event: TransportEvent) {
    match event {
        TransportEvent::Connected => on_connected(shared),
        TransportEvent::ConnectFailed(reason) => {
            error!(reason = %reason, "Broker refused connection");
        }
        TransportEvent::Disconnected(reason) => on_disconnected(shared, &reason),
        TransportEvent::MessageReceived(message) => on_message(shared, message),
        TransportEvent::PublishCompleted { id, outcome } => {
            on_publish_completed(shared, id, &outcome)
        }
    }
}

/// Session established: replay subscriptions and drain the waiting queue
pub(crate) fn on_connected(shared: &Shared) {
    {
        let mut state = shared.state.lock();
        state.connected = true;
        let transport = shared.transport.as_ref();
        state.subscriptions.replay(transport);
        state.engine.promote(transport);
    }
    info!(client_id = %shared.client_id, "Connected to MQTT broker");
    shared.status_changed.notify_all();
    shared.handler.on_connected();
}

/// Session lost: QoS 0 traffic cannot be resent, so it fails now
pub(crate) fn on_disconnected(shared: &Shared, reason: &str) {
    {
        let mut state = shared.state.lock();
        if state.connected {
            state.connected = false;
            state.engine.drop_qos0();
            info!(reason, "Disconnected from MQTT broker");
        } else {
            debug!(reason, "Disconnect reported while not connected");
        }
    }
    shared.status_changed.notify_all();
}

fn on_message(shared: &Shared, message: ReceivedMessage) {
    trace!(topic = %message.topic, bytes = message.payload.len(), "Received remote event");
    shared.handler.on_receive(message);
}

fn on_publish_completed(shared: &Shared, id: MessageId, outcome: &PublishOutcome) {
    match outcome {
        PublishOutcome::Success => trace!(mid = id, "Message published"),
        PublishOutcome::NoMatchingSubscribers => {
            trace!(mid = id, "Message published, no matching subscribers")
        }
        PublishOutcome::Failed(reason) => error!(mid = id, reason = %reason, "Publish rejected"),
    }
    {
        let mut state = shared.state.lock();
        state.engine.on_publish_completed(id, outcome);
        if state.connected {
            state.engine.promote(shared.transport.as_ref());
        }
    }
    shared.status_changed.notify_all();
}
