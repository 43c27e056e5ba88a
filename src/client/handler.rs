//! Upward notifications to the event-admin layer

use crate::transport::ReceivedMessage;
use std::sync::mpsc;
use tracing::debug;

/// Receives events from the broker connection.
///
/// Both methods run on the connection manager thread with no client lock
/// held, so implementations may call back into the client. Blocking here
/// stalls the event loop.
pub trait RemoteEventHandler: Send + Sync {
    fn on_receive(&self, message: ReceivedMessage);

    /// A session has been (re)established and subscriptions replayed
    fn on_connected(&self) {}
}

/// Notification forwarded by [`ChannelForwarder`]
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    Received(ReceivedMessage),
    Connected,
}

/// Forwards callbacks into an mpsc channel for consumption on another thread
#[derive(Debug)]
pub struct ChannelForwarder {
    sender: mpsc::Sender<HandlerEvent>,
}

impl ChannelForwarder {
    pub fn new(sender: mpsc::Sender<HandlerEvent>) -> Self {
        Self { sender }
    }

    /// Create a forwarder together with its receiving end
    pub fn channel() -> (Self, mpsc::Receiver<HandlerEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self::new(sender), receiver)
    }

    fn forward(&self, event: HandlerEvent) {
        if self.sender.send(event).is_err() {
            debug!("Event receiver dropped, discarding notification");
        }
    }
}

impl RemoteEventHandler for ChannelForwarder {
    fn on_receive(&self, message: ReceivedMessage) {
        self.forward(HandlerEvent::Received(message));
    }

    fn on_connected(&self) {
        self.forward(HandlerEvent::Connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_forwarder_sends_events() {
        let (forwarder, receiver) = ChannelForwarder::channel();
        forwarder.on_connected();
        forwarder.on_receive(ReceivedMessage {
            topic: "org/event".to_string(),
            payload: Bytes::from_static(b"{}"),
            properties: None,
        });

        assert_eq!(receiver.recv().unwrap(), HandlerEvent::Connected);
        match receiver.recv().unwrap() {
            HandlerEvent::Received(message) => assert_eq!(message.topic, "org/event"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_forwarder_tolerates_dropped_receiver() {
        let (forwarder, receiver) = ChannelForwarder::channel();
        drop(receiver);
        forwarder.on_connected();
    }
}
