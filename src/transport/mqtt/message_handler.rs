//! Pure routing of rumqttc events
//!
//! Classifies each event from the rumqttc connection so the transport only
//! has to act on the few that matter to publish tracking and the client.

use crate::transport::{PublishOutcome, ReceivedMessage};
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, Packet, PubAckReason, PubCompReason, PubRecReason,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match &connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged {
                        session_present: connack.session_present,
                    },
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(ReceivedMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    properties: publish.properties.clone(),
                }),
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    pkid: puback.pkid,
                    outcome: Self::puback_outcome(&puback.reason),
                },
                Packet::PubRec(pubrec) => match Self::pubrec_failure(&pubrec.reason) {
                    Some(reason) => EventRoute::PublishAcknowledged {
                        pkid: pubrec.pkid,
                        outcome: PublishOutcome::Failed(reason),
                    },
                    None => EventRoute::Other,
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                    pkid: pubcomp.pkid,
                    outcome: match &pubcomp.reason {
                        PubCompReason::Success => PublishOutcome::Success,
                        reason => PublishOutcome::Failed(format!("{reason:?}")),
                    },
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                _ => EventRoute::Other,
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::Other,
        }
    }

    /// Both success codes count as delivered (pure function)
    pub fn puback_outcome(reason: &PubAckReason) -> PublishOutcome {
        match reason {
            PubAckReason::Success => PublishOutcome::Success,
            PubAckReason::NoMatchingSubscribers => PublishOutcome::NoMatchingSubscribers,
            other => PublishOutcome::Failed(format!("{other:?}")),
        }
    }

    /// A failing PUBREC ends a QoS 2 exchange early (pure function)
    pub fn pubrec_failure(reason: &PubRecReason) -> Option<String> {
        match reason {
            PubRecReason::Success | PubRecReason::NoMatchingSubscribers => None,
            other => Some(format!("{other:?}")),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session, resuming stored state if `session_present`
    ConnectionAcknowledged { session_present: bool },
    /// Broker answered CONNECT with a failure code
    ConnectionRefused(String),
    /// Publish received on a subscribed topic
    MessageReceived(ReceivedMessage),
    /// Publish written to the network with this packet id (0 for QoS 0)
    PublishSent(u16),
    /// Terminal acknowledgement for an outgoing publish
    PublishAcknowledged { pkid: u16, outcome: PublishOutcome },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Our DISCONNECT was written
    DisconnectSent,
    /// Pings, subscription acks and other bookkeeping
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, PubAck, PubComp, PubRec, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let ok = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_event(&ok),
            EventRoute::ConnectionAcknowledged {
                session_present: true
            }
        );

        let refused = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_event(&refused),
            EventRoute::ConnectionRefused(_)
        ));
    }

    #[test]
    fn test_route_incoming_publish() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("org/event"),
            pkid: 1,
            payload: Bytes::from_static(b"{}"),
            properties: None,
        };
        let route = MessageHandler::route_event(&Event::Incoming(Packet::Publish(publish)));
        match route {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "org/event");
                assert_eq!(message.payload.as_ref(), b"{}");
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_route_puback_reasons() {
        let ack = |reason| {
            MessageHandler::route_event(&Event::Incoming(Packet::PubAck(PubAck {
                pkid: 7,
                reason,
                properties: None,
            })))
        };
        assert_eq!(
            ack(PubAckReason::Success),
            EventRoute::PublishAcknowledged {
                pkid: 7,
                outcome: PublishOutcome::Success
            }
        );
        assert_eq!(
            ack(PubAckReason::NoMatchingSubscribers),
            EventRoute::PublishAcknowledged {
                pkid: 7,
                outcome: PublishOutcome::NoMatchingSubscribers
            }
        );
        assert!(matches!(
            ack(PubAckReason::QuotaExceeded),
            EventRoute::PublishAcknowledged {
                outcome: PublishOutcome::Failed(_),
                ..
            }
        ));
    }

    #[test]
    fn test_route_qos2_flow() {
        let pubrec_ok = Event::Incoming(Packet::PubRec(PubRec {
            pkid: 3,
            reason: PubRecReason::Success,
            properties: None,
        }));
        assert_eq!(MessageHandler::route_event(&pubrec_ok), EventRoute::Other);

        let pubrec_failed = Event::Incoming(Packet::PubRec(PubRec {
            pkid: 3,
            reason: PubRecReason::NotAuthorized,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_event(&pubrec_failed),
            EventRoute::PublishAcknowledged { pkid: 3, .. }
        ));

        let pubcomp = Event::Incoming(Packet::PubComp(PubComp {
            pkid: 3,
            reason: PubCompReason::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_event(&pubcomp),
            EventRoute::PublishAcknowledged {
                pkid: 3,
                outcome: PublishOutcome::Success
            }
        );
    }

    #[test]
    fn test_route_outgoing() {
        assert_eq!(
            MessageHandler::route_event(&Event::Outgoing(Outgoing::Publish(12))),
            EventRoute::PublishSent(12)
        );
        assert_eq!(
            MessageHandler::route_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
        assert_eq!(
            MessageHandler::route_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Other
        );
    }
}
