//! Property tests for the dispatch engine
//!
//! Random sequences of publishes, connection changes, completions and
//! deletions must never break slot accounting or waiting-queue order.

use proptest::prelude::*;
use remote_event_mqtt::dispatch::DispatchEngine;
use remote_event_mqtt::pool::AdmissionPolicy;
use remote_event_mqtt::testing::MockTransport;
use remote_event_mqtt::transport::{PublishOutcome, Transport};
use remote_event_mqtt::{Priority, QoS};
use std::time::Duration;

const CAPACITY: usize = 16;
const PARALLEL: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Publish { priority: Priority, qos: QoS, sync: bool },
    Connect,
    Disconnect,
    Complete { pick: usize, fail: bool },
    Delete { pick: usize },
    Take { pick: usize },
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Low), Just(Priority::Middle), Just(Priority::High)]
}

fn qos() -> impl Strategy<Value = QoS> {
    prop_oneof![
        Just(QoS::AtMostOnce),
        Just(QoS::AtLeastOnce),
        Just(QoS::ExactlyOnce)
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (priority(), qos(), any::<bool>())
            .prop_map(|(priority, qos, sync)| Op::Publish { priority, qos, sync }),
        1 => Just(Op::Connect),
        1 => Just(Op::Disconnect),
        3 => (any::<usize>(), any::<bool>()).prop_map(|(pick, fail)| Op::Complete { pick, fail }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
        1 => any::<usize>().prop_map(|pick| Op::Take { pick }),
    ]
}

fn assert_waiting_order(engine: &DispatchEngine) {
    let priorities: Vec<Priority> = engine
        .waiting_handles()
        .into_iter()
        .filter_map(|handle| engine.get(handle).map(|msg| msg.priority()))
        .collect();
    assert!(
        priorities.windows(2).all(|pair| pair[0] >= pair[1]),
        "waiting queue out of order: {priorities:?}"
    );
}

proptest! {
    #[test]
    fn engine_invariants_hold(ops in prop::collection::vec(op(), 1..80)) {
        let transport = MockTransport::new();
        let mut engine = DispatchEngine::new(CAPACITY, PARALLEL, AdmissionPolicy::default());
        let mut connected = false;
        let mut handles = Vec::new();

        for op in ops {
            match op {
                Op::Publish { priority, qos, sync } => {
                    let admitted = engine.has_capacity_for(priority);
                    match engine.create("org/event", qos, priority, sync) {
                        Ok(handle) => {
                            prop_assert!(admitted);
                            engine
                                .dispatch(handle, b"payload", None, &transport, connected)
                                .unwrap();
                            handles.push(handle);
                        }
                        Err(_) => prop_assert!(!admitted),
                    }
                }
                Op::Connect => {
                    if !connected {
                        transport.connect("localhost", 1883, Duration::from_secs(60)).unwrap();
                        connected = true;
                        engine.promote(&transport);
                    }
                }
                Op::Disconnect => {
                    if connected {
                        transport.drop_connection();
                        connected = false;
                        engine.drop_qos0();
                    }
                }
                Op::Complete { pick, fail } => {
                    let published = transport.published();
                    if !published.is_empty() {
                        let id = published[pick % published.len()].id;
                        let outcome = if fail {
                            PublishOutcome::Failed("rejected".to_string())
                        } else {
                            PublishOutcome::Success
                        };
                        engine.on_publish_completed(id, &outcome);
                        if connected {
                            engine.promote(&transport);
                        }
                    }
                }
                Op::Delete { pick } => {
                    if !handles.is_empty() {
                        let handle = handles[pick % handles.len()];
                        engine.delete(handle);
                        // a second delete finds nothing to release
                        prop_assert!(!engine.delete(handle));
                    }
                }
                Op::Take { pick } => {
                    if !handles.is_empty() {
                        let handle = handles[pick % handles.len()];
                        let was_published = engine.is_published(handle);
                        prop_assert_eq!(engine.take_published(handle).is_some(), was_published);
                    }
                }
            }

            prop_assert!(engine.check_invariants().is_ok(), "{:?}", engine.check_invariants());
            prop_assert!(engine.pool_used() <= CAPACITY);
            prop_assert!(engine.publishing_len() <= PARALLEL);
            assert_waiting_order(&engine);
        }

        engine.clear();
        prop_assert_eq!(engine.pool_used(), 0);
    }

    #[test]
    fn admission_thresholds_match_policy(capacity in 1usize..200, used in 0usize..200) {
        let policy = AdmissionPolicy::default();
        let used = used.min(capacity);
        let mut engine = DispatchEngine::new(capacity, 1, policy);
        for _ in 0..used {
            engine.create("t", QoS::AtLeastOnce, Priority::High, false).unwrap();
        }

        for priority in Priority::DESCENDING {
            prop_assert_eq!(
                engine.has_capacity_for(priority),
                used < policy.threshold(capacity, priority)
            );
        }
        // caller-held messages are released by clear
        engine.clear();
        prop_assert_eq!(engine.pool_used(), 0);
    }
}
