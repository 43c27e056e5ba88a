//! Queueing and dispatch engine
//!
//! Owns the message pool and the three collections a live message can be in:
//!
//! - **waiting**: not yet submitted, one FIFO per priority, drained highest first
//! - **publishing**: submitted to the transport, keyed by transport message id
//! - **published**: completed synchronous messages awaiting pickup, keyed by
//!   sequence number
//!
//! The engine is not synchronised on its own; the client keeps it behind its
//! single mutex and drives transport calls while holding that lock.

use crate::error::{ClientError, ClientResult, DeliveryFailure};
use crate::message::{Message, Priority};
use crate::pool::{AdmissionPolicy, MessageHandle, MessagePool, SlotState};
use crate::transport::{MessageId, PublishOutcome, PublishProperties, QoS, Transport};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// Point-in-time view of the message collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pool_capacity: usize,
    pub pool_used: usize,
    pub waiting: usize,
    pub publishing: usize,
    pub published: usize,
}

#[derive(Debug)]
pub struct DispatchEngine {
    pool: MessagePool,
    waiting: [VecDeque<MessageHandle>; 3],
    publishing: HashMap<MessageId, MessageHandle>,
    published: HashMap<u64, MessageHandle>,
    parallel_capacity: usize,
}

impl DispatchEngine {
    pub fn new(capacity: usize, parallel_capacity: usize, policy: AdmissionPolicy) -> Self {
        Self {
            pool: MessagePool::new(capacity, policy),
            waiting: Default::default(),
            publishing: HashMap::with_capacity(parallel_capacity),
            published: HashMap::new(),
            parallel_capacity,
        }
    }

    pub fn has_capacity_for(&self, priority: Priority) -> bool {
        self.pool.has_capacity_for(priority)
    }

    /// Allocate a message, applying the admission threshold for `priority`
    pub fn create(
        &mut self,
        topic: &str,
        qos: QoS,
        priority: Priority,
        sync: bool,
    ) -> ClientResult<MessageHandle> {
        if !self.pool.has_capacity_for(priority) {
            return Err(ClientError::resource_exhausted(format!(
                "message pool has no room for {priority:?} priority ({}/{})",
                self.pool.used(),
                self.pool.capacity()
            )));
        }
        self.pool
            .create(topic, qos, priority, sync)
            .ok_or_else(|| ClientError::resource_exhausted("message pool exhausted"))
    }

    /// Submit a freshly created message, or queue it when it cannot be sent now.
    ///
    /// The direct path hands `payload` to the transport without copying it.
    /// When the transport rejects a direct submission the slot is released
    /// and the error is returned to the caller.
    pub fn dispatch(
        &mut self,
        handle: MessageHandle,
        payload: &[u8],
        properties: Option<&PublishProperties>,
        transport: &dyn Transport,
        connected: bool,
    ) -> ClientResult<()> {
        if self.pool.state(handle) != Some(SlotState::CallerHeld) {
            return Err(ClientError::illegal_argument(
                "message is not awaiting dispatch",
            ));
        }

        if connected && self.publishing.len() < self.parallel_capacity {
            let submitted = match self.pool.get(handle) {
                Some(msg) => transport.publish(msg.topic(), payload, msg.qos(), properties),
                None => return Err(ClientError::illegal_argument("unknown message")),
            };
            return match submitted {
                Ok(mid) => {
                    self.mark_publishing(handle, mid);
                    Ok(())
                }
                Err(e) => {
                    self.pool.free(handle);
                    Err(e.into())
                }
            };
        }

        if let Some(msg) = self.pool.get_mut(handle) {
            msg.fill_payload(payload, properties);
        }
        self.enqueue_waiting(handle);
        Ok(())
    }

    /// Move waiting messages into the publishing map until it is full.
    ///
    /// Returns the number of messages submitted.
    pub fn promote(&mut self, transport: &dyn Transport) -> usize {
        let mut submitted = 0;
        while self.publishing.len() < self.parallel_capacity {
            let Some(handle) = self.pop_waiting() else {
                break;
            };
            let Some(msg) = self.pool.get_mut(handle) else {
                continue;
            };
            let (payload, properties) = msg.take_payload();
            match transport.publish(msg.topic(), &payload, msg.qos(), properties.as_ref()) {
                Ok(mid) => {
                    self.mark_publishing(handle, mid);
                    submitted += 1;
                }
                Err(e) => {
                    warn!(topic = %msg.topic(), error = %e, "Failed to submit queued message");
                    self.complete(handle, Err(DeliveryFailure::SubmitFailed(e.to_string())));
                }
            }
        }
        if submitted > 0 {
            debug!(submitted, waiting = self.waiting_len(), "Promoted queued messages");
        }
        submitted
    }

    /// Handle a publish acknowledgement from the transport.
    ///
    /// Returns `false` when the id is unknown, e.g. the waiter already gave up.
    pub fn on_publish_completed(&mut self, mid: MessageId, outcome: &PublishOutcome) -> bool {
        let Some(handle) = self.publishing.remove(&mid) else {
            trace!(mid, "Completion for unknown message id");
            return false;
        };
        let result = match outcome {
            outcome if outcome.is_success() => Ok(()),
            PublishOutcome::Failed(reason) => Err(DeliveryFailure::Rejected(reason.clone())),
            other => Err(DeliveryFailure::Rejected(format!("{other:?}"))),
        };
        self.complete(handle, result);
        true
    }

    /// Fail every QoS 0 message, which the transport will not resend.
    ///
    /// QoS 1 and 2 messages stay where they are.
    pub fn drop_qos0(&mut self) -> usize {
        let in_flight: Vec<MessageId> = self
            .publishing
            .iter()
            .filter(|(_, handle)| self.is_at_most_once(**handle))
            .map(|(mid, _)| *mid)
            .collect();

        let mut dropped = Vec::with_capacity(in_flight.len());
        for mid in in_flight {
            if let Some(handle) = self.publishing.remove(&mid) {
                dropped.push(handle);
            }
        }
        for queue in 0..self.waiting.len() {
            let (qos0, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.waiting[queue])
                .into_iter()
                .partition(|handle| self.is_at_most_once(*handle));
            self.waiting[queue] = rest;
            dropped.extend(qos0);
        }

        let count = dropped.len();
        for handle in dropped {
            self.complete(handle, Err(DeliveryFailure::DroppedOnDisconnect));
        }
        if count > 0 {
            warn!(count, "Dropped QoS 0 messages after disconnect");
        }
        count
    }

    /// Collect the result of a completed synchronous message and release it
    pub fn take_published(&mut self, handle: MessageHandle) -> Option<Result<(), DeliveryFailure>> {
        if self.pool.state(handle) != Some(SlotState::Published) {
            return None;
        }
        let seq_nr = self.pool.get(handle)?.seq_nr();
        self.published.remove(&seq_nr);
        self.pool.free(handle).map(|msg| msg.result().clone())
    }

    pub fn is_published(&self, handle: MessageHandle) -> bool {
        self.pool.state(handle) == Some(SlotState::Published)
    }

    /// Remove a message from whichever collection holds it and release it.
    ///
    /// Returns `false` when the message is no longer live.
    pub fn delete(&mut self, handle: MessageHandle) -> bool {
        let Some(msg) = self.pool.get(handle) else {
            return false;
        };
        let seq_nr = msg.seq_nr();
        let mid = msg.mid();
        let priority = msg.priority();

        let removed = if self.published.remove(&seq_nr).is_some() {
            true
        } else if let Some(mid) = mid.filter(|mid| self.publishing.get(mid) == Some(&handle)) {
            self.publishing.remove(&mid);
            true
        } else {
            let queue = &mut self.waiting[priority.index()];
            match queue.iter().position(|queued| *queued == handle) {
                Some(pos) => queue.remove(pos).is_some(),
                None => false,
            }
        };

        if removed {
            self.pool.free(handle);
        }
        removed
    }

    /// Release every live message. Used on shutdown when no caller can wait.
    pub fn clear(&mut self) {
        self.waiting.iter_mut().for_each(VecDeque::clear);
        self.publishing.clear();
        self.published.clear();
        for (handle, _) in self.pool.live_handles() {
            self.pool.free(handle);
        }
    }

    pub fn get(&self, handle: MessageHandle) -> Option<&Message> {
        self.pool.get(handle)
    }

    pub fn state(&self, handle: MessageHandle) -> Option<SlotState> {
        self.pool.state(handle)
    }

    /// Waiting handles in the order they will be submitted
    pub fn waiting_handles(&self) -> Vec<MessageHandle> {
        Priority::DESCENDING
            .iter()
            .flat_map(|priority| self.waiting[priority.index()].iter().copied())
            .collect()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.iter().map(VecDeque::len).sum()
    }

    pub fn publishing_len(&self) -> usize {
        self.publishing.len()
    }

    pub fn published_len(&self) -> usize {
        self.published.len()
    }

    pub fn pool_used(&self) -> usize {
        self.pool.used()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pool_capacity: self.pool.capacity(),
            pool_used: self.pool.used(),
            waiting: self.waiting_len(),
            publishing: self.publishing.len(),
            published: self.published.len(),
        }
    }

    /// Verify that every live message sits in exactly the collection its slot
    /// state names, and that pool usage matches collection sizes.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut caller_held = 0;
        for (handle, state) in self.pool.live_handles() {
            let in_waiting = self.waiting.iter().filter(|q| q.contains(&handle)).count();
            let in_publishing = self.publishing.values().filter(|h| **h == handle).count();
            let in_published = self.published.values().filter(|h| **h == handle).count();
            let expected = match state {
                SlotState::Waiting => (1, 0, 0),
                SlotState::Publishing => (0, 1, 0),
                SlotState::Published => (0, 0, 1),
                SlotState::CallerHeld => {
                    caller_held += 1;
                    (0, 0, 0)
                }
                SlotState::Free => (0, 0, 0),
            };
            if (in_waiting, in_publishing, in_published) != expected {
                return Err(format!(
                    "{handle:?} in state {state:?} found in waiting={in_waiting} publishing={in_publishing} published={in_published}"
                ));
            }
        }
        let tracked = self.waiting_len() + self.publishing.len() + self.published.len();
        if tracked + caller_held != self.pool.used() {
            return Err(format!(
                "pool reports {} used but collections hold {tracked} and callers {caller_held}",
                self.pool.used()
            ));
        }
        Ok(())
    }

    fn mark_publishing(&mut self, handle: MessageHandle, mid: MessageId) {
        if let Some(msg) = self.pool.get_mut(handle) {
            msg.set_mid(mid);
        }
        self.pool.set_state(handle, SlotState::Publishing);
        self.publishing.insert(mid, handle);
    }

    fn enqueue_waiting(&mut self, handle: MessageHandle) {
        let Some(priority) = self.pool.get(handle).map(Message::priority) else {
            return;
        };
        self.pool.set_state(handle, SlotState::Waiting);
        self.waiting[priority.index()].push_back(handle);
    }

    fn pop_waiting(&mut self) -> Option<MessageHandle> {
        Priority::DESCENDING
            .iter()
            .find_map(|priority| self.waiting[priority.index()].pop_front())
    }

    /// Synchronous messages move to the published map; others are released
    fn complete(&mut self, handle: MessageHandle, result: Result<(), DeliveryFailure>) {
        let Some(msg) = self.pool.get_mut(handle) else {
            return;
        };
        if msg.is_sync() {
            let seq_nr = msg.seq_nr();
            msg.set_result(result);
            self.pool.set_state(handle, SlotState::Published);
            self.published.insert(seq_nr, handle);
        } else {
            if let Err(failure) = &result {
                debug!(topic = %msg.topic(), %failure, "Asynchronous message not delivered");
            }
            self.pool.free(handle);
        }
    }

    fn is_at_most_once(&self, handle: MessageHandle) -> bool {
        self.pool
            .get(handle)
            .map(Message::is_at_most_once)
            .unwrap_or(false)
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use std::time::Duration;

    fn engine(capacity: usize, parallel: usize) -> DispatchEngine {
        DispatchEngine::new(capacity, parallel, AdmissionPolicy::default())
    }

    fn connected_transport() -> MockTransport {
        let transport = MockTransport::new();
        transport
            .connect("localhost", 1883, Duration::from_secs(60))
            .unwrap();
        transport
    }

    fn submit(
        engine: &mut DispatchEngine,
        transport: &MockTransport,
        connected: bool,
        qos: QoS,
        priority: Priority,
        sync: bool,
    ) -> MessageHandle {
        let handle = engine.create("org/event", qos, priority, sync).unwrap();
        engine
            .dispatch(handle, b"payload", None, transport, connected)
            .unwrap();
        handle
    }

    #[test]
    fn test_offline_messages_wait_in_arrival_order() {
        let transport = MockTransport::new();
        let mut engine = engine(10, 2);

        let handles: Vec<_> = (0..3)
            .map(|_| submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Low, false))
            .collect();

        assert_eq!(engine.pool_used(), 3);
        assert_eq!(engine.waiting_handles(), handles);
        assert_eq!(engine.publishing_len(), 0);
        assert!(transport.published().is_empty());
        engine.check_invariants().unwrap();
    }

    #[test]
    fn test_promotion_fills_publishing_to_parallel_capacity() {
        let transport = MockTransport::new();
        let mut engine = engine(10, 2);
        let handles: Vec<_> = (0..3)
            .map(|_| submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Low, false))
            .collect();

        transport
            .connect("localhost", 1883, Duration::from_secs(60))
            .unwrap();
        assert_eq!(engine.promote(&transport), 2);

        assert_eq!(engine.publishing_len(), 2);
        assert_eq!(engine.waiting_handles(), vec![handles[2]]);
        assert_eq!(engine.state(handles[0]), Some(SlotState::Publishing));
        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].payload, b"payload".to_vec());
        engine.check_invariants().unwrap();
    }

    #[test]
    fn test_completion_promotes_next_waiting_message() {
        let transport = connected_transport();
        let mut engine = engine(10, 1);
        let first = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, false);
        let second = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, false);
        assert_eq!(engine.state(second), Some(SlotState::Waiting));

        let mid = engine.get(first).unwrap().mid().unwrap();
        assert!(engine.on_publish_completed(mid, &PublishOutcome::Success));
        assert_eq!(engine.state(first), None);

        engine.promote(&transport);
        assert_eq!(engine.state(second), Some(SlotState::Publishing));
        assert_eq!(engine.pool_used(), 1);
    }

    #[test]
    fn test_waiting_order_is_priority_then_fifo() {
        let transport = MockTransport::new();
        let mut engine = engine(20, 2);
        let low1 = submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Low, false);
        let high1 = submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::High, false);
        let mid1 = submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Middle, false);
        let high2 = submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::High, false);
        let low2 = submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Low, false);

        assert_eq!(
            engine.waiting_handles(),
            vec![high1, high2, mid1, low1, low2]
        );
    }

    #[test]
    fn test_sync_completion_lands_in_published_map() {
        let transport = connected_transport();
        let mut engine = engine(10, 2);
        let handle = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, true);
        let mid = engine.get(handle).unwrap().mid().unwrap();

        engine.on_publish_completed(mid, &PublishOutcome::NoMatchingSubscribers);
        assert!(engine.is_published(handle));
        assert_eq!(engine.published_len(), 1);

        assert_eq!(engine.take_published(handle), Some(Ok(())));
        assert_eq!(engine.pool_used(), 0);
        assert_eq!(engine.take_published(handle), None);
    }

    #[test]
    fn test_rejected_publish_records_failure() {
        let transport = connected_transport();
        let mut engine = engine(10, 2);
        let handle = submit(&mut engine, &transport, true, QoS::ExactlyOnce, Priority::Low, true);
        let mid = engine.get(handle).unwrap().mid().unwrap();

        engine.on_publish_completed(mid, &PublishOutcome::Failed("quota exceeded".to_string()));
        assert_eq!(
            engine.take_published(handle),
            Some(Err(DeliveryFailure::Rejected("quota exceeded".to_string())))
        );
    }

    #[test]
    fn test_disconnect_drops_only_qos0() {
        let transport = connected_transport();
        let mut engine = engine(10, 4);
        let qos0 = submit(&mut engine, &transport, true, QoS::AtMostOnce, Priority::Low, false);
        let qos1 = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, false);
        assert_eq!(engine.publishing_len(), 2);

        assert_eq!(engine.drop_qos0(), 1);
        assert_eq!(engine.state(qos0), None);
        assert_eq!(engine.state(qos1), Some(SlotState::Publishing));
        assert_eq!(engine.pool_used(), 1);
        engine.check_invariants().unwrap();
    }

    #[test]
    fn test_disconnect_fails_waiting_sync_qos0() {
        let transport = connected_transport();
        let mut engine = engine(10, 1);
        let _busy = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, false);
        let queued = submit(&mut engine, &transport, true, QoS::AtMostOnce, Priority::Low, true);
        assert_eq!(engine.state(queued), Some(SlotState::Waiting));

        engine.drop_qos0();
        assert_eq!(
            engine.take_published(queued),
            Some(Err(DeliveryFailure::DroppedOnDisconnect))
        );
    }

    #[test]
    fn test_direct_submit_failure_frees_slot() {
        let transport = connected_transport();
        transport.fail_next_publish();
        let mut engine = engine(10, 2);
        let handle = engine
            .create("org/event", QoS::AtLeastOnce, Priority::High, false)
            .unwrap();

        let result = engine.dispatch(handle, b"x", None, &transport, true);
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(engine.pool_used(), 0);
    }

    #[test]
    fn test_promotion_failure_completes_sync_message_as_failed() {
        let transport = MockTransport::new();
        let mut engine = engine(10, 2);
        let handle = submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Low, true);

        transport
            .connect("localhost", 1883, Duration::from_secs(60))
            .unwrap();
        transport.fail_next_publish();
        assert_eq!(engine.promote(&transport), 0);

        assert!(matches!(
            engine.take_published(handle),
            Some(Err(DeliveryFailure::SubmitFailed(_)))
        ));
    }

    #[test]
    fn test_admission_thresholds() {
        let transport = MockTransport::new();
        let mut engine = engine(20, 2);
        for _ in 0..14 {
            submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::High, false);
        }
        assert!(engine.create("t", QoS::AtLeastOnce, Priority::Low, false).is_err());
        submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Middle, false);
        submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Middle, false);
        submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::Middle, false);
        assert_eq!(engine.pool_used(), 17);
        assert!(matches!(
            engine.create("t", QoS::AtLeastOnce, Priority::Middle, false),
            Err(ClientError::ResourceExhausted { .. })
        ));
        for _ in 0..3 {
            submit(&mut engine, &transport, false, QoS::AtLeastOnce, Priority::High, false);
        }
        assert!(engine.create("t", QoS::AtLeastOnce, Priority::High, false).is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let transport = connected_transport();
        let mut engine = engine(10, 1);
        let publishing = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, true);
        let waiting = submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, true);

        assert!(engine.delete(waiting));
        assert!(!engine.delete(waiting));
        assert!(engine.delete(publishing));
        assert!(!engine.delete(publishing));
        assert_eq!(engine.pool_used(), 0);

        // late acknowledgement for the deleted message is ignored
        assert!(!engine.on_publish_completed(1, &PublishOutcome::Success));
        engine.check_invariants().unwrap();
    }

    #[test]
    fn test_clear_releases_everything() {
        let transport = connected_transport();
        let mut engine = engine(10, 1);
        submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::Low, true);
        submit(&mut engine, &transport, true, QoS::AtLeastOnce, Priority::High, false);
        engine.clear();
        assert_eq!(engine.stats().pool_used, 0);
        assert_eq!(engine.waiting_len(), 0);
    }
}
