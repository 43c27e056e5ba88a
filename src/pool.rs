//! Fixed-capacity message arena with priority-based admission
//!
//! Slots are addressed by [`MessageHandle`] (index plus generation), so a
//! handle held after its slot was released resolves to nothing instead of
//! to someone else's message. Each live slot records which collection
//! currently owns it in [`SlotState`].

use crate::message::{Message, Priority};
use crate::transport::QoS;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Admission thresholds, in percent of pool capacity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionPolicy {
    #[serde(default = "default_low_percent")]
    pub low_percent: u8,
    #[serde(default = "default_middle_percent")]
    pub middle_percent: u8,
    #[serde(default = "default_high_percent")]
    pub high_percent: u8,
}

fn default_low_percent() -> u8 {
    70
}

fn default_middle_percent() -> u8 {
    85
}

fn default_high_percent() -> u8 {
    100
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            low_percent: default_low_percent(),
            middle_percent: default_middle_percent(),
            high_percent: default_high_percent(),
        }
    }
}

impl AdmissionPolicy {
    /// Number of used slots at which `priority` stops being admitted
    pub fn threshold(&self, capacity: usize, priority: Priority) -> usize {
        let percent = match priority {
            Priority::Low => self.low_percent,
            Priority::Middle => self.middle_percent,
            Priority::High => self.high_percent,
        };
        capacity * percent as usize / 100
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.low_percent == 0 {
            return Err("low_percent must be greater than 0".to_string());
        }
        if self.low_percent > self.middle_percent || self.middle_percent > self.high_percent {
            return Err("admission thresholds must satisfy low <= middle <= high".to_string());
        }
        if self.high_percent > 100 {
            return Err("high_percent must not exceed 100".to_string());
        }
        Ok(())
    }
}

/// Stable reference to a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    index: u32,
    generation: u32,
}

/// Which collection owns a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Created but not yet queued or submitted
    CallerHeld,
    Waiting,
    Publishing,
    Published,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
    message: Option<Message>,
}

/// Fixed-capacity pool of message slots
#[derive(Debug)]
pub struct MessagePool {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
    used: usize,
    policy: AdmissionPolicy,
}

impl MessagePool {
    pub fn new(capacity: usize, policy: AdmissionPolicy) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                state: SlotState::Free,
                message: None,
            })
            .collect();
        Self {
            slots,
            free: (0..capacity as u32).collect(),
            used: 0,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Whether a message of `priority` may be created right now
    pub fn has_capacity_for(&self, priority: Priority) -> bool {
        self.used < self.policy.threshold(self.capacity(), priority)
    }

    /// Pop a free slot and place `message` in it; `None` when exhausted
    pub fn alloc(&mut self, message: Message) -> Option<MessageHandle> {
        let index = self.free.pop_front()?;
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::CallerHeld;
        slot.message = Some(message);
        self.used += 1;
        Some(MessageHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Create a message in a free slot
    pub fn create(
        &mut self,
        topic: &str,
        qos: QoS,
        priority: Priority,
        sync: bool,
    ) -> Option<MessageHandle> {
        if self.free.is_empty() {
            return None;
        }
        self.alloc(Message::new(topic, qos, priority, sync))
    }

    /// Return a slot to the free list, handing back its message.
    ///
    /// A stale handle yields `None` and leaves the pool untouched.
    pub fn free(&mut self, handle: MessageHandle) -> Option<Message> {
        let slot = self.live_slot_mut(handle)?;
        let message = slot.message.take();
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        assert!(self.used > 0, "message pool released more slots than it allocated");
        self.used -= 1;
        self.free.push_back(handle.index);
        message
    }

    pub fn get(&self, handle: MessageHandle) -> Option<&Message> {
        self.live_slot(handle)?.message.as_ref()
    }

    pub fn get_mut(&mut self, handle: MessageHandle) -> Option<&mut Message> {
        self.live_slot_mut(handle)?.message.as_mut()
    }

    /// Current owner of a slot; `None` for stale handles
    pub fn state(&self, handle: MessageHandle) -> Option<SlotState> {
        self.live_slot(handle).map(|slot| slot.state)
    }

    pub(crate) fn set_state(&mut self, handle: MessageHandle, state: SlotState) {
        if let Some(slot) = self.live_slot_mut(handle) {
            slot.state = state;
        }
    }

    /// Handles of every slot currently in use
    pub fn live_handles(&self) -> Vec<(MessageHandle, SlotState)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state != SlotState::Free)
            .map(|(index, slot)| {
                (
                    MessageHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    slot.state,
                )
            })
            .collect()
    }

    fn live_slot(&self, handle: MessageHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.state != SlotState::Free)
    }

    fn live_slot_mut(&mut self, handle: MessageHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.state != SlotState::Free)
    }
}

impl Drop for MessagePool {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(self.used, 0, "message pool dropped with live messages");
        }
    }
}
