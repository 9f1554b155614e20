//! Mix bus
//!
//! Bookkeeping for the merge slots of the combining stage. Slot 0 holds the
//! live filler for the whole session; the remaining slots are handed to item
//! players. Slots live in a fixed arena with a free list and a generation
//! counter per slot, so a handle kept past its release is detected instead of
//! silently addressing the slot's next occupant.
//!
//! The bus also owns the item-lane block flag and the cumulative running-time
//! offset used to hide pauses from the items.

use crate::backend::{CombiningStage, SlotHandle, SubgraphId};
use crate::error::{Error, Result};
use seqcast_common::Timestamp;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Filler,
    Linked(SubgraphId),
    /// Out of the mix but not yet released
    Unlinked(SubgraphId),
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    generation: u32,
    state: SlotState,
}

const FILLER_INDEX: u32 = 0;

pub struct MixBus {
    stage: Arc<dyn CombiningStage>,
    slots: Vec<SlotEntry>,
    free: Vec<u32>,
    blocked: bool,
    offset: Timestamp,
}

impl MixBus {
    /// Allocate `capacity` slots and link the filler into the first one
    pub fn new(stage: Arc<dyn CombiningStage>, capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(Error::Config(format!(
                "Mix bus needs at least 2 slots, got {}",
                capacity
            )));
        }

        let mut slots = vec![
            SlotEntry {
                generation: 0,
                state: SlotState::Free,
            };
            capacity
        ];
        slots[FILLER_INDEX as usize].state = SlotState::Filler;

        stage.link_filler(SlotHandle {
            index: FILLER_INDEX,
            generation: 0,
        })?;

        // Reversed so the lowest index is handed out first
        let free = (1..capacity as u32).rev().collect();

        debug!("Mix bus ready with {} slots", capacity);
        Ok(Self {
            stage,
            slots,
            free,
            blocked: false,
            offset: Timestamp::ZERO,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn filler_slot(&self) -> SlotHandle {
        SlotHandle {
            index: FILLER_INDEX,
            generation: self.slots[FILLER_INDEX as usize].generation,
        }
    }

    pub fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    /// Allocate a slot and route `subgraph` into it
    pub fn attach(&mut self, subgraph: SubgraphId) -> Result<SlotHandle> {
        let index = self.free.pop().ok_or(Error::SlotsExhausted {
            capacity: self.slots.len(),
        })?;
        let handle = SlotHandle {
            index,
            generation: self.slots[index as usize].generation,
        };

        if let Err(e) = self.stage.link(handle, subgraph) {
            self.free.push(index);
            return Err(e);
        }

        self.slots[index as usize].state = SlotState::Linked(subgraph);
        trace!("Attached {} to {}", subgraph, handle);
        Ok(handle)
    }

    /// Stop the slot delivering samples; idempotent
    pub fn unlink(&mut self, slot: SlotHandle) -> Result<()> {
        let entry = self.entry_mut(slot)?;
        match entry.state {
            SlotState::Linked(subgraph) => {
                entry.state = SlotState::Unlinked(subgraph);
                self.stage.unlink(slot);
                trace!("Unlinked {} from {}", subgraph, slot);
                Ok(())
            }
            SlotState::Unlinked(_) => Ok(()),
            SlotState::Filler => Err(Error::InvalidState(
                "Filler slot cannot be unlinked".to_string(),
            )),
            SlotState::Free => Err(Error::StaleSlot),
        }
    }

    /// Release an unlinked slot back to the free list
    pub fn detach(&mut self, slot: SlotHandle) -> Result<()> {
        let entry = self.entry_mut(slot)?;
        match entry.state {
            SlotState::Unlinked(_) => {
                entry.state = SlotState::Free;
                entry.generation = entry.generation.wrapping_add(1);
                self.stage.release_slot(slot);
                self.free.push(slot.index);
                trace!("Released {}", slot);
                Ok(())
            }
            SlotState::Linked(_) => Err(Error::SlotStillLinked),
            SlotState::Filler => Err(Error::InvalidState(
                "Filler slot cannot be released".to_string(),
            )),
            SlotState::Free => Err(Error::StaleSlot),
        }
    }

    fn entry_mut(&mut self, slot: SlotHandle) -> Result<&mut SlotEntry> {
        match self.slots.get_mut(slot.index as usize) {
            Some(entry) if entry.generation == slot.generation => Ok(entry),
            _ => Err(Error::StaleSlot),
        }
    }

    /// Hold back the item lane; filler keeps flowing
    pub fn block(&mut self) {
        if !self.blocked {
            self.blocked = true;
            self.stage.block_items();
        }
    }

    pub fn unblock(&mut self) {
        if self.blocked {
            self.blocked = false;
            self.stage.unblock_items();
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Output position of the combined stream
    pub fn query_position(&self) -> Timestamp {
        self.stage.position()
    }

    /// Add `delta` to the item-lane offset; returns the new cumulative offset
    pub fn apply_offset(&mut self, delta: Timestamp) -> Timestamp {
        self.offset = self.offset.saturating_add(delta);
        self.stage.set_items_offset(self.offset);
        self.offset
    }

    pub fn items_offset(&self) -> Timestamp {
        self.offset
    }

    /// Item slots currently delivering
    pub fn linked_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Linked(_)))
            .count()
    }

    /// Item slots allocated (linked or unlinked)
    pub fn allocated_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Linked(_) | SlotState::Unlinked(_)))
            .count()
    }

    /// Unlink the filler; called once when the session ends
    pub fn close(&mut self) {
        self.unblock();
        let filler = self.filler_slot();
        self.stage.unlink(filler);
        self.stage.release_slot(filler);
        debug!("Mix bus closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Stage that only records what it was asked to do
    #[derive(Default)]
    struct RecordingStage {
        calls: Mutex<Vec<String>>,
        offset: Mutex<Timestamp>,
    }

    impl RecordingStage {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl CombiningStage for RecordingStage {
        fn link_filler(&self, slot: SlotHandle) -> Result<()> {
            self.record(format!("filler {}", slot));
            Ok(())
        }
        fn link(&self, slot: SlotHandle, subgraph: SubgraphId) -> Result<()> {
            self.record(format!("link {} {}", slot, subgraph));
            Ok(())
        }
        fn unlink(&self, slot: SlotHandle) {
            self.record(format!("unlink {}", slot));
        }
        fn release_slot(&self, slot: SlotHandle) {
            self.record(format!("release {}", slot));
        }
        fn block_items(&self) {
            self.record("block".to_string());
        }
        fn unblock_items(&self) {
            self.record("unblock".to_string());
        }
        fn set_items_offset(&self, offset: Timestamp) {
            *self.offset.lock().unwrap() = offset;
        }
        fn position(&self) -> Timestamp {
            Timestamp::from_millis(1500)
        }
    }

    fn bus(capacity: usize) -> (MixBus, Arc<RecordingStage>) {
        let stage = Arc::new(RecordingStage::default());
        let bus = MixBus::new(stage.clone(), capacity).unwrap();
        (bus, stage)
    }

    #[test]
    fn test_filler_linked_on_creation() {
        let (bus, stage) = bus(4);
        assert_eq!(stage.calls(), vec!["filler slot-0.0"]);
        assert_eq!(bus.linked_count(), 0);
        assert_eq!(bus.allocated_count(), 0);
    }

    #[test]
    fn test_rejects_capacity_below_two() {
        let stage = Arc::new(RecordingStage::default());
        assert!(MixBus::new(stage, 1).is_err());
    }

    #[test]
    fn test_attach_unlink_detach_cycle() {
        let (mut bus, _stage) = bus(3);

        let slot = bus.attach(SubgraphId(7)).unwrap();
        assert_eq!(slot.index, 1);
        assert_eq!(bus.linked_count(), 1);

        // Must be unlinked before release
        assert!(matches!(bus.detach(slot), Err(Error::SlotStillLinked)));

        bus.unlink(slot).unwrap();
        assert_eq!(bus.linked_count(), 0);
        assert_eq!(bus.allocated_count(), 1);

        bus.detach(slot).unwrap();
        assert_eq!(bus.allocated_count(), 0);
    }

    #[test]
    fn test_stale_handle_detected_after_reuse() {
        let (mut bus, _stage) = bus(2);

        let first = bus.attach(SubgraphId(1)).unwrap();
        bus.unlink(first).unwrap();
        bus.detach(first).unwrap();

        let second = bus.attach(SubgraphId(2)).unwrap();
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);

        assert!(matches!(bus.unlink(first), Err(Error::StaleSlot)));
        assert!(matches!(bus.detach(first), Err(Error::StaleSlot)));
        assert_eq!(bus.linked_count(), 1);
    }

    #[test]
    fn test_exhaustion() {
        let (mut bus, _stage) = bus(3);
        bus.attach(SubgraphId(1)).unwrap();
        bus.attach(SubgraphId(2)).unwrap();
        assert!(!bus.has_free_slot());
        assert!(matches!(
            bus.attach(SubgraphId(3)),
            Err(Error::SlotsExhausted { capacity: 3 })
        ));
    }

    #[test]
    fn test_filler_slot_protected() {
        let (mut bus, _stage) = bus(2);
        let filler = bus.filler_slot();
        assert!(matches!(bus.unlink(filler), Err(Error::InvalidState(_))));
        assert!(matches!(bus.detach(filler), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_block_is_idempotent() {
        let (mut bus, stage) = bus(2);
        bus.block();
        bus.block();
        assert!(bus.is_blocked());
        bus.unblock();
        bus.unblock();
        assert!(!bus.is_blocked());

        let calls = stage.calls();
        assert_eq!(calls.iter().filter(|c| *c == "block").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "unblock").count(), 1);
    }

    #[test]
    fn test_offset_accumulates() {
        let (mut bus, stage) = bus(2);
        assert_eq!(bus.apply_offset(Timestamp::from_millis(200)), Timestamp::from_millis(200));
        assert_eq!(bus.apply_offset(Timestamp::from_millis(300)), Timestamp::from_millis(500));
        assert_eq!(*stage.offset.lock().unwrap(), Timestamp::from_millis(500));

        // Saturates instead of wrapping
        assert_eq!(bus.apply_offset(Timestamp::MAX), Timestamp::MAX);
    }

    #[test]
    fn test_position_comes_from_stage() {
        let (bus, _stage) = bus(2);
        assert_eq!(bus.query_position(), Timestamp::from_millis(1500));
    }
}
