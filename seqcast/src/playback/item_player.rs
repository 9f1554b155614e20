//! Item player
//!
//! Wraps one catalog entry's backend sub-graph and its merge slot. Every way an
//! item can end (natural end of stream, contained fault, stop request) goes
//! through a single [`CompletionGuard`], which posts exactly one
//! [`FinishedNotice`] to the control timeline no matter how many of those
//! paths race.
//!
//! Lifecycle:
//! ```text
//! Constructing -> Active -> Draining -> Retiring -> Retired
//! ```
//! `Draining` means unlinked from the mix (possibly waiting in the pending
//! release queue); `Retiring` means owned by the reclaimer.

use super::catalog::PlaylistEntry;
use super::events::{ControlEvent, ControlSender, FinishedNotice};
use super::mix_bus::MixBus;
use crate::backend::{FinishCause, MediaBackend, ReleaseStatus, SlotHandle, SubgraphId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Item lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Constructing,
    Active,
    Draining,
    Retiring,
    Retired,
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemState::Constructing => write!(f, "Constructing"),
            ItemState::Active => write!(f, "Active"),
            ItemState::Draining => write!(f, "Draining"),
            ItemState::Retiring => write!(f, "Retiring"),
            ItemState::Retired => write!(f, "Retired"),
        }
    }
}

/// One-shot completion notification
///
/// Shared between the item player and the backend callback. The first
/// [`fire`](Self::fire) wins; later calls from any thread are no-ops.
#[derive(Debug)]
pub struct CompletionGuard {
    item_id: Uuid,
    fired: AtomicBool,
    notify: ControlSender,
}

impl CompletionGuard {
    pub fn new(item_id: Uuid, notify: ControlSender) -> Arc<Self> {
        Arc::new(Self {
            item_id,
            fired: AtomicBool::new(false),
            notify,
        })
    }

    /// Post the completion notice if nobody has yet
    ///
    /// Returns true for the single call that won.
    pub fn fire(&self, stopped: bool, fault: Option<String>) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let notice = FinishedNotice {
            item_id: self.item_id,
            stopped,
            fault,
        };
        if self.notify.send(ControlEvent::ItemFinished(notice)).is_err() {
            // Control timeline already gone (session ended)
            debug!("Completion of {} not delivered: control closed", self.item_id);
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Playback of one catalog entry
pub struct ItemPlayer {
    id: Uuid,
    entry: PlaylistEntry,
    backend: Arc<dyn MediaBackend>,
    subgraph: Option<SubgraphId>,
    slot: Option<SlotHandle>,
    state: ItemState,
    guard: Arc<CompletionGuard>,
    stop_requested: bool,
}

impl ItemPlayer {
    /// Construct, attach and start the sub-graph for `entry`
    ///
    /// Never fails: construction, attach and start errors are contained and
    /// reported as a fault completion, so the sequencer moves on exactly as
    /// it would at end of stream.
    pub fn start(
        entry: &PlaylistEntry,
        backend: Arc<dyn MediaBackend>,
        bus: &mut MixBus,
        notify: ControlSender,
    ) -> Self {
        let id = Uuid::new_v4();
        let mut player = Self {
            id,
            entry: entry.clone(),
            backend,
            subgraph: None,
            slot: None,
            state: ItemState::Constructing,
            guard: CompletionGuard::new(id, notify),
            stop_requested: false,
        };

        if let Err(message) = player.bring_up(bus) {
            warn!("Item {} ({}) faulted: {}", id, player.entry, message);
            player.guard.fire(false, Some(message));
        }
        player
    }

    fn bring_up(&mut self, bus: &mut MixBus) -> std::result::Result<(), String> {
        let subgraph = self
            .backend
            .construct_subgraph(&self.entry)
            .map_err(|e| e.to_string())?;
        self.subgraph = Some(subgraph);

        let slot = bus.attach(subgraph).map_err(|e| e.to_string())?;
        self.slot = Some(slot);

        let guard = Arc::clone(&self.guard);
        let item_id = self.id;
        self.backend.notify_on_finish(
            subgraph,
            Box::new(move |cause| match cause {
                FinishCause::EndOfStream => {
                    guard.fire(false, None);
                }
                FinishCause::Fault(message) => {
                    warn!("Item {} reported fault: {}", item_id, message);
                    guard.fire(false, Some(message));
                }
            }),
        );

        self.backend.start(subgraph).map_err(|e| e.to_string())?;
        self.state = ItemState::Active;
        debug!("Item {} active on {} ({})", self.id, slot, subgraph);
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn entry(&self) -> &PlaylistEntry {
        &self.entry
    }

    pub fn subgraph(&self) -> Option<SubgraphId> {
        self.subgraph
    }

    pub fn slot(&self) -> Option<SlotHandle> {
        self.slot
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn guard(&self) -> &Arc<CompletionGuard> {
        &self.guard
    }

    /// Whether [`stop`](Self::stop) was called, whichever path won the guard
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Request early completion; repeated calls are no-ops
    pub fn stop(&mut self) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;
        if let Some(subgraph) = self.subgraph {
            self.backend.stop(subgraph);
        }
        self.guard.fire(true, None);
        self.mark_finished();
    }

    /// Record that the completion notice was delivered
    pub fn mark_finished(&mut self) {
        if matches!(self.state, ItemState::Constructing | ItemState::Active) {
            self.state = ItemState::Draining;
        }
    }

    /// Take the slot out of the mix; it stays allocated until `detach`
    pub fn unlink(&mut self, bus: &mut MixBus) {
        if let Some(slot) = self.slot {
            if let Err(e) = bus.unlink(slot) {
                warn!("Unlinking {} for item {} failed: {}", slot, self.id, e);
            }
        }
        self.mark_finished();
    }

    /// Give the slot back to the mix bus; the sub-graph is next
    pub fn detach(&mut self, bus: &mut MixBus) {
        if let Some(slot) = self.slot.take() {
            if let Err(e) = bus.detach(slot) {
                warn!("Releasing {} for item {} failed: {}", slot, self.id, e);
            }
        }
        if self.state != ItemState::Retired {
            self.state = ItemState::Retiring;
        }
    }

    /// One teardown attempt of the sub-graph
    pub fn release_once(&mut self) -> ReleaseStatus {
        let status = match self.subgraph {
            Some(subgraph) => self.backend.release(subgraph),
            None => ReleaseStatus::Done,
        };
        if status == ReleaseStatus::Done {
            self.state = ItemState::Retired;
        }
        status
    }
}

impl std::fmt::Debug for ItemPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPlayer")
            .field("id", &self.id)
            .field("entry", &self.entry.uri())
            .field("subgraph", &self.subgraph)
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("stop_requested", &self.stop_requested)
            .finish()
    }
}
