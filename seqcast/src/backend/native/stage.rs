//! Mixer state of the native combining stage
//!
//! Slot routes, item lanes and the item-lane block flag, all behind one
//! mutex that the mixer thread takes once per period. Rendering a period
//! never calls out: finish callbacks are collected and fired by the caller
//! after the lock is released.

use super::filler::SineFiller;
use super::subgraph::{DecodeStatus, Lane};
use crate::backend::{FinishCause, SlotHandle, SubgraphId};
use ringbuf::traits::*;
use seqcast_common::Timestamp;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Filler,
    Item(SubgraphId),
}

/// Callback to fire once the mixer lock is released
pub type PendingFinish = (Arc<dyn Fn(FinishCause) + Send + Sync>, FinishCause);

pub struct MixState {
    channels: usize,
    filler: SineFiller,
    /// Slot index -> (generation, route); ordered so mixing is deterministic
    routes: BTreeMap<u32, (u32, Route)>,
    pub lanes: HashMap<SubgraphId, Lane>,
    blocked: bool,
    items_offset: Timestamp,
    scratch: Vec<f32>,
}

impl MixState {
    pub fn new(channels: u16, filler: SineFiller) -> Self {
        Self {
            channels: channels.max(1) as usize,
            filler,
            routes: BTreeMap::new(),
            lanes: HashMap::new(),
            blocked: false,
            items_offset: Timestamp::ZERO,
            scratch: Vec::new(),
        }
    }

    pub fn route_filler(&mut self, slot: SlotHandle) {
        self.routes.insert(slot.index, (slot.generation, Route::Filler));
    }

    pub fn route_item(&mut self, slot: SlotHandle, subgraph: SubgraphId) {
        self.routes
            .insert(slot.index, (slot.generation, Route::Item(subgraph)));
    }

    /// Remove the route for `slot` if the handle is current
    pub fn unroute(&mut self, slot: SlotHandle) {
        if let Some((generation, _)) = self.routes.get(&slot.index) {
            if *generation == slot.generation {
                self.routes.remove(&slot.index);
            }
        }
    }

    /// Whether `subgraph` is still routed into a slot
    pub fn is_routed(&self, subgraph: SubgraphId) -> bool {
        self.routes
            .values()
            .any(|(_, route)| *route == Route::Item(subgraph))
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Record the paused time to subtract from item positions
    ///
    /// Bookkeeping only: lanes are pulled from their rings only while
    /// unblocked, so a pause already holds item audio back without any
    /// timestamp shift.
    pub fn set_items_offset(&mut self, offset: Timestamp) {
        self.items_offset = offset;
    }

    pub fn items_offset(&self) -> Timestamp {
        self.items_offset
    }

    /// Render `frames` frames into `out` (resized and zeroed here)
    ///
    /// Returns the finish notifications due this period.
    pub fn render(&mut self, frames: usize, out: &mut Vec<f32>) -> Vec<PendingFinish> {
        let samples = frames * self.channels;
        out.clear();
        out.resize(samples, 0.0);
        self.scratch.resize(samples, 0.0);

        let mut due = Vec::new();
        for (_, route) in self.routes.values() {
            match route {
                Route::Filler => self.filler.mix_into(out, self.channels),
                Route::Item(subgraph) => {
                    if self.blocked {
                        continue;
                    }
                    let Some(lane) = self.lanes.get_mut(subgraph) else {
                        continue;
                    };

                    let read = lane.consumer.pop_slice(&mut self.scratch[..samples]);
                    for (o, s) in out.iter_mut().zip(&self.scratch[..read]) {
                        *o += s;
                    }

                    if read < samples
                        && !lane.eos_reported
                        && lane.status() == DecodeStatus::Decoded
                        && lane.consumer.is_empty()
                    {
                        lane.eos_reported = true;
                        if let Some(cb) = lane.callback() {
                            due.push((cb, FinishCause::EndOfStream));
                        }
                    }
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        due
    }
}
