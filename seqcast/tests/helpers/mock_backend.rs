//! Scriptable in-memory backend
//!
//! Implements both backend traits without producing audio. Tests decide when
//! an item reaches end of stream or faults, how many `Busy` answers a release
//! gets, and where the output position is. Every call is recorded.

#![allow(dead_code)]

use seqcast::backend::{
    CombiningStage, FinishCallback, FinishCause, MediaBackend, ReleaseStatus, SlotHandle,
    SubgraphId,
};
use seqcast::playback::PlaylistEntry;
use seqcast::{Error, Result};
use seqcast_common::Timestamp;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    /// Subgraph -> file name, in construction order
    constructed: Vec<(SubgraphId, String)>,
    started: Vec<SubgraphId>,
    stopped: Vec<SubgraphId>,
    released: Vec<SubgraphId>,
    release_attempts: HashMap<SubgraphId, u32>,
    callbacks: HashMap<SubgraphId, Arc<dyn Fn(FinishCause) + Send + Sync>>,
    links: HashMap<u32, SubgraphId>,
    max_linked: usize,
    filler_linked: bool,
    blocked: bool,
    offset: Timestamp,
    position: Timestamp,
    /// File name -> Busy answers before Done
    busy_script: HashMap<String, u32>,
    fail_construct: HashSet<String>,
    fail_start: HashSet<String>,
    sanity_error: Option<String>,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

fn file_name(entry: &PlaylistEntry) -> String {
    entry
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    // ----- scripting -----

    /// Releases of `name` answer Busy `count` times before Done
    pub fn busy_releases(&self, name: &str, count: u32) {
        self.state().busy_script.insert(name.to_string(), count);
    }

    pub fn fail_construct(&self, name: &str) {
        self.state().fail_construct.insert(name.to_string());
    }

    pub fn fail_start(&self, name: &str) {
        self.state().fail_start.insert(name.to_string());
    }

    pub fn fail_sanity(&self, message: &str) {
        self.state().sanity_error = Some(message.to_string());
    }

    pub fn set_position(&self, position: Timestamp) {
        self.state().position = position;
    }

    /// Invoke the finish callback of `subgraph` as the backend would
    pub fn finish(&self, subgraph: SubgraphId, cause: FinishCause) {
        let callback = self.state().callbacks.get(&subgraph).cloned();
        if let Some(callback) = callback {
            callback(cause);
        }
    }

    /// End of stream on the most recently started sub-graph
    pub fn finish_latest(&self) -> SubgraphId {
        let subgraph = *self.state().started.last().expect("nothing started");
        self.finish(subgraph, FinishCause::EndOfStream);
        subgraph
    }

    // ----- inspection -----

    /// File names in the order they were constructed
    pub fn constructed_names(&self) -> Vec<String> {
        self.state()
            .constructed
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn started(&self) -> Vec<SubgraphId> {
        self.state().started.clone()
    }

    pub fn stopped(&self) -> Vec<SubgraphId> {
        self.state().stopped.clone()
    }

    pub fn released(&self) -> Vec<SubgraphId> {
        self.state().released.clone()
    }

    pub fn release_attempts(&self, subgraph: SubgraphId) -> u32 {
        self.state()
            .release_attempts
            .get(&subgraph)
            .copied()
            .unwrap_or(0)
    }

    pub fn name_of(&self, subgraph: SubgraphId) -> Option<String> {
        self.state()
            .constructed
            .iter()
            .find(|(id, _)| *id == subgraph)
            .map(|(_, name)| name.clone())
    }

    pub fn linked(&self) -> Vec<SubgraphId> {
        self.state().links.values().copied().collect()
    }

    pub fn max_linked(&self) -> usize {
        self.state().max_linked
    }

    pub fn filler_linked(&self) -> bool {
        self.state().filler_linked
    }

    pub fn is_blocked(&self) -> bool {
        self.state().blocked
    }

    pub fn offset(&self) -> Timestamp {
        self.state().offset
    }
}

impl MediaBackend for MockBackend {
    fn construct_subgraph(&self, entry: &PlaylistEntry) -> Result<SubgraphId> {
        let name = file_name(entry);
        let mut state = self.state();
        if state.fail_construct.contains(&name) {
            return Err(Error::Backend(format!("cannot construct {}", name)));
        }
        let id = SubgraphId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        state.constructed.push((id, name));
        Ok(id)
    }

    fn start(&self, subgraph: SubgraphId) -> Result<()> {
        let mut state = self.state();
        let name = state
            .constructed
            .iter()
            .find(|(id, _)| *id == subgraph)
            .map(|(_, n)| n.clone())
            .unwrap_or_default();
        if state.fail_start.contains(&name) {
            return Err(Error::Backend(format!("cannot start {}", name)));
        }
        state.started.push(subgraph);
        Ok(())
    }

    fn stop(&self, subgraph: SubgraphId) {
        self.state().stopped.push(subgraph);
    }

    fn release(&self, subgraph: SubgraphId) -> ReleaseStatus {
        let mut state = self.state();
        let attempts = {
            let n = state.release_attempts.entry(subgraph).or_insert(0);
            *n += 1;
            *n
        };
        let name = state
            .constructed
            .iter()
            .find(|(id, _)| *id == subgraph)
            .map(|(_, n)| n.clone())
            .unwrap_or_default();
        let busy = state.busy_script.get(&name).copied().unwrap_or(0);
        if attempts <= busy {
            ReleaseStatus::Busy
        } else {
            state.released.push(subgraph);
            state.callbacks.remove(&subgraph);
            ReleaseStatus::Done
        }
    }

    fn notify_on_finish(&self, subgraph: SubgraphId, callback: FinishCallback) {
        self.state().callbacks.insert(subgraph, Arc::from(callback));
    }

    fn sanity_check(&self) -> Result<()> {
        match &self.state().sanity_error {
            Some(message) => Err(Error::Backend(format!("Sanity checks failed: {}", message))),
            None => Ok(()),
        }
    }
}

impl CombiningStage for MockBackend {
    fn link_filler(&self, _slot: SlotHandle) -> Result<()> {
        self.state().filler_linked = true;
        Ok(())
    }

    fn link(&self, slot: SlotHandle, subgraph: SubgraphId) -> Result<()> {
        let mut state = self.state();
        state.links.insert(slot.index, subgraph);
        state.max_linked = state.max_linked.max(state.links.len());
        Ok(())
    }

    fn unlink(&self, slot: SlotHandle) {
        let mut state = self.state();
        if slot.index == 0 {
            state.filler_linked = false;
        } else {
            state.links.remove(&slot.index);
        }
    }

    fn release_slot(&self, _slot: SlotHandle) {}

    fn block_items(&self) {
        self.state().blocked = true;
    }

    fn unblock_items(&self) {
        self.state().blocked = false;
    }

    fn set_items_offset(&self, offset: Timestamp) {
        self.state().offset = offset;
    }

    fn position(&self) -> Timestamp {
        self.state().position
    }
}
