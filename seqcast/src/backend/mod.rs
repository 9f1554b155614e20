//! Media backend boundary
//!
//! The sequencing core never touches samples. It drives two capabilities:
//!
//! - [`MediaBackend`]: per-item decode/render sub-graphs (construct, start,
//!   stop, release, finish notification)
//! - [`CombiningStage`]: the mixer that sums the live filler with the item
//!   lane, addressed through merge slots
//!
//! Every method returns immediately. Slow teardown surfaces as
//! [`ReleaseStatus::Busy`] and is retried by the reclaimer, never waited on.
//!
//! [`native::NativeBackend`] implements both traits on top of symphonia,
//! rubato and a real-time mixer thread.

pub mod native;

use crate::error::Result;
use crate::playback::catalog::PlaylistEntry;
use seqcast_common::Timestamp;
use std::fmt;

/// Backend-side identifier of one item sub-graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubgraphId(pub u64);

impl fmt::Display for SubgraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subgraph-{}", self.0)
    }
}

/// Handle to a merge slot on the combining stage
///
/// Index into the mix bus arena plus the generation the slot had when it was
/// handed out. A released slot bumps its generation, so an old handle can
/// never address the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}.{}", self.index, self.generation)
    }
}

/// Outcome of one teardown attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// Sub-graph is still winding down; try again later
    Busy,
    /// Sub-graph resources are gone
    Done,
}

/// Why a sub-graph reported completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishCause {
    /// Last sample of the item left the slot
    EndOfStream,
    /// Decode/render fault inside the sub-graph
    Fault(String),
}

/// Completion callback registered with [`MediaBackend::notify_on_finish`]
///
/// Invoked from backend threads; must not block.
pub type FinishCallback = Box<dyn Fn(FinishCause) + Send + Sync + 'static>;

/// Per-item decode/render sub-graphs
pub trait MediaBackend: Send + Sync {
    /// Build (but do not start) the sub-graph for `entry`
    fn construct_subgraph(&self, entry: &PlaylistEntry) -> Result<SubgraphId>;

    /// Begin producing samples
    fn start(&self, subgraph: SubgraphId) -> Result<()>;

    /// Ask the sub-graph to stop producing; advisory
    fn stop(&self, subgraph: SubgraphId);

    /// One teardown attempt
    fn release(&self, subgraph: SubgraphId) -> ReleaseStatus;

    /// Register the completion callback; the backend may call it more than
    /// once, deduplication is the caller's job
    fn notify_on_finish(&self, subgraph: SubgraphId, callback: FinishCallback);

    /// Verify the backend can run at all before a session is opened
    fn sanity_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Mixer primitives behind the mix bus
pub trait CombiningStage: Send + Sync {
    /// Connect the permanent filler source to `slot`
    fn link_filler(&self, slot: SlotHandle) -> Result<()>;

    /// Route `subgraph`'s output into `slot`
    fn link(&self, slot: SlotHandle, subgraph: SubgraphId) -> Result<()>;

    /// Stop `slot` from delivering; the slot itself stays allocated
    fn unlink(&self, slot: SlotHandle);

    /// Free an unlinked slot
    fn release_slot(&self, slot: SlotHandle);

    /// Hold back the item lane; the filler keeps flowing
    fn block_items(&self);

    fn unblock_items(&self);

    /// Cumulative running-time offset of the item lane
    fn set_items_offset(&self, offset: Timestamp);

    /// Position of the combined output
    fn position(&self) -> Timestamp;
}
