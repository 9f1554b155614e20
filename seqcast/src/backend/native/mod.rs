//! Native media backend
//!
//! Implements both [`MediaBackend`] and [`CombiningStage`] in-process:
//!
//! - each sub-graph is a [`subgraph::Lane`]: a decode thread filling a
//!   sample ring
//! - one mixer thread renders a period every `period_ms` on its own clock,
//!   summing the filler and the linked item lanes, and hands it to a
//!   [`PcmSink`]
//!
//! The output position is the number of frames rendered, so it keeps
//! advancing at real-time pace whether or not items are flowing.

pub mod filler;
pub mod stage;
pub mod subgraph;

use crate::audio::PcmSink;
use crate::backend::{
    CombiningStage, FinishCallback, MediaBackend, ReleaseStatus, SlotHandle, SubgraphId,
};
use crate::config::SeqConfig;
use crate::error::{Error, Result};
use crate::playback::catalog::PlaylistEntry;
use filler::SineFiller;
use seqcast_common::Timestamp;
use stage::MixState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use subgraph::{Lane, LaneFormat};
use tracing::{debug, info, warn};

/// Sample rates the decode path is validated against
const SUPPORTED_RATES: [u32; 6] = [22_050, 32_000, 44_100, 48_000, 88_200, 96_000];

/// How far the mixer may fall behind before it stops trying to catch up
const MAX_LAG: Duration = Duration::from_millis(200);

struct Shared {
    format: LaneFormat,
    period: Duration,
    period_frames: usize,
    item_buffer_samples: usize,
    mix: Mutex<MixState>,
    frames_out: AtomicU64,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    fn lock_mix(&self) -> MutexGuard<'_, MixState> {
        // Mixer state stays consistent across a panicked holder
        self.mix.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn position(&self) -> Timestamp {
        Timestamp::from_frames(
            self.frames_out.load(Ordering::Acquire),
            self.format.sample_rate,
        )
    }
}

pub struct NativeBackend {
    shared: Arc<Shared>,
    mixer: Mutex<Option<JoinHandle<()>>>,
}

impl NativeBackend {
    /// Start the mixer thread writing into `sink`
    pub fn start(config: &SeqConfig, sink: Box<dyn PcmSink>) -> Result<Self> {
        config.validate()?;
        let output = &config.output;

        let format = LaneFormat {
            sample_rate: output.sample_rate,
            channels: output.channels,
        };
        let filler = SineFiller::new(config.filler.frequency_hz, config.filler.volume, output.sample_rate);

        let shared = Arc::new(Shared {
            format,
            period: output.period(),
            period_frames: output.period_frames(),
            item_buffer_samples: config.item_buffer_samples(),
            mix: Mutex::new(MixState::new(output.channels, filler)),
            frames_out: AtomicU64::new(0),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("seqcast-mixer".to_string())
            .spawn(move || mixer_loop(thread_shared, sink))
            .map_err(|e| Error::Backend(format!("Failed to spawn mixer thread: {}", e)))?;

        info!(
            "Native backend started: {} Hz, {} channel(s), {} frames per period",
            output.sample_rate,
            output.channels,
            output.period_frames()
        );

        Ok(Self {
            shared,
            mixer: Mutex::new(Some(handle)),
        })
    }

    /// Output position minus the item-lane offset
    pub fn items_position(&self) -> Timestamp {
        let offset = self.shared.lock_mix().items_offset();
        self.shared.position().saturating_sub(offset)
    }

    /// Sub-graphs not yet released
    pub fn live_subgraphs(&self) -> usize {
        self.shared.lock_mix().lanes.len()
    }

    /// Stop the mixer thread and flush the sink; idempotent
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);
        let handle = self
            .mixer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Mixer thread panicked");
            }
            debug!("Mixer thread stopped");
        }
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mixer_loop(shared: Arc<Shared>, mut sink: Box<dyn PcmSink>) {
    let mut block = Vec::with_capacity(shared.period_frames * shared.format.channels as usize);
    let mut next_tick = Instant::now();
    let mut sink_failed = false;

    while shared.running.load(Ordering::Acquire) {
        let due = shared.lock_mix().render(shared.period_frames, &mut block);
        shared
            .frames_out
            .fetch_add(shared.period_frames as u64, Ordering::AcqRel);

        for (callback, cause) in due {
            callback(cause);
        }

        if !sink_failed {
            if let Err(e) = sink.write(&block) {
                // Keep the timeline running; the session decides what to do
                warn!("Output sink failed, discarding further output: {}", e);
                sink_failed = true;
            }
        }

        next_tick += shared.period;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else if now - next_tick > MAX_LAG {
            debug!("Mixer lagging by {:?}; resynchronising", now - next_tick);
            next_tick = now;
        }
    }

    if let Err(e) = sink.flush() {
        warn!("Output sink flush failed: {}", e);
    }
}

impl MediaBackend for NativeBackend {
    fn construct_subgraph(&self, entry: &PlaylistEntry) -> Result<SubgraphId> {
        let id = SubgraphId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let lane = Lane::new(
            id,
            entry.path(),
            self.shared.format,
            self.shared.item_buffer_samples,
        );
        self.shared.lock_mix().lanes.insert(id, lane);
        debug!("Constructed {} for {}", id, entry);
        Ok(id)
    }

    fn start(&self, subgraph: SubgraphId) -> Result<()> {
        let mut mix = self.shared.lock_mix();
        let lane = mix
            .lanes
            .get_mut(&subgraph)
            .ok_or_else(|| Error::Backend(format!("Unknown {}", subgraph)))?;
        lane.start()
    }

    fn stop(&self, subgraph: SubgraphId) {
        if let Some(lane) = self.shared.lock_mix().lanes.get(&subgraph) {
            lane.request_stop();
        }
    }

    fn release(&self, subgraph: SubgraphId) -> ReleaseStatus {
        let mut mix = self.shared.lock_mix();
        if mix.is_routed(subgraph) {
            return ReleaseStatus::Busy;
        }
        let Some(lane) = mix.lanes.get_mut(&subgraph) else {
            return ReleaseStatus::Done;
        };

        lane.request_stop();
        if lane.try_join() {
            mix.lanes.remove(&subgraph);
            debug!("Released {}", subgraph);
            ReleaseStatus::Done
        } else {
            ReleaseStatus::Busy
        }
    }

    fn notify_on_finish(&self, subgraph: SubgraphId, callback: FinishCallback) {
        if let Some(lane) = self.shared.lock_mix().lanes.get(&subgraph) {
            lane.set_callback(Arc::from(callback));
        }
    }

    fn sanity_check(&self) -> Result<()> {
        let format = self.shared.format;
        if !SUPPORTED_RATES.contains(&format.sample_rate) {
            return Err(Error::Backend(format!(
                "Sanity checks failed: unsupported output rate {} Hz",
                format.sample_rate
            )));
        }
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Backend(
                "Sanity checks failed: mixer thread is not running".to_string(),
            ));
        }
        Ok(())
    }
}

impl CombiningStage for NativeBackend {
    fn link_filler(&self, slot: SlotHandle) -> Result<()> {
        self.shared.lock_mix().route_filler(slot);
        Ok(())
    }

    fn link(&self, slot: SlotHandle, subgraph: SubgraphId) -> Result<()> {
        let mut mix = self.shared.lock_mix();
        if !mix.lanes.contains_key(&subgraph) {
            return Err(Error::Backend(format!("Cannot link unknown {}", subgraph)));
        }
        mix.route_item(slot, subgraph);
        Ok(())
    }

    fn unlink(&self, slot: SlotHandle) {
        self.shared.lock_mix().unroute(slot);
    }

    fn release_slot(&self, slot: SlotHandle) {
        // Routes are the only per-slot state; unlink already dropped it
        self.shared.lock_mix().unroute(slot);
    }

    fn block_items(&self) {
        self.shared.lock_mix().set_blocked(true);
    }

    fn unblock_items(&self) {
        self.shared.lock_mix().set_blocked(false);
    }

    // Only feeds `items_position`; blocked lanes are simply not pulled
    fn set_items_offset(&self, offset: Timestamp) {
        self.shared.lock_mix().set_items_offset(offset);
    }

    fn position(&self) -> Timestamp {
        self.shared.position()
    }
}
