//! One item's decode lane
//!
//! A lane is a sample ring plus the thread that fills it: decode with
//! symphonia, map channels, resample with rubato, push into the ring with
//! backpressure. The mixer thread drains the consumer side. The decode thread
//! reports faults through the finish callback itself; end of stream is
//! reported by the mixer once the ring has run dry.

use crate::audio::{remix_channels, StreamResampler, StreamingDecoder};
use crate::backend::{FinishCause, SubgraphId};
use crate::error::{Error, Result};
use ringbuf::traits::*;
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Registered completion callback, shared with the decode thread
pub type SharedCallback = Arc<Mutex<Option<Arc<dyn Fn(FinishCause) + Send + Sync>>>>;

/// Sleep between checks while the ring is full
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(5);

const DECODING: u8 = 0;
const DECODED: u8 = 1;
const FAILED: u8 = 2;

/// Decode thread progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Decoding,
    /// Every sample is in the ring
    Decoded,
    /// Fault already reported through the callback
    Failed,
}

/// Output format every lane is converted to
#[derive(Debug, Clone, Copy)]
pub struct LaneFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

pub struct Lane {
    pub id: SubgraphId,
    path: PathBuf,
    format: LaneFormat,
    producer: Option<HeapProd<f32>>,
    pub consumer: HeapCons<f32>,
    stop: Arc<AtomicBool>,
    status: Arc<AtomicU8>,
    callback: SharedCallback,
    thread: Option<JoinHandle<()>>,
    /// End of stream already reported by the mixer
    pub eos_reported: bool,
}

impl Lane {
    pub fn new(id: SubgraphId, path: &Path, format: LaneFormat, capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        Self {
            id,
            path: path.to_path_buf(),
            format,
            producer: Some(producer),
            consumer,
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(AtomicU8::new(DECODING)),
            callback: Arc::new(Mutex::new(None)),
            thread: None,
            eos_reported: false,
        }
    }

    pub fn set_callback(&self, callback: Arc<dyn Fn(FinishCause) + Send + Sync>) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(callback);
        }
    }

    pub fn callback(&self) -> Option<Arc<dyn Fn(FinishCause) + Send + Sync>> {
        self.callback.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn status(&self) -> DecodeStatus {
        match self.status.load(Ordering::Acquire) {
            DECODED => DecodeStatus::Decoded,
            FAILED => DecodeStatus::Failed,
            _ => DecodeStatus::Decoding,
        }
    }

    /// Spawn the decode thread; a lane starts at most once
    pub fn start(&mut self) -> Result<()> {
        let producer = self
            .producer
            .take()
            .ok_or_else(|| Error::InvalidState(format!("{} already started", self.id)))?;

        let id = self.id;
        let path = self.path.clone();
        let format = self.format;
        let stop = Arc::clone(&self.stop);
        let status = Arc::clone(&self.status);
        let callback = Arc::clone(&self.callback);

        let handle = thread::Builder::new()
            .name(format!("seqcast-decode-{}", id.0))
            .spawn(move || {
                match decode_into(&path, format, producer, &stop) {
                    Ok(()) => {
                        status.store(DECODED, Ordering::Release);
                        debug!("{} decoded {}", id, path.display());
                    }
                    Err(e) => {
                        status.store(FAILED, Ordering::Release);
                        warn!("{} failed on {}: {}", id, path.display(), e);
                        let cb = callback.lock().ok().and_then(|slot| slot.clone());
                        if let Some(cb) = cb {
                            cb(FinishCause::Fault(e.to_string()));
                        }
                    }
                }
            })
            .map_err(|e| Error::Backend(format!("Failed to spawn decode thread: {}", e)))?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Ask the decode thread to stop at its next check
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once the decode thread (if any) has exited and been joined
    pub fn try_join(&mut self) -> bool {
        match self.thread.take() {
            None => true,
            Some(handle) if handle.is_finished() => {
                if handle.join().is_err() {
                    warn!("{} decode thread panicked", self.id);
                }
                true
            }
            Some(handle) => {
                self.thread = Some(handle);
                false
            }
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Decode `path` into `producer` until done or asked to stop
fn decode_into(
    path: &Path,
    format: LaneFormat,
    mut producer: HeapProd<f32>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut decoder = StreamingDecoder::open(path)?;
    let mut resampler = StreamResampler::new(decoder.sample_rate(), format.sample_rate, format.channels)?;

    while let Some(chunk) = decoder.next_chunk()? {
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }
        let mapped = remix_channels(&chunk, decoder.channels(), format.channels);
        let out = resampler.process(&mapped)?;
        if !push_all(&mut producer, &out, stop) {
            return Ok(());
        }
    }

    let tail = resampler.flush()?;
    push_all(&mut producer, &tail, stop);
    Ok(())
}

/// Push every sample, waiting while the ring is full; false if stopped
fn push_all(producer: &mut HeapProd<f32>, mut samples: &[f32], stop: &AtomicBool) -> bool {
    while !samples.is_empty() {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let written = producer.push_slice(samples);
        samples = &samples[written..];
        if !samples.is_empty() {
            thread::sleep(BACKPRESSURE_SLEEP);
        }
    }
    true
}
