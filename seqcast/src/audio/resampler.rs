//! Audio resampling using rubato
//!
//! Streaming conversion from a file's native rate to the output rate. Input
//! arrives in packet-sized pieces of arbitrary length; rubato's fixed-input
//! resampler wants fixed-size chunks, so leftovers are carried over and
//! pushed through `process_partial` at end of stream.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Frames per resampler chunk
const CHUNK_FRAMES: usize = 1024;

/// Stateful interleaved resampler
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    channels: usize,
    /// Planar input not yet processed
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    /// Resampler from `input_rate` to `output_rate`; a pass-through when equal
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;

        let inner = if input_rate == output_rate {
            None
        } else {
            debug!(
                "Resampling {} Hz -> {} Hz ({} channels)",
                input_rate, output_rate, channels
            );
            let resampler = FastFixedIn::<f32>::new(
                output_rate as f64 / input_rate as f64,
                1.0,
                PolynomialDegree::Septic,
                CHUNK_FRAMES,
                channels,
            )
            .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;
            Some(resampler)
        };

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed interleaved samples; returns whatever output is ready
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(interleaved.to_vec());
        };

        for frame in interleaved.chunks_exact(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.pending[ch].push(*sample);
            }
        }

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..needed).collect())
                .collect();
            let planar = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;
            interleave_into(&planar, &mut out);
        }
        Ok(out)
    }

    /// Push the carried-over tail through; call once at end of stream
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }

        let tail: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let planar = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        let mut out = Vec::new();
        interleave_into(&planar, &mut out);
        Ok(out)
    }
}

/// Append planar channels to `out` as interleaved frames
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(frames) = planar.first().map(Vec::len) else {
        return;
    };
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for ch in planar {
            out.push(ch[i]);
        }
    }
}
