//! Live filler source
//!
//! A continuous sine at a fixed frequency and volume. At volume 0.0 it is
//! silence, which is still enough to keep the combined stream running while
//! no item is delivering.

use std::f32::consts::TAU;

#[derive(Debug, Clone)]
pub struct SineFiller {
    phase: f32,
    step: f32,
    volume: f32,
}

impl SineFiller {
    pub fn new(frequency_hz: f32, volume: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / sample_rate.max(1) as f32,
            volume,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Add the next `out.len() / channels` frames into `out`
    pub fn mix_into(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if self.volume == 0.0 {
            // Keep the phase moving so raising the volume later is click-free
            let frames = (out.len() / channels) as f32;
            self.phase = (self.phase + self.step * frames) % TAU;
            return;
        }
        for frame in out.chunks_exact_mut(channels) {
            let value = self.phase.sin() * self.volume;
            for sample in frame {
                *sample += value;
            }
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}
