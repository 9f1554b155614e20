//! Audio decoder using symphonia
//!
//! Streams a file packet by packet as interleaved f32 samples in the source
//! channel layout. Channel mapping to the output layout is a separate step
//! ([`remix_channels`]) so the resampler always sees the output channel count.
//!
//! Supported formats follow the symphonia features enabled in Cargo.toml:
//! WAV/PCM, MP3, FLAC, AAC/MP4 and Vorbis.

use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Packet-by-packet decoder for one file
pub struct StreamingDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl StreamingDecoder {
    /// Open and probe `path`
    ///
    /// # Errors
    /// `Decode` if the file cannot be opened, its format is not recognised or
    /// it carries no decodable audio track.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Unrecognised format {}: {}", path.display(), e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("No audio track in {}", path.display())))?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Decode(format!("Unknown sample rate in {}", path.display())))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::Decode(format!("Unknown channel count in {}", path.display())))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Unsupported codec in {}: {}", path.display(), e)))?;

        debug!(
            "Opened {}: {} Hz, {} channel(s)",
            path.display(),
            sample_rate,
            channels
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Next packet's samples, interleaved; `None` at end of stream
    ///
    /// Corrupt packets are skipped with a warning, like a lenient player
    /// would; container read errors end the item with `Decode`.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    debug!("Stream reset in {}; treating as end", self.path.display());
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::Decode(format!(
                        "Read error in {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet in {}: {}", self.path.display(), e);
                    continue;
                }
                Err(e) => {
                    return Err(Error::Decode(format!(
                        "Decode failed in {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                return Ok(Some(buf.samples().to_vec()));
            }
        }
    }
}

/// Map interleaved samples from `from` channels to `to` channels
///
/// Mono is duplicated to every output channel; when narrowing, channels are
/// folded onto the output channels by index and averaged; when widening from
/// a non-mono source, the extra outputs repeat the source channels in order.
pub fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if from > to {
            for ch in 0..to {
                let (sum, count) = frame
                    .iter()
                    .skip(ch)
                    .step_by(to)
                    .fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
                out.push(sum / count as f32);
            }
        } else {
            for ch in 0..to {
                out.push(frame[ch % from]);
            }
        }
    }
    out
}
