//! PCM sinks
//!
//! The mixer thread hands every period of interleaved f32 output to a
//! [`PcmSink`]. The sink never sets the pace; the mixer runs on its own
//! real-time clock so the timeline advances the same way whatever the sink.
//!
//! - [`RawPcmSink`]: interleaved S16LE to a file or stdout
//! - [`NullSink`]: discards samples
//! - `DeviceSink`: default sound device via cpal (`device-output` feature)

use crate::config::{OutputConfig, SinkKind};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Destination of the mixed output
pub trait PcmSink: Send {
    /// Accept one period of interleaved samples in `[-1.0, 1.0]`
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Convert one sample to S16, clamping out-of-range values
pub fn f32_to_s16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Interleaved signed 16-bit little-endian PCM
pub struct RawPcmSink<W: Write + Send> {
    writer: BufWriter<W>,
    scratch: Vec<u8>,
}

impl<W: Write + Send> RawPcmSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            scratch: Vec::new(),
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::AudioOutput(format!("Failed to flush raw sink: {}", e.error())))
    }
}

impl RawPcmSink<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            Error::AudioOutput(format!("Failed to create {}: {}", path.display(), e))
        })?;
        info!("Writing S16LE PCM to {}", path.display());
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> PcmSink for RawPcmSink<W> {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.scratch.clear();
        self.scratch.reserve(samples.len() * 2);
        for &sample in samples {
            self.scratch.extend_from_slice(&f32_to_s16(sample).to_le_bytes());
        }
        self.writer
            .write_all(&self.scratch)
            .map_err(|e| Error::AudioOutput(format!("Raw sink write failed: {}", e)))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::AudioOutput(format!("Raw sink flush failed: {}", e)))
    }
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NullSink;

impl PcmSink for NullSink {
    fn write(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }
}

/// Build the sink selected by `config`
pub fn open_sink(config: &OutputConfig) -> Result<Box<dyn PcmSink>> {
    match config.sink {
        SinkKind::Null => Ok(Box::new(NullSink)),
        SinkKind::Raw => match &config.path {
            Some(path) => Ok(Box::new(RawPcmSink::create(path)?)),
            None => {
                info!("Writing S16LE PCM to stdout");
                Ok(Box::new(RawPcmSink::new(std::io::stdout())))
            }
        },
        #[cfg(feature = "device-output")]
        SinkKind::Device => Ok(Box::new(device::DeviceSink::open(
            config.sample_rate,
            config.channels,
        )?)),
        #[cfg(not(feature = "device-output"))]
        SinkKind::Device => Err(Error::AudioOutput(
            "Device output requires the device-output feature".to_string(),
        )),
    }
}

#[cfg(feature = "device-output")]
pub mod device {
    //! Default sound device through cpal
    //!
    //! cpal streams are not `Send` on every platform, so the stream lives on
    //! its own thread and the sink only holds the producer side of a ring.

    use super::PcmSink;
    use crate::error::{Error, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use ringbuf::traits::*;
    use ringbuf::{HeapCons, HeapProd, HeapRb};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tracing::{error, info, warn};

    pub struct DeviceSink {
        producer: HeapProd<f32>,
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
        dropped: u64,
    }

    impl DeviceSink {
        /// Open the default output device at the mixer's format
        pub fn open(sample_rate: u32, channels: u16) -> Result<Self> {
            // Half a second of headroom between mixer and device clocks
            let capacity = (sample_rate as usize / 2) * channels as usize;
            let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = mpsc::channel();
            let thread_stop = Arc::clone(&stop);

            let thread = thread::Builder::new()
                .name("seqcast-device".to_string())
                .spawn(move || {
                    let stream = match build_stream(sample_rate, channels, consumer) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    while !thread_stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(50));
                    }
                    drop(stream);
                })
                .map_err(|e| Error::AudioOutput(format!("Failed to spawn device thread: {}", e)))?;

            ready_rx
                .recv()
                .map_err(|_| Error::AudioOutput("Device thread exited early".to_string()))??;

            Ok(Self {
                producer,
                stop,
                thread: Some(thread),
                dropped: 0,
            })
        }
    }

    fn build_stream(
        sample_rate: u32,
        channels: u16,
        consumer: HeapCons<f32>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let sample_format = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("No output config for {}: {}", name, e)))?
            .sample_format();

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let consumer = Arc::new(Mutex::new(consumer));
        let on_error = |err| error!("Audio stream error: {}", err);

        let stream = match sample_format {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut cons) = consumer.lock() {
                        for out in data.iter_mut() {
                            *out = super::f32_to_s16(cons.try_pop().unwrap_or(0.0));
                        }
                    }
                },
                on_error,
                None,
            ),
            _ => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut cons) = consumer.lock() {
                        let read = cons.pop_slice(data);
                        data[read..].fill(0.0);
                    }
                },
                on_error,
                None,
            ),
        }
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream on {}: {}", name, e)))?;

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        info!("Audio device '{}' started at {} Hz", name, sample_rate);
        Ok(stream)
    }

    impl PcmSink for DeviceSink {
        fn write(&mut self, samples: &[f32]) -> Result<()> {
            let written = self.producer.push_slice(samples);
            if written < samples.len() {
                self.dropped += (samples.len() - written) as u64;
                if self.dropped % 48_000 < (samples.len() - written) as u64 {
                    warn!("Device is behind the mixer; {} samples dropped", self.dropped);
                }
            }
            Ok(())
        }
    }

    impl Drop for DeviceSink {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
