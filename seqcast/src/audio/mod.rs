//! Audio processing building blocks for the native backend
//!
//! - [`decoder`]: symphonia packet decoding and channel mapping
//! - [`resampler`]: streaming rubato resampling to the output rate
//! - [`output`]: PCM sinks fed by the mixer thread

pub mod decoder;
pub mod output;
pub mod resampler;

pub use decoder::{remix_channels, StreamingDecoder};
pub use output::{open_sink, NullSink, PcmSink, RawPcmSink};
pub use resampler::StreamResampler;
