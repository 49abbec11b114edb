//! Audio sources, sinks and codecs the workers plug together.
//!
//! The workers only see the traits below; the cpal-backed microphone and
//! speaker are one implementation, test doubles are another.

mod capture;
mod decoder;
mod resampler;
mod speaker;
mod volume;

pub use capture::MicrophoneFactory;
pub use decoder::{PcmDecoder, PcmDecoderFactory, WavDecoder, WavDecoderFactory};
pub use resampler::Resampler;
pub use speaker::SpeakerFactory;
#[cfg(test)]
pub(crate) use speaker::DeviceThread;
pub use volume::{MAX_VOLUME, VOLUME_STEP, Volume};

use crate::CoreResult;

use std::{fmt, time::Duration};

use async_trait::async_trait;

/// Sample rate and channel count of an interleaved PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
}

impl StreamFormat {
    /// Builds a format.
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// Format of the audio uploaded to the server.
pub const UPLOAD_FORMAT: StreamFormat = StreamFormat::new(16_000, 1);

/// Live input device.
#[async_trait]
pub trait AudioSource: Send {
    /// Format of the samples `read` returns.
    fn format(&self) -> StreamFormat;

    /// Next chunk of interleaved samples in `[-1.0, 1.0]`. `None` when the
    /// source has run dry.
    async fn read(&mut self) -> CoreResult<Option<Vec<f32>>>;

    /// Releases the device.
    fn stop(&mut self);
}

/// Opens a fresh [`AudioSource`] per capture activation.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Opens and starts the input device.
    async fn open(&self) -> CoreResult<Box<dyn AudioSource>>;
}

/// Live output device.
#[async_trait]
pub trait AudioSink: Send {
    /// (Re)configures the device for `format`.
    async fn configure(&mut self, format: StreamFormat) -> CoreResult<()>;

    /// Queues interleaved samples, waiting while the device buffer is full.
    async fn write(&mut self, samples: &[i16]) -> CoreResult<()>;

    /// Waits until queued samples have played or `deadline` elapses.
    async fn drain(&mut self, deadline: Duration);

    /// Releases the device, discarding anything still queued.
    fn stop(&mut self);
}

/// Opens a fresh [`AudioSink`] per playback activation.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Opens the output device. It stays silent until configured.
    async fn open(&self) -> CoreResult<Box<dyn AudioSink>>;
}

/// Output of one [`Decoder::decode`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Set when the decoder has just learned the stream format.
    pub format: Option<StreamFormat>,
    /// Interleaved samples ready for the sink.
    pub samples: Vec<i16>,
}

/// Incremental reply decoder fed with arbitrary byte slices.
pub trait Decoder: Send {
    /// Consumes `bytes`, returning whatever is now decodable.
    ///
    /// # Errors
    ///
    /// `Pipeline` when the byte stream cannot be decoded.
    fn decode(&mut self, bytes: &[u8]) -> CoreResult<Decoded>;
}

/// Creates a fresh [`Decoder`] per playback activation.
pub trait DecoderFactory: Send + Sync {
    /// A decoder in its initial state.
    fn create(&self) -> Box<dyn Decoder>;
}

/// Encodes float samples as 16-bit little-endian PCM, clamping to range.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let scaled = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            scaled.to_le_bytes()
        })
        .collect()
}

/// Splits 16-bit little-endian PCM into samples, carrying an odd trailing
/// byte over to the next call in `carry`.
pub fn decode_pcm16(bytes: &[u8], carry: &mut Option<u8>) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len().div_ceil(2));
    let mut rest = bytes;

    if let Some(low) = carry.take() {
        match rest.split_first() {
            Some((&high, tail)) => {
                samples.push(i16::from_le_bytes([low, high]));
                rest = tail;
            }
            None => {
                *carry = Some(low);
                return samples;
            }
        }
    }

    let mut pairs = rest.chunks_exact(2);
    samples.extend(pairs.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
    if let [odd] = pairs.remainder() {
        *carry = Some(*odd);
    }

    samples
}
