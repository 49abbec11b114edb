use crate::{CoreResult, SessionError, audio::StreamFormat, worker::WorkerRole};

use std::panic::Location;

use audioadapter_buffers::direct::InterleavedSlice;
use error_location::ErrorLocation;
use rubato::{Fft, FixedSync, Resampler as RubatoResampler};
use tracing::{debug, instrument, trace};

/// Frames per resampler call.
pub(crate) const CHUNK_SIZE: usize = 1024;

/// Streaming converter from the microphone's native format to the upload
/// format: downmix to mono, resample, then widen to the target channel count.
///
/// Input arrives in arbitrary chunk sizes; whole resampler chunks are
/// processed as they fill and the remainder waits for the next call or
/// [`flush`](Self::flush).
pub struct Resampler {
    resampler: Option<Fft<f32>>,
    input: StreamFormat,
    output: StreamFormat,
    pending: Vec<f32>,
    frames_in: u64,
    frames_out: u64,
}

impl Resampler {
    /// # Errors
    ///
    /// `Pipeline` if a format has zero channels or rubato rejects the rates.
    #[track_caller]
    #[instrument]
    pub fn new(input: StreamFormat, output: StreamFormat) -> CoreResult<Self> {
        if input.channels == 0 || output.channels == 0 {
            return Err(resampling_error(format!(
                "Channel count must be non-zero ({} -> {})",
                input, output
            )));
        }

        let resampler = if input.sample_rate == output.sample_rate {
            None
        } else {
            let sub_chunks = 2;
            let fft = Fft::<f32>::new(
                input.sample_rate as usize,
                output.sample_rate as usize,
                CHUNK_SIZE,
                sub_chunks,
                1,
                FixedSync::Input,
            )
            .map_err(|e| resampling_error(format!("Failed to create resampler: {}", e)))?;
            Some(fft)
        };

        debug!(
            input = %input,
            output = %output,
            passthrough = resampler.is_none(),
            "Resampler initialized"
        );

        Ok(Self {
            resampler,
            input,
            output,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Converts one chunk of interleaved input samples.
    ///
    /// # Errors
    ///
    /// `Pipeline` if rubato fails.
    #[track_caller]
    pub fn process(&mut self, interleaved: &[f32]) -> CoreResult<Vec<f32>> {
        let mono = downmix(interleaved, self.input.channels);
        self.frames_in += mono.len() as u64;

        let Some(resampler) = self.resampler.as_mut() else {
            self.frames_out += mono.len() as u64;
            return Ok(upmix(&mono, self.output.channels));
        };

        self.pending.extend_from_slice(&mono);

        let mut output = Vec::new();
        let whole = self.pending.len() - self.pending.len() % CHUNK_SIZE;
        for chunk in self.pending[..whole].chunks_exact(CHUNK_SIZE) {
            output.extend(run_chunk(resampler, chunk)?);
        }
        self.pending.drain(..whole);

        self.frames_out += output.len() as u64;
        trace!(
            input_frames = mono.len(),
            output_frames = output.len(),
            "Resampled chunk"
        );

        Ok(upmix(&output, self.output.channels))
    }

    /// Pads and converts whatever input is still buffered, trimming the
    /// total output to the length the input implies.
    ///
    /// # Errors
    ///
    /// `Pipeline` if rubato fails.
    #[track_caller]
    pub fn flush(&mut self) -> CoreResult<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };

        let mut output = Vec::new();
        if !self.pending.is_empty() {
            let mut padded = std::mem::take(&mut self.pending);
            padded.resize(CHUNK_SIZE, 0.0);
            output = run_chunk(resampler, &padded)?;
        }

        let expected = self.frames_in * u64::from(self.output.sample_rate)
            / u64::from(self.input.sample_rate);
        let remaining = usize::try_from(expected.saturating_sub(self.frames_out)).unwrap_or(0);
        output.truncate(remaining);
        self.frames_out += output.len() as u64;

        debug!(
            frames_in = self.frames_in,
            frames_out = self.frames_out,
            "Resampler flushed"
        );

        Ok(upmix(&output, self.output.channels))
    }
}

#[track_caller]
fn run_chunk(resampler: &mut Fft<f32>, chunk: &[f32]) -> CoreResult<Vec<f32>> {
    let input_adapter = InterleavedSlice::new(chunk, 1, CHUNK_SIZE)
        .map_err(|e| resampling_error(format!("Failed to create input adapter: {}", e)))?;

    let output_frames = resampler.output_frames_max();
    let mut output = vec![0.0f32; output_frames];

    let mut output_adapter = InterleavedSlice::new_mut(&mut output, 1, output_frames)
        .map_err(|e| resampling_error(format!("Failed to create output adapter: {}", e)))?;

    let (_input_frames, written) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, None)
        .map_err(|e| resampling_error(format!("Resampling failed: {}", e)))?;

    output.truncate(written);
    Ok(output)
}

/// Averages interleaved frames down to one channel.
pub(crate) fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(usize::from(n))
            .map(|frame| frame.iter().sum::<f32>() / f32::from(n))
            .collect(),
    }
}

/// Repeats each mono sample across `channels`.
pub(crate) fn upmix(mono: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => mono.to_vec(),
        n => mono
            .iter()
            .flat_map(|&s| std::iter::repeat_n(s, usize::from(n)))
            .collect(),
    }
}

#[track_caller]
fn resampling_error(reason: String) -> SessionError {
    SessionError::Pipeline {
        role: WorkerRole::Capture,
        reason,
        location: ErrorLocation::from(Location::caller()),
    }
}
