use crate::audio::{Resampler, StreamFormat, UPLOAD_FORMAT};

// Test constants
const INPUT_SAMPLE_RATE: u32 = 48000;
const ONE_SECOND_INPUT_FRAMES: usize = INPUT_SAMPLE_RATE as usize;
const ONE_SECOND_OUTPUT_FRAMES: usize = 16000;
const DEVICE_CALLBACK_FRAMES: usize = 480;
const LENGTH_TOLERANCE: u64 = 100;
const TEST_SIGNAL_AMPLITUDE: f32 = 0.5;
const TONE_INPUT_FRAMES: usize = 4800;
const TONE_FREQUENCY_FACTOR: f32 = 0.1;
const TONE_OUTPUT_FRAMES: usize = 1539;
const MAX_AMPLITUDE: f32 = 1.5;

/// WHAT: Streaming 48kHz stereo converts to about one second of 16kHz mono
/// WHY: The server expects 16kHz mono regardless of the microphone's format
#[test]
#[allow(clippy::unwrap_used)]
fn given_48khz_stereo_in_callback_chunks_when_resampling_then_output_length_approximately_correct()
{
    // Given: Resampler for 48kHz stereo -> 16kHz mono and one second of input
    let input_format = StreamFormat::new(INPUT_SAMPLE_RATE, 2);
    let mut resampler = Resampler::new(input_format, UPLOAD_FORMAT).unwrap();
    let input = vec![TEST_SIGNAL_AMPLITUDE; ONE_SECOND_INPUT_FRAMES * 2];

    // When: Feeding device-sized chunks, then flushing
    let mut output = Vec::new();
    for chunk in input.chunks(DEVICE_CALLBACK_FRAMES * 2) {
        output.extend(resampler.process(chunk).unwrap());
    }
    output.extend(resampler.flush().unwrap());

    // Then: Output is approximately 1 second at 16kHz and finite
    assert!(
        (output.len() as i64 - ONE_SECOND_OUTPUT_FRAMES as i64).unsigned_abs() < LENGTH_TOLERANCE,
        "Expected ~{} samples, got {}",
        ONE_SECOND_OUTPUT_FRAMES,
        output.len()
    );
    assert!(output.iter().all(|&s| s.is_finite()));
}

/// WHAT: Empty chunks produce no output
/// WHY: Edge case handling for zero-length callbacks
#[test]
#[allow(clippy::unwrap_used)]
fn given_empty_samples_when_resampling_then_empty_output() {
    // Given: Resampler and empty input
    let mut resampler =
        Resampler::new(StreamFormat::new(INPUT_SAMPLE_RATE, 1), UPLOAD_FORMAT).unwrap();

    // When: Resampling empty data and flushing
    let output = resampler.process(&[]).unwrap();
    let tail = resampler.flush().unwrap();

    // Then: Nothing comes out
    assert!(output.is_empty());
    assert!(tail.is_empty());
}

/// WHAT: Resampling a tone keeps samples bounded
/// WHY: Validates that the signal survives conversion without blowing up
#[test]
#[allow(clippy::unwrap_used)]
fn given_tone_signal_when_resampling_then_output_preserves_characteristics() {
    // Given: Resampler and a simple tone signal
    let mut resampler =
        Resampler::new(StreamFormat::new(INPUT_SAMPLE_RATE, 1), UPLOAD_FORMAT).unwrap();
    let input: Vec<f32> = (0..TONE_INPUT_FRAMES)
        .map(|i| (i as f32 * TONE_FREQUENCY_FACTOR).sin())
        .collect();

    // When: Resampling and flushing
    let mut output = resampler.process(&input).unwrap();
    output.extend(resampler.flush().unwrap());

    // Then: Output has the expected length and every sample is bounded
    assert!(
        (output.len() as i64 - TONE_OUTPUT_FRAMES as i64).unsigned_abs() < LENGTH_TOLERANCE,
        "Expected ~{} samples, got {}",
        TONE_OUTPUT_FRAMES,
        output.len()
    );
    assert!(
        output
            .iter()
            .all(|&s| s.is_finite() && s.abs() <= MAX_AMPLITUDE)
    );
}

/// WHAT: Matching rates skip rubato and only downmix
/// WHY: A 16kHz stereo microphone must not pay for a resampler
#[test]
#[allow(clippy::unwrap_used)]
fn given_same_rate_stereo_when_processing_then_frames_averaged_to_mono() {
    // Given: 16kHz stereo input
    let mut resampler = Resampler::new(StreamFormat::new(16_000, 2), UPLOAD_FORMAT).unwrap();

    // When: Processing two stereo frames
    let output = resampler.process(&[1.0, 0.0, -0.5, -0.5]).unwrap();

    // Then: Each frame becomes the mean of its channels, nothing is held back
    assert_eq!(output, vec![0.5, -0.5]);
    assert!(resampler.flush().unwrap().is_empty());
}

/// WHAT: Zero-channel formats are rejected
/// WHY: A broken device description must fail the activation, not divide by zero
#[test]
fn given_zero_channels_when_creating_resampler_then_error() {
    // Given/When: A format without channels
    let result = Resampler::new(StreamFormat::new(INPUT_SAMPLE_RATE, 0), UPLOAD_FORMAT);

    // Then: Construction fails
    assert!(result.is_err());
}
