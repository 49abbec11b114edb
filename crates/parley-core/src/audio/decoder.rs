use crate::{
    CoreResult, SessionError,
    audio::{Decoded, Decoder, DecoderFactory, StreamFormat, decode_pcm16},
    worker::WorkerRole,
};

use std::{io::Cursor, panic::Location};

use error_location::ErrorLocation;
use hound::{SampleFormat, WavReader};
use tracing::{debug, trace};

/// Header bytes buffered before a WAV reply is declared malformed.
pub(crate) const MAX_WAV_HEADER: usize = 64 * 1024;

/// Chunk length written by servers that stream a WAV of unknown size.
const OPEN_ENDED_LEN: u32 = u32::MAX;

/// RIFF magic, size and `WAVE` form type.
const RIFF_PREAMBLE_LEN: usize = 12;

/// Chunk id plus chunk length.
const CHUNK_HEADER_LEN: usize = 8;

/// Decodes a streamed WAV reply: buffers until the header parses, reports
/// the format once, then passes the 16-bit data through.
#[derive(Debug, Default)]
pub struct WavDecoder {
    header: Vec<u8>,
    in_data: bool,
    carry: Option<u8>,
}

impl WavDecoder {
    /// A decoder waiting for a header.
    pub fn new() -> Self {
        Self::default()
    }

    #[track_caller]
    fn parse_header(&mut self) -> CoreResult<Option<(StreamFormat, usize)>> {
        let header = close_open_ended(&self.header);
        let reader = match WavReader::new(Cursor::new(header.as_slice())) {
            Ok(reader) => reader,
            Err(hound::Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if self.header.len() > MAX_WAV_HEADER {
                    return Err(decode_error(format!(
                        "No WAV data chunk within {} bytes",
                        MAX_WAV_HEADER
                    )));
                }
                return Ok(None);
            }
            Err(e) => return Err(decode_error(format!("Invalid WAV header: {}", e))),
        };

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(decode_error(format!(
                "Unsupported WAV encoding: {:?} {}-bit",
                spec.sample_format, spec.bits_per_sample
            )));
        }

        let data_offset = usize::try_from(reader.into_inner().position())
            .map_err(|e| decode_error(format!("WAV header offset out of range: {}", e)))?;

        Ok(Some((
            StreamFormat::new(spec.sample_rate, spec.channels),
            data_offset,
        )))
    }
}

impl Decoder for WavDecoder {
    fn decode(&mut self, bytes: &[u8]) -> CoreResult<Decoded> {
        if self.in_data {
            return Ok(Decoded {
                format: None,
                samples: decode_pcm16(bytes, &mut self.carry),
            });
        }

        self.header.extend_from_slice(bytes);

        let Some((format, data_offset)) = self.parse_header()? else {
            trace!(buffered = self.header.len(), "Waiting for WAV header");
            return Ok(Decoded::default());
        };

        debug!(format = %format, data_offset, "WAV header parsed");

        self.in_data = true;
        let header = std::mem::take(&mut self.header);
        let samples = decode_pcm16(&header[data_offset..], &mut self.carry);

        Ok(Decoded {
            format: Some(format),
            samples,
        })
    }
}

/// Copy of `header` with open-ended RIFF and `data` lengths replaced, so a
/// streamed header parses before the reply's size is known.
fn close_open_ended(header: &[u8]) -> Vec<u8> {
    let mut patched = header.to_vec();
    if patched.len() < RIFF_PREAMBLE_LEN {
        return patched;
    }

    if read_len(&patched, 4) == Some(OPEN_ENDED_LEN) {
        let riff_len = u32::try_from(patched.len() - CHUNK_HEADER_LEN).unwrap_or(OPEN_ENDED_LEN - 1);
        patched[4..8].copy_from_slice(&riff_len.to_le_bytes());
    }

    let mut pos = RIFF_PREAMBLE_LEN;
    while let Some(len) = pos.checked_add(4).and_then(|at| read_len(&patched, at)) {
        if &patched[pos..pos + 4] == b"data" {
            if len == OPEN_ENDED_LEN {
                trace!("Open-ended WAV data chunk");
                patched[pos + 4..pos + 8].copy_from_slice(&0u32.to_le_bytes());
            }
            break;
        }

        // Chunks are word aligned.
        let Some(next) = usize::try_from(len)
            .ok()
            .and_then(|len| len.checked_add(CHUNK_HEADER_LEN + (len & 1)))
            .and_then(|step| pos.checked_add(step))
        else {
            break;
        };
        pos = next;
    }

    patched
}

fn read_len(bytes: &[u8], at: usize) -> Option<u32> {
    let field = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// Headerless 16-bit little-endian PCM at a format fixed by configuration.
#[derive(Debug)]
pub struct PcmDecoder {
    format: StreamFormat,
    announced: bool,
    carry: Option<u8>,
}

impl PcmDecoder {
    /// A decoder that reports `format` with its first output.
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            announced: false,
            carry: None,
        }
    }
}

impl Decoder for PcmDecoder {
    fn decode(&mut self, bytes: &[u8]) -> CoreResult<Decoded> {
        let format = (!self.announced).then_some(self.format);
        self.announced = true;

        Ok(Decoded {
            format,
            samples: decode_pcm16(bytes, &mut self.carry),
        })
    }
}

/// Creates [`WavDecoder`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoderFactory;

impl DecoderFactory for WavDecoderFactory {
    fn create(&self) -> Box<dyn Decoder> {
        Box::new(WavDecoder::new())
    }
}

/// Creates [`PcmDecoder`]s for one fixed format.
#[derive(Debug, Clone, Copy)]
pub struct PcmDecoderFactory {
    format: StreamFormat,
}

impl PcmDecoderFactory {
    /// Decoders will assume `format`.
    pub fn new(format: StreamFormat) -> Self {
        Self { format }
    }
}

impl DecoderFactory for PcmDecoderFactory {
    fn create(&self) -> Box<dyn Decoder> {
        Box::new(PcmDecoder::new(self.format))
    }
}

#[track_caller]
fn decode_error(reason: String) -> SessionError {
    SessionError::Pipeline {
        role: WorkerRole::Playback,
        reason,
        location: ErrorLocation::from(Location::caller()),
    }
}
