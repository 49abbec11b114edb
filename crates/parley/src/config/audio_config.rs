use crate::config::{
    default_idle_limit, default_reply_channels, default_reply_sample_rate,
    default_upload_channels, default_upload_sample_rate, default_volume,
};

use parley_core::StreamFormat;
use serde::{Deserialize, Serialize};

/// Encoding of the server's reply audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyCodec {
    /// WAV container; the format comes from the header.
    #[default]
    Wav,
    /// Headerless 16-bit PCM at the configured reply format.
    Pcm,
}

/// Audio pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Upload sample rate in Hz.
    #[serde(default = "default_upload_sample_rate")]
    pub upload_sample_rate: u32,
    /// Upload channel count.
    #[serde(default = "default_upload_channels")]
    pub upload_channels: u16,
    /// Reply encoding.
    #[serde(default)]
    pub reply_codec: ReplyCodec,
    /// Reply sample rate for `pcm` replies.
    #[serde(default = "default_reply_sample_rate")]
    pub reply_sample_rate: u32,
    /// Reply channel count for `pcm` replies.
    #[serde(default = "default_reply_channels")]
    pub reply_channels: u16,
    /// Read timeouts tolerated before the first reply audio.
    #[serde(default = "default_idle_limit")]
    pub idle_limit: u32,
    /// Initial output volume, 0 to 100.
    #[serde(default = "default_volume")]
    pub volume: u8,
}

impl AudioConfig {
    /// Format the microphone is uploaded in.
    pub fn upload_format(&self) -> StreamFormat {
        StreamFormat::new(self.upload_sample_rate, self.upload_channels)
    }

    /// Format of headerless replies.
    pub fn reply_format(&self) -> StreamFormat {
        StreamFormat::new(self.reply_sample_rate, self.reply_channels)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            upload_sample_rate: default_upload_sample_rate(),
            upload_channels: default_upload_channels(),
            reply_codec: ReplyCodec::default(),
            reply_sample_rate: default_reply_sample_rate(),
            reply_channels: default_reply_channels(),
            idle_limit: default_idle_limit(),
            volume: default_volume(),
        }
    }
}
