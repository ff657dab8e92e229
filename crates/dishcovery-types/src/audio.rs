//! PCM audio chunk and format definitions.
//!
//! Audio crosses the relay as opaque 16-bit signed little-endian mono PCM.
//! The client sends 16 kHz audio and receives 24 kHz audio; the relay never
//! resamples, coalesces, or splits chunks.

use bytes::Bytes;
use std::time::Duration;

/// Sample layout of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bytes per sample per channel.
    pub bytes_per_sample: u16,
}

impl AudioFormat {
    /// Microphone audio sent by the client: 16-bit, 16 kHz, mono.
    pub const CLIENT_INPUT: AudioFormat = AudioFormat {
        sample_rate: 16_000,
        channels: 1,
        bytes_per_sample: 2,
    };

    /// Speech audio played back by the client: 16-bit, 24 kHz, mono.
    pub const CLIENT_OUTPUT: AudioFormat = AudioFormat {
        sample_rate: 24_000,
        channels: 1,
        bytes_per_sample: 2,
    };

    /// Bytes needed to hold one second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.bytes_per_sample as usize
    }

    /// MIME type understood by the upstream speech service.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// An immutable segment of PCM audio.
///
/// Chunks are moved from producer to consumer; cloning only bumps a
/// reference count and never copies or mutates the samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Bytes);

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// A chunk of digital silence lasting `duration` in `format`.
    ///
    /// The length is rounded down to a whole number of sample frames.
    pub fn silence(duration: Duration, format: AudioFormat) -> Self {
        let frame = format.channels as usize * format.bytes_per_sample as usize;
        let raw = (format.bytes_per_second() as u128 * duration.as_millis() / 1000) as usize;
        let len = raw - raw % frame.max(1);
        Self(Bytes::from(vec![0u8; len]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Playback duration of this chunk in `format`.
    pub fn duration(&self, format: AudioFormat) -> Duration {
        let per_second = format.bytes_per_second().max(1) as f64;
        Duration::from_secs_f64(self.0.len() as f64 / per_second)
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for AudioChunk {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}
