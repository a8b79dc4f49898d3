//! Normalized audio representation shared by the transport and the pipeline.
//!
//! Audio inside the pipeline is always signed 16-bit little-endian PCM.
//! Provider-specific encodings (µ-law, L16) are converted at the codec
//! boundary and never leak past it.

use std::sync::Arc;
use std::time::Duration;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// An immutable buffer of PCM16LE audio.
///
/// Cloning is cheap: the payload is reference counted and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pcm: Arc<[u8]>,
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Position of this chunk within its stream, starting at 0.
    pub sequence: u64,
}

impl AudioChunk {
    pub fn new(pcm: impl Into<Arc<[u8]>>, sample_rate: u32, channels: u16, sequence: u64) -> Self {
        Self {
            pcm: pcm.into(),
            sample_rate,
            channels,
            sequence,
        }
    }

    /// Builds a mono chunk from decoded samples.
    pub fn from_samples(samples: &[i16], sample_rate: u32, sequence: u64) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for sample in samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(pcm, sample_rate, 1, sequence)
    }

    /// Raw PCM16LE bytes.
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Decodes the payload into samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Playback duration of the chunk at its sample rate.
    pub fn duration(&self) -> Duration {
        let frame_bytes = BYTES_PER_SAMPLE * usize::from(self.channels.max(1));
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = (self.pcm.len() / frame_bytes) as u64;
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate))
    }

    /// Returns the same audio re-stamped with a new sequence number.
    pub fn with_sequence(&self, sequence: u64) -> Self {
        Self {
            pcm: Arc::clone(&self.pcm),
            sample_rate: self.sample_rate,
            channels: self.channels,
            sequence,
        }
    }
}

/// Converts mono PCM16 samples between sample rates by linear interpolation.
///
/// Adequate for speech at telephony rates; not meant for music.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * step;
            let index = position.floor() as usize;
            if index >= last {
                return samples[last];
            }
            let frac = position - index as f64;
            let a = f64::from(samples[index]);
            let b = f64::from(samples[index + 1]);
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}
