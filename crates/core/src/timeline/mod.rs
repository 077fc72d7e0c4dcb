use serde::{Deserialize, Serialize};

use crate::Envelope;

/// Default animation rate for batch tracks.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Precomputed mouth animation for a whole clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationTrack {
    /// Clip length in seconds.
    pub duration: f32,
    /// One mouth-openness value per frame, never negative.
    #[serde(rename = "mouth_shape_data")]
    pub frames: Vec<f32>,
    pub frame_rate: u32,
}

impl AnimationTrack {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Converts an [`Envelope`] into mouth frames.
///
/// Batch mode walks the envelope in fixed windows and keeps the peak of each
/// window. Live mode looks up a single value from the elapsed playback time.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    frame_rate: u32,
}

impl FrameSampler {
    /// Creates a sampler producing `frame_rate` frames per second of audio.
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
        }
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Number of envelope samples that make up one frame. The fractional part
    /// of `sample_rate / frame_rate` is dropped.
    pub fn stride(&self, sample_rate: u32) -> usize {
        ((sample_rate as f32 / self.frame_rate as f32) as usize).max(1)
    }

    /// Peak-hold downsampling. The last window may be shorter than the stride.
    pub fn sample(&self, envelope: &Envelope) -> AnimationTrack {
        let stride = self.stride(envelope.sample_rate());
        let frames = envelope
            .values()
            .chunks(stride)
            .map(|window| window.iter().copied().fold(0.0_f32, f32::max))
            .collect();

        AnimationTrack {
            duration: envelope.duration(),
            frames,
            frame_rate: self.frame_rate,
        }
    }

    /// Live lookup: the envelope value `elapsed_seconds` into playback,
    /// floored at zero. The index is `elapsed * rate + 1`; `None` once it
    /// runs past the end of the envelope.
    pub fn value_at(envelope: &Envelope, elapsed_seconds: f64) -> Option<f32> {
        if elapsed_seconds < 0.0 {
            return None;
        }
        let index = (elapsed_seconds * envelope.sample_rate() as f64) as usize + 1;
        envelope.values().get(index).map(|value| value.max(0.0))
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}
