use serde::{Deserialize, Serialize};

use crate::{Result, SampleBuffer, VisemeError};

/// Offset added before the logarithm so silent samples stay finite.
pub const LOG_EPSILON: f32 = 1e-10;

/// Default scale applied after the second normalisation pass. Values may
/// exceed 1.0 up to this factor.
pub const DEFAULT_HEADROOM: f32 = 1.2;

/// Per-sample loudness profile used as a proxy for mouth openness.
///
/// Values are log compressed and may be negative for near-silent samples;
/// consumers floor them at zero when turning them into mouth frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    values: Vec<f32>,
    sample_rate: u32,
}

impl Envelope {
    /// Wraps one value per sample of audio taken at `sample_rate`.
    pub fn new(values: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            values,
            sample_rate,
        }
    }

    /// Envelope values in sample order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Rate of the audio the envelope was taken from.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of values, equal to the number of analysed samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Length of the analysed clip in seconds.
    pub fn duration(&self) -> f32 {
        self.values.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Two-pass normalise, log compress, renormalise pipeline.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeExtractor {
    headroom: f32,
}

impl EnvelopeExtractor {
    pub fn new(headroom: f32) -> Self {
        Self { headroom }
    }

    /// Builds the envelope for `buffer`. The output has exactly one value per
    /// input sample.
    pub fn extract(&self, buffer: &SampleBuffer) -> Result<Envelope> {
        let samples = buffer.samples();
        if samples.is_empty() {
            return Err(VisemeError::Processing("no samples to analyse".into()));
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(VisemeError::Processing(format!(
                "non-finite sample at index {index}"
            )));
        }

        let floor = samples.iter().copied().fold(f32::INFINITY, f32::min);
        let mut values: Vec<f32> = samples.iter().map(|s| s - floor).collect();

        normalize_peak(&mut values);
        for value in values.iter_mut() {
            *value = (*value + LOG_EPSILON).ln() + 1.0;
        }
        normalize_peak(&mut values);
        for value in values.iter_mut() {
            *value *= self.headroom;
        }

        if values.iter().any(|v| !v.is_finite()) {
            return Err(VisemeError::Processing(
                "envelope contains non-finite values".into(),
            ));
        }

        Ok(Envelope::new(values, buffer.sample_rate()))
    }
}

impl Default for EnvelopeExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_HEADROOM)
    }
}

/// Divides every value by the peak of `values`.
///
/// A peak that is zero or negative (silence, or a signal that is entirely
/// below zero after log compression) is treated as 1.0, so the values are
/// left untouched instead of being divided by zero or flipped in sign.
pub fn normalize_peak(values: &mut [f32]) {
    let peak = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let divisor = if peak > 0.0 { peak } else { 1.0 };
    for value in values.iter_mut() {
        *value /= divisor;
    }
}
