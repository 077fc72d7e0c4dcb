use std::io::Cursor;

use hound::{SampleFormat, WavReader};
use rubato::{FftFixedIn, Resampler};

use crate::{Result, VisemeError};

/// Mono samples at the analysis rate, produced by [`AudioDecoder::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wraps samples that are already mono and at `sample_rate`.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the samples in playback order.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in the buffer.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the clip in seconds.
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Turns encoded audio into mono samples at a fixed analysis rate.
///
/// WAV is the only supported container; PCM integer samples of any width
/// and IEEE float samples are accepted. Multi-channel input is averaged down
/// to mono before resampling.
#[derive(Debug, Clone, Copy)]
pub struct AudioDecoder {
    sample_rate: u32,
}

impl AudioDecoder {
    /// Creates a decoder that delivers samples at `sample_rate` Hz.
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Returns the rate every decoded buffer is delivered at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decodes a WAV byte buffer, downmixes it to mono and resamples it to
    /// the analysis rate. Empty, corrupt or non-WAV input is a
    /// [`VisemeError::Decode`].
    pub fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer> {
        if bytes.is_empty() {
            return Err(VisemeError::Decode("audio buffer is empty".into()));
        }

        let reader = WavReader::new(Cursor::new(bytes))
            .map_err(|err| VisemeError::Decode(err.to_string()))?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(VisemeError::Decode(format!(
                "unsupported stream layout: {} channels at {} Hz",
                spec.channels, spec.sample_rate
            )));
        }

        let interleaved = read_interleaved(reader)?;
        let mono = downmix(&interleaved, spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, self.sample_rate)?;

        tracing::debug!(
            source_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            samples = samples.len(),
            "decoded audio"
        );

        Ok(SampleBuffer::new(samples, self.sample_rate))
    }
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new(8_000)
    }
}

fn read_interleaved(reader: WavReader<Cursor<&[u8]>>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let decoded: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect(),
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 * scale))
                .collect()
        }
    };

    decoded.map_err(|err| VisemeError::Decode(err.to_string()))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Input frames handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Converts a whole clip from `from` Hz to `to` Hz with rubato's FFT
/// resampler. The resampler's start-up delay is trimmed and the result is
/// cut or padded to `ceil(len * to / from)` samples.
fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let output_len = (samples.len() as u64 * to as u64).div_ceil(from as u64) as usize;
    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|err| VisemeError::Decode(format!("resampler setup failed: {err}")))?;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(output_len + delay);

    let mut position = 0;
    while position < samples.len() {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(samples.len());
        let chunk = &samples[position..end];
        let block = if chunk.len() == needed {
            resampler.process(&[chunk], None)
        } else {
            resampler.process_partial(Some(&[chunk][..]), None)
        }
        .map_err(|err| VisemeError::Decode(format!("resampling failed: {err}")))?;
        output.extend_from_slice(&block[0]);
        position = end;
    }

    // Flush the tail still held inside the resampler.
    while output.len() < delay + output_len {
        let block = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|err| VisemeError::Decode(format!("resampling failed: {err}")))?;
        if block[0].is_empty() {
            break;
        }
        output.extend_from_slice(&block[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(output_len, 0.0);
    Ok(output)
}
