use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    AnalysisConfig, AnimationTrack, AudioDecoder, Envelope, EnvelopeExtractor, FrameSampler,
    LivePublisher, LiveState, PublishReport, Result, SpeechSynthesizer, VisemeError,
};

/// Decode, envelope and frame sampling for encoded audio. Needs no
/// synthesizer, so offline tools can run it on files.
#[derive(Debug, Clone, Copy)]
pub struct MouthShapePipeline {
    decoder: AudioDecoder,
    extractor: EnvelopeExtractor,
    sampler: FrameSampler,
}

impl MouthShapePipeline {
    pub fn new(analysis: &AnalysisConfig) -> Self {
        Self {
            decoder: AudioDecoder::new(analysis.sample_rate),
            extractor: EnvelopeExtractor::new(analysis.headroom),
            sampler: FrameSampler::new(analysis.frame_rate),
        }
    }

    pub fn envelope(&self, audio: &[u8]) -> Result<Envelope> {
        let samples = self.decoder.decode(audio)?;
        self.extractor.extract(&samples)
    }

    /// Encoded audio to a complete [`AnimationTrack`].
    pub fn track(&self, audio: &[u8]) -> Result<AnimationTrack> {
        let envelope = self.envelope(audio)?;
        let track = self.sampler.sample(&envelope);
        tracing::debug!(
            duration = track.duration,
            frames = track.frame_count(),
            "built animation track"
        );
        Ok(track)
    }
}

impl Default for MouthShapePipeline {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

/// Entry point for both delivery modes: batch tracks and live publishing.
pub struct MouthShapeService {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    pipeline: MouthShapePipeline,
    publisher: Arc<LivePublisher>,
}

impl MouthShapeService {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        analysis: &AnalysisConfig,
        publisher: LivePublisher,
    ) -> Self {
        Self {
            synthesizer,
            pipeline: MouthShapePipeline::new(analysis),
            publisher: Arc::new(publisher),
        }
    }

    pub fn live_state(&self) -> &LiveState {
        self.publisher.state()
    }

    /// Synthesizes `text` and returns the encoded audio untouched.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let text = require_text(text)?;
        self.synthesizer.synthesize(text).await
    }

    /// Batch path: text to a complete [`AnimationTrack`].
    pub async fn mouth_shape(&self, text: &str) -> Result<AnimationTrack> {
        let audio = self.synthesize(text).await?;
        self.track_from_audio(&audio)
    }

    /// Batch path for audio that is already at hand.
    pub fn track_from_audio(&self, audio: &[u8]) -> Result<AnimationTrack> {
        self.pipeline.track(audio)
    }

    /// Live path: synthesizes `text` in the background and steps the live
    /// state through its envelope. Returns immediately; failures are logged.
    /// The returned handle resolves to the run's report, or `None` when the
    /// audio could not be produced.
    pub fn speak(self: &Arc<Self>, text: &str) -> Result<JoinHandle<Option<PublishReport>>> {
        let text = require_text(text)?.to_string();
        let service = Arc::clone(self);

        Ok(tokio::spawn(async move {
            match service.run_live(&text).await {
                Ok(report) => Some(report),
                Err(err) => {
                    tracing::warn!(error = %err, "live speech failed");
                    None
                }
            }
        }))
    }

    async fn run_live(&self, text: &str) -> Result<PublishReport> {
        let audio = self.synthesizer.synthesize(text).await?;
        let envelope = self.pipeline.envelope(&audio)?;
        self.publisher
            .start(envelope)?
            .await
            .map_err(|err| VisemeError::Processing(format!("live run aborted: {err}")))
    }
}

impl std::fmt::Debug for MouthShapeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MouthShapeService")
            .field("pipeline", &self.pipeline)
            .field("publisher", &self.publisher)
            .finish()
    }
}

fn require_text(text: &str) -> Result<&str> {
    if text.trim().is_empty() {
        Err(VisemeError::EmptyInput)
    } else {
        Ok(text)
    }
}
