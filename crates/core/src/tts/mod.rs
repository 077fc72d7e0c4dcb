use std::time::Duration;

use serde::Serialize;

use crate::{Result, TtsConfig, VisemeError};

/// Black-box speech synthesizer: text in, encoded audio out.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Removes parenthesised stage directions such as `(smiles)` or `（笑）`.
///
/// Full-width brackets are used when the text contains `（`, ASCII brackets
/// otherwise. For each segment that follows an opening bracket only the text
/// after its first closing bracket survives (up to a second closing bracket,
/// if any).
pub fn strip_stage_directions(text: &str) -> String {
    let (open, close) = if text.contains('（') {
        ('（', '）')
    } else {
        ('(', ')')
    };

    text.split(open)
        .map(|segment| {
            if segment.contains(close) {
                segment.split(close).nth(1).unwrap_or_default()
            } else {
                segment
            }
        })
        .collect()
}

/// Query parameters sent to the TTS service.
#[derive(Debug, Clone, Serialize)]
pub struct TtsRequest<'a> {
    pub text: &'a str,
    pub text_lang: &'a str,
    pub ref_audio_path: &'a str,
    pub prompt_text: &'a str,
    pub prompt_lang: &'a str,
    pub top_k: u32,
    pub top_p: f32,
    pub temperature: f32,
    pub speed_factor: f32,
    pub media_type: &'a str,
    pub split_bucket: bool,
    pub parallel_infer: bool,
    pub repetition_penalty: f32,
}

impl<'a> TtsRequest<'a> {
    pub fn new(text: &'a str, config: &'a TtsConfig) -> Self {
        Self {
            text,
            text_lang: &config.text_lang,
            ref_audio_path: &config.ref_audio_path,
            prompt_text: &config.prompt_text,
            prompt_lang: &config.prompt_lang,
            top_k: config.top_k,
            top_p: config.top_p,
            temperature: config.temperature,
            speed_factor: config.speed_factor,
            media_type: &config.media_type,
            split_bucket: config.split_bucket,
            parallel_infer: config.parallel_infer,
            repetition_penalty: config.repetition_penalty,
        }
    }
}

/// Synthesizer backed by an HTTP TTS service answering `GET endpoint?text=..`.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: TtsConfig,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| VisemeError::Config(format!("tts client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let cleaned = strip_stage_directions(text);
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&TtsRequest::new(&cleaned, &self.config))
            .send()
            .await
            .map_err(|err| VisemeError::TtsUnavailable(err.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(%status, "tts service returned an error status");
            return Err(VisemeError::TtsUnavailable(format!("status {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| VisemeError::TtsUnavailable(err.to_string()))?;
        tracing::debug!(bytes = bytes.len(), "received synthesized audio");
        Ok(bytes.to_vec())
    }
}
