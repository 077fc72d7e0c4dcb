use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{Result, VisemeError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub analysis: AnalysisConfig,
    pub live: LiveConfig,
    pub tts: TtsConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Sections and fields that are absent
    /// fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| VisemeError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.sample_rate == 0 {
            return Err(VisemeError::Config("analysis.sample_rate must be positive".into()));
        }
        if self.analysis.frame_rate == 0 {
            return Err(VisemeError::Config("analysis.frame_rate must be positive".into()));
        }
        if self.live.samples_per_step == 0 {
            return Err(VisemeError::Config("live.samples_per_step must be positive".into()));
        }
        Ok(())
    }
}

/// Listener address and the front-end files served next to the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served under `/live2d_assets/`. Not served when unset.
    pub assets_dir: Option<PathBuf>,
    /// Page served at `/`. Not served when unset.
    pub index_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            assets_dir: None,
            index_file: None,
        }
    }
}

/// Rates used by the envelope pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate every decoded clip is resampled to before analysis.
    pub sample_rate: u32,
    /// Animation frames per second in batch mode.
    pub frame_rate: u32,
    /// Scale applied after the second normalisation pass.
    pub headroom: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8_000,
            frame_rate: 30,
            headroom: 1.2,
        }
    }
}

/// Cadence of the live publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub step_interval_ms: u64,
    /// Envelope samples per publisher step when computing the step budget.
    pub samples_per_step: usize,
    /// Optional text file that mirrors the live value for other processes.
    pub state_file: Option<PathBuf>,
}

impl LiveConfig {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 100,
            samples_per_step: 800,
            state_file: None,
        }
    }
}

/// Connection and synthesis parameters for the TTS service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub text_lang: String,
    pub ref_audio_path: String,
    pub prompt_text: String,
    pub prompt_lang: String,
    pub top_k: u32,
    pub top_p: f32,
    pub temperature: f32,
    pub speed_factor: f32,
    pub media_type: String,
    pub split_bucket: bool,
    pub parallel_infer: bool,
    pub repetition_penalty: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9880/tts".to_string(),
            timeout_secs: 60,
            text_lang: "auto".to_string(),
            ref_audio_path: String::new(),
            prompt_text: String::new(),
            prompt_lang: "zh".to_string(),
            top_k: 7,
            top_p: 1.0,
            temperature: 1.0,
            speed_factor: 1.0,
            media_type: "wav".to_string(),
            split_bucket: true,
            parallel_infer: true,
            repetition_penalty: 1.35,
        }
    }
}

/// OpenAI-compatible chat completion endpoint used by the chat relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            system_prompt: "You are a friendly avatar. Keep replies short and conversational."
                .to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "server": { "port": 8080, "assets_dir": "web/assets" },
                 "live": { "step_interval_ms": 50 } }"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.assets_dir, Some(PathBuf::from("web/assets")));
        assert_eq!(config.server.index_file, None);
        assert_eq!(config.live.step_interval(), Duration::from_millis(50));
        assert_eq!(config.live.samples_per_step, 800);
        assert_eq!(config.analysis.sample_rate, 8_000);
        assert_eq!(config.tts.top_k, 7);
    }

    #[test]
    fn rejects_zero_rates() {
        let mut config = AppConfig::default();
        config.analysis.frame_rate = 0;
        assert!(matches!(config.validate(), Err(VisemeError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("viseme-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "tts": { "endpoint": "http://tts.local/tts" } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.tts.endpoint, "http://tts.local/tts");
        assert_eq!(config.analysis.frame_rate, 30);
    }
}
