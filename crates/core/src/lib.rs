//! Core library for turning synthesized speech into mouth animation.
//!
//! Encoded audio is decoded to mono samples at a fixed analysis rate, turned
//! into a log-compressed loudness envelope and then delivered either as a
//! precomputed [`AnimationTrack`] or as a live value that a
//! [`LivePublisher`] steps through in real time.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod live;
pub mod service;
pub mod timeline;
pub mod tts;

pub use analysis::{normalize_peak, Envelope, EnvelopeExtractor};
pub use audio::{AudioDecoder, SampleBuffer};
pub use config::{AnalysisConfig, AppConfig, ChatConfig, LiveConfig, ServerConfig, TtsConfig};
pub use error::{Result, VisemeError};
pub use live::{LivePublisher, LiveState, LiveWriter, PublishReport};
pub use service::{MouthShapePipeline, MouthShapeService};
pub use timeline::{AnimationTrack, FrameSampler};
pub use tts::{strip_stage_directions, HttpSynthesizer, SpeechSynthesizer, TtsRequest};
