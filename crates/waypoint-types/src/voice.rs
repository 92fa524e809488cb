//! Voice selection for speech synthesis.
//!
//! A `VoiceProfile` maps the relay's single output voice to a local TTS
//! engine and its parameters.

use serde::{Deserialize, Serialize};

/// Supported local TTS engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceEngine {
    /// Piper TTS (ONNX-based, fast, local). Emits raw PCM.
    #[default]
    Piper,
    /// System TTS via `espeak-ng`. Emits WAV.
    System,
}

fn default_speed() -> f32 {
    1.0
}

fn default_sample_rate() -> u32 {
    22_050
}

/// The voice used for every synthesized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// The underlying TTS engine.
    #[serde(default)]
    pub engine: VoiceEngine,
    /// Path to the model file (relative to the voices directory or absolute).
    pub model_path: String,
    /// Path to the model configuration file (if applicable).
    #[serde(default)]
    pub config_path: Option<String>,
    /// Speech speed multiplier (1.0 is normal).
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Speaker ID within a multi-speaker model (0-indexed).
    #[serde(default)]
    pub speaker_id: Option<u32>,
    /// Sample rate of the raw PCM the model produces.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            engine: VoiceEngine::Piper,
            model_path: "en_US-lessac-medium.onnx".to_string(),
            config_path: Some("en_US-lessac-medium.onnx.json".to_string()),
            speed: default_speed(),
            speaker_id: None,
            sample_rate: default_sample_rate(),
        }
    }
}
