//! Settings for the outbound services.
//!
//! These deserialize straight from the server's TOML sections. Secrets are
//! never serialized back out and are redacted from `Debug` output.

use serde::{Deserialize, Serialize};
use std::fmt;
use waypoint_types::VoiceProfile;

fn default_model() -> String {
    "whisper".to_string()
}

fn default_stt_timeout_secs() -> u64 {
    120
}

fn default_agent_timeout_secs() -> u64 {
    300
}

fn default_voices_dir() -> String {
    "assets/voices".to_string()
}

fn default_piper_binary() -> String {
    "piper".to_string()
}

fn default_espeak_binary() -> String {
    "espeak-ng".to_string()
}

/// Which transcriber implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionBackend {
    /// Hosted speech-to-text over HTTP.
    #[default]
    Http,
    /// Local whisper.cpp-compatible binary.
    WhisperCli,
}

/// How the hosted transcription service expects the API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionAuth {
    /// `api-key: <key>` (Azure deployments).
    #[default]
    ApiKey,
    /// `Authorization: Bearer <key>`.
    Bearer,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub backend: TranscriptionBackend,
    /// Full URL of the transcription (or translation) endpoint.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub auth: TranscriptionAuth,
    /// Sent as the `api-version` query parameter when set.
    #[serde(default)]
    pub api_version: Option<String>,
    /// Model or deployment identifier sent with each clip.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_stt_timeout_secs")]
    pub timeout_secs: u64,
    /// whisper.cpp binary, for the `whisper_cli` backend.
    #[serde(default)]
    pub binary_path: String,
    /// GGML model file, for the `whisper_cli` backend.
    #[serde(default)]
    pub model_path: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend: TranscriptionBackend::default(),
            url: String::new(),
            api_key: String::new(),
            auth: TranscriptionAuth::default(),
            api_version: None,
            model: default_model(),
            timeout_secs: default_stt_timeout_secs(),
            binary_path: String::new(),
            model_path: String::new(),
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("auth", &self.auth)
            .field("api_version", &self.api_version)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("binary_path", &self.binary_path)
            .field("model_path", &self.model_path)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Streaming endpoint of the conversational agent.
    #[serde(default)]
    pub url: String,
    /// Token exchange endpoint. When empty, `bearer_token` is used as is.
    #[serde(default)]
    pub token_url: String,
    /// Long-lived key exchanged at `token_url` for a bearer token.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Pre-issued bearer token, used when no `token_url` is configured.
    #[serde(default, skip_serializing)]
    pub bearer_token: String,
    /// Upper bound for one whole agent exchange, stream included.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token_url: String::new(),
            api_key: String::new(),
            bearer_token: String::new(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("url", &self.url)
            .field("token_url", &self.token_url)
            .field("api_key", &"[REDACTED]")
            .field("bearer_token", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Directory that relative model paths resolve against.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,
    #[serde(default = "default_piper_binary")]
    pub piper_binary: String,
    /// Binary used by the `system` voice engine.
    #[serde(default = "default_espeak_binary")]
    pub espeak_binary: String,
    #[serde(default)]
    pub voice: VoiceProfile,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voices_dir: default_voices_dir(),
            piper_binary: default_piper_binary(),
            espeak_binary: default_espeak_binary(),
            voice: VoiceProfile::default(),
        }
    }
}
