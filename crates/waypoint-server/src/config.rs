//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use waypoint_voice::{AgentConfig, SynthesisConfig, TranscriptionBackend, TranscriptionConfig};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech-to-text service.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Conversational agent and its credentials.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Text-to-speech engine and voice.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted audio upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "waypoint_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting the server cannot run without is empty.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

impl Config {
    /// Checks that every outbound service has enough settings to be built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.transcription.backend {
            TranscriptionBackend::Http if self.transcription.url.is_empty() => {
                return Err(ConfigError::Missing("transcription.url"));
            }
            TranscriptionBackend::WhisperCli if self.transcription.binary_path.is_empty() => {
                return Err(ConfigError::Missing("transcription.binary_path"));
            }
            TranscriptionBackend::WhisperCli if self.transcription.model_path.is_empty() => {
                return Err(ConfigError::Missing("transcription.model_path"));
            }
            _ => {}
        }
        if self.agent.url.is_empty() {
            return Err(ConfigError::Missing("agent.url"));
        }
        if self.agent.token_url.is_empty() && self.agent.bearer_token.is_empty() {
            return Err(ConfigError::Missing("agent.token_url or agent.bearer_token"));
        }
        if !self.agent.token_url.is_empty() && self.agent.api_key.is_empty() {
            return Err(ConfigError::Missing("agent.api_key"));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `WAYPOINT_HOST` overrides `server.host`
/// - `WAYPOINT_PORT` overrides `server.port`
/// - `WAYPOINT_LOG_LEVEL` overrides `logging.level`
/// - `WAYPOINT_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `WAYPOINT_STT_URL` / `WAYPOINT_STT_API_KEY` override the transcription endpoint and key
/// - `WAYPOINT_AGENT_URL` overrides `agent.url`
/// - `WAYPOINT_TOKEN_URL` / `WAYPOINT_AGENT_API_KEY` override the token exchange
/// - `WAYPOINT_PIPER_BINARY` / `WAYPOINT_VOICES_DIR` override the synthesis paths
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `WAYPOINT_*` overrides read through `lookup`.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("WAYPOINT_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("WAYPOINT_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("WAYPOINT_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("WAYPOINT_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = lookup("WAYPOINT_STT_URL") {
        config.transcription.url = url;
    }
    if let Some(key) = lookup("WAYPOINT_STT_API_KEY") {
        config.transcription.api_key = key;
    }
    if let Some(url) = lookup("WAYPOINT_AGENT_URL") {
        config.agent.url = url;
    }
    if let Some(url) = lookup("WAYPOINT_TOKEN_URL") {
        config.agent.token_url = url;
    }
    if let Some(key) = lookup("WAYPOINT_AGENT_API_KEY") {
        config.agent.api_key = key;
    }
    if let Some(binary) = lookup("WAYPOINT_PIPER_BINARY") {
        config.synthesis.piper_binary = binary;
    }
    if let Some(dir) = lookup("WAYPOINT_VOICES_DIR") {
        config.synthesis.voices_dir = dir;
    }
}
