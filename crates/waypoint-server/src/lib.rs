//! Waypoint relay server library.
//!
//! Exposes the router and startup wiring so the binary and the integration
//! tests build the exact same application.

pub mod api;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::{Config, ConfigError};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use waypoint_types::{AgentStreamError, TranscriptionError};
use waypoint_voice::{
    build_token_provider, build_transcriber, ConversationPipeline, HttpAgentGateway,
    LocalSynthesizer,
};

/// Room left on top of the audio limit for multipart boundaries and the
/// timestamp part.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state.
pub struct AppState {
    pub pipeline: ConversationPipeline,
    /// Largest accepted `audio` part, in bytes.
    pub max_upload_bytes: usize,
}

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transcription setup failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("agent setup failed: {0}")]
    Agent(#[from] AgentStreamError),
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/transcribe-audio",
            post(api::transcribe_audio_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}

/// Validates `config` and builds every outbound capability.
///
/// The agent token is fetched once here so a bad key shows up in the startup
/// log. A failed fetch is not fatal; the next request tries again.
pub async fn build_pipeline(config: &Config) -> Result<ConversationPipeline, StartupError> {
    config.validate()?;

    let transcriber = build_transcriber(&config.transcription)?;
    tracing::info!(backend = ?config.transcription.backend, "transcriber ready");

    let tokens = build_token_provider(&config.agent)?;
    match tokens.bearer_token().await {
        Ok(_) => tracing::info!("agent authorization token obtained"),
        Err(e) => tracing::warn!(error = %e, "initial agent token fetch failed"),
    }
    let agent = HttpAgentGateway::from_config(&config.agent, tokens)?;

    let synthesizer = LocalSynthesizer::from_config(&config.synthesis);
    tracing::info!(
        engine = ?config.synthesis.voice.engine,
        model = %config.synthesis.voice.model_path,
        "synthesizer ready"
    );

    Ok(ConversationPipeline::new(
        transcriber,
        Arc::new(agent),
        Arc::new(synthesizer),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_pipeline_rejects_incomplete_config() {
        let err = build_pipeline(&Config::default()).await.err().unwrap();
        assert!(matches!(
            err,
            StartupError::Config(ConfigError::Missing("transcription.url"))
        ));
    }

    #[tokio::test]
    async fn build_pipeline_with_static_token() {
        let mut config = Config::default();
        config.transcription.url = "http://127.0.0.1:9/translations".to_string();
        config.agent.url = "http://127.0.0.1:9/stream".to_string();
        config.agent.bearer_token = "pre-issued".to_string();

        assert!(build_pipeline(&config).await.is_ok());
    }
}
