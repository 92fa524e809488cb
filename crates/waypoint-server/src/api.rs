//! HTTP handlers for the relay endpoint.

use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Multipart},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use waypoint_types::{AudioClip, IngestionError};
use waypoint_voice::PipelineError;

/// Size of each body chunk written back to the client.
const RESPONSE_CHUNK_BYTES: usize = 16 * 1024;

/// Errors returned by API handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<IngestionError> for ApiError {
    fn from(e: IngestionError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}

/// Handler for `POST /api/transcribe-audio`.
///
/// Expects `multipart/form-data` with an `audio` file part and a `timestamp`
/// text part. Answers with the synthesized reply as a chunked `audio/wav`
/// body.
pub async fn transcribe_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let clip = read_upload(multipart, state.max_upload_bytes).await?;

    // Dropping this future (client gone) fires the guard and stops every stage.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let output = state.pipeline.run(clip, cancel).await?;
    let content_type = output.audio.content_type();
    let audio = Bytes::from(output.audio.bytes);

    tracing::info!(
        bytes = audio.len(),
        spoken_chars = output.reply.spoken.len(),
        "streaming synthesized reply"
    );

    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(stream::iter(chunked(audio))),
    )
        .into_response())
}

/// Splits `audio` into response-sized slices without copying.
fn chunked(audio: Bytes) -> Vec<Result<Bytes, Infallible>> {
    (0..audio.len())
        .step_by(RESPONSE_CHUNK_BYTES)
        .map(|start| {
            let end = (start + RESPONSE_CHUNK_BYTES).min(audio.len());
            Ok(audio.slice(start..end))
        })
        .collect()
}

/// Reads the `audio` and `timestamp` parts of the upload. Other parts are
/// skipped.
async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<AudioClip, IngestionError> {
    let mut audio: Option<(String, Bytes)> = None;
    let mut timestamp: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IngestionError::Malformed(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("audio") => {
                let file_name = field.file_name().unwrap_or("recording.wav").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| IngestionError::Malformed(format!("failed to read audio: {}", e)))?;
                if data.len() > limit {
                    return Err(IngestionError::TooLarge {
                        size: data.len(),
                        limit,
                    });
                }
                audio = Some((file_name, data));
            }
            Some("timestamp") => {
                let text = field.text().await.map_err(|e| {
                    IngestionError::Malformed(format!("failed to read timestamp: {}", e))
                })?;
                timestamp = Some(text);
            }
            other => {
                tracing::debug!(field = other.unwrap_or("<unnamed>"), "ignoring form field");
            }
        }
    }

    let (file_name, data) = audio.ok_or(IngestionError::MissingField("audio"))?;
    let timestamp = timestamp.ok_or(IngestionError::MissingField("timestamp"))?;
    AudioClip::new(data.to_vec(), file_name, timestamp)
}
