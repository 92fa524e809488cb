//! Speech-to-text gateways.

use crate::config::{TranscriptionAuth, TranscriptionBackend, TranscriptionConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use waypoint_types::{AudioClip, AudioEncoding, Transcript, TranscriptionError};

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
pub const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for the local STT process.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Turns a recorded clip into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, TranscriptionError>;
}

/// Size and container checks shared by every backend.
fn check_clip(clip: &AudioClip) -> Result<AudioEncoding, TranscriptionError> {
    if clip.len() > MAX_STT_INPUT_BYTES {
        return Err(TranscriptionError::TooLarge {
            size: clip.len(),
            limit: MAX_STT_INPUT_BYTES,
        });
    }
    clip.encoding().ok_or_else(|| {
        TranscriptionError::UnsupportedEncoding(format!(
            "unrecognized container for '{}'",
            clip.name()
        ))
    })
}

/// Builds the transcriber selected by `config.backend`.
pub fn build_transcriber(
    config: &TranscriptionConfig,
) -> Result<Arc<dyn Transcriber>, TranscriptionError> {
    match config.backend {
        TranscriptionBackend::Http => Ok(Arc::new(HttpTranscriber::new(config)?)),
        TranscriptionBackend::WhisperCli => Ok(Arc::new(WhisperCliTranscriber::new(
            &config.model_path,
            &config.binary_path,
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Hosted speech-to-text reached over multipart HTTP.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    auth: TranscriptionAuth,
    api_version: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl HttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self, TranscriptionError> {
        if config.url.is_empty() {
            return Err(TranscriptionError::Request(
                "transcription url is not configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranscriptionError::Request(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            auth: config.auth,
            api_version: config.api_version.clone(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, TranscriptionError> {
        let encoding = check_clip(clip)?;

        let file = reqwest::multipart::Part::bytes(clip.bytes().to_vec())
            .file_name(clip.upload_name())
            .mime_str(encoding.mime_type())
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(version) = &self.api_version {
            request = request.query(&[("api-version", version)]);
        }
        request = match self.auth {
            TranscriptionAuth::ApiKey => request.header("api-key", &self.api_key),
            TranscriptionAuth::Bearer => request.bearer_auth(&self.api_key),
        };

        debug!(
            bytes = clip.len(),
            %encoding,
            model = %self.model,
            "sending clip to transcription service"
        );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TranscriptionError::Timeout(self.timeout_secs)
            } else {
                TranscriptionError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Decode(e.to_string()))?;

        info!(chars = parsed.text.len(), "transcription complete");
        Ok(Transcript::new(parsed.text.trim()))
    }
}

/// Local whisper.cpp-compatible binary driven over stdin/stdout.
#[derive(Debug, Clone)]
pub struct WhisperCliTranscriber {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl WhisperCliTranscriber {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, TranscriptionError> {
        check_clip(clip)?;

        // -m <model_path>: GGML model, -f -: read audio from stdin.
        // Plain transcription text is expected on stdout.
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| TranscriptionError::Process(format!("failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TranscriptionError::Process("failed to open stdin".to_string()))?;

        let audio = clip.bytes().to_vec();
        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move {
            let result = stdin.write_all(&audio).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| TranscriptionError::Timeout(STT_TIMEOUT.as_secs()))?
            .map_err(|e| TranscriptionError::Process(format!("failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::Process(format!(
                "STT binary failed: {}",
                stderr.trim()
            )));
        }

        // The binary may exit without draining stdin; a broken pipe then is not
        // a failure as long as it produced output.
        if let Ok(Err(e)) = write_task.await {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(TranscriptionError::Process(format!(
                    "failed to write to stdin: {}",
                    e
                )));
            }
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(chars = text.len(), "transcription complete");
        Ok(Transcript::new(text))
    }
}
