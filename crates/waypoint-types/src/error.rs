//! Error taxonomy for a relay request.
//!
//! Each variant family maps to one pipeline stage. Any of them aborts the
//! request; none of them is retried. Line-level noise inside the agent event
//! stream is absent here: it is dropped by the parser and never
//! becomes an error.

use thiserror::Error;

/// The upload could not be turned into an [`AudioClip`](crate::AudioClip).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestionError {
    /// The multipart body could not be read.
    #[error("malformed upload: {0}")]
    Malformed(String),

    /// A required form field was not present.
    #[error("missing form field: {0}")]
    MissingField(&'static str),

    /// The audio field was present but empty.
    #[error("uploaded audio is empty")]
    EmptyAudio,

    /// The audio field exceeded the upload limit.
    #[error("uploaded audio exceeds maximum size: {size} bytes (limit: {limit} bytes)")]
    TooLarge { size: usize, limit: usize },
}

/// Speech-to-text failed.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// The request never produced a response (DNS, connect, TLS, body read).
    #[error("transcription request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("transcription service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered, but not with a recognizable transcript.
    #[error("invalid transcription response: {0}")]
    Decode(String),

    /// The clip's container format is not one the service accepts.
    #[error("unsupported audio encoding: {0}")]
    UnsupportedEncoding(String),

    /// The clip is larger than the service accepts.
    #[error("audio data exceeds maximum size: {size} bytes (limit: {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    /// The local transcription process failed.
    #[error("STT process error: {0}")]
    Process(String),

    /// The transcription did not finish in time.
    #[error("transcription timed out after {0} seconds")]
    Timeout(u64),
}

/// The agent exchange failed before or while streaming.
///
/// Malformed event lines are not represented: they are skipped.
#[derive(Debug, Error)]
pub enum AgentStreamError {
    /// The bearer token could not be obtained or was rejected.
    #[error("agent authorization failed: {0}")]
    Authorization(String),

    /// The connection could not be opened.
    #[error("agent connection failed: {0}")]
    Connection(String),

    /// The initial response carried a non-success status.
    #[error("agent service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The transport broke after the stream had started.
    #[error("agent stream interrupted: {0}")]
    Interrupted(String),

    /// The request was abandoned before the stream finished.
    #[error("agent stream cancelled")]
    Cancelled,
}

/// Text-to-speech failed.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The text cannot be synthesized as given.
    #[error("invalid synthesis input: {0}")]
    InvalidInput(String),

    /// The voice configuration is unusable.
    #[error("invalid voice configuration: {0}")]
    Config(String),

    /// The synthesis engine failed.
    #[error("TTS error: {0}")]
    Process(String),

    /// The synthesis engine did not finish in time.
    #[error("TTS process timed out after {0} seconds")]
    Timeout(u64),

    /// The engine output could not be packaged as audio.
    #[error("audio encoding failed: {0}")]
    Encoding(String),
}
