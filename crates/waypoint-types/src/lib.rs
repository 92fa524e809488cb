//! Shared types and error definitions for the Waypoint voice relay.
//!
//! This crate holds the data that flows through one relay request: the
//! uploaded clip, its transcript, the agent query, the incremental fragments
//! of the agent's answer, the split answer and the synthesized audio. It also
//! defines the per-stage error taxonomy (via `thiserror`).
//!
//! Nothing here performs I/O, so every other crate in the workspace can depend
//! on it without pulling in a runtime.

pub mod audio;
pub mod error;
pub mod voice;

pub use audio::{AudioClip, AudioEncoding, AudioFormat, SynthesizedAudio};
pub use error::{AgentStreamError, IngestionError, SynthesisError, TranscriptionError};
pub use voice::{VoiceEngine, VoiceProfile};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Text recognized from an [`AudioClip`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// One `{role, content}` entry of an agent query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub content: String,
    pub role: TurnRole,
}

/// Body sent to the conversational agent.
///
/// One query per request; no history is carried between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentQuery {
    pub messages: Vec<ConversationTurn>,
}

impl AgentQuery {
    /// Builds the single-turn query for a transcript.
    ///
    /// The upstream agent expects the caller's words under the `assistant`
    /// role.
    pub fn from_transcript(transcript: &Transcript) -> Self {
        Self {
            messages: vec![ConversationTurn {
                content: transcript.text.clone(),
                role: TurnRole::Assistant,
            }],
        }
    }
}

/// One incremental content delta from the agent stream.
///
/// An empty `content` is a valid fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    pub content: String,
}

impl StreamFragment {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Append-only concatenation of the fragments received so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedReply {
    text: String,
    fragments: usize,
}

impl AccumulatedReply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &StreamFragment) {
        self.text.push_str(&fragment.content);
        self.fragments += 1;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of fragments appended, including empty ones.
    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl FromIterator<StreamFragment> for AccumulatedReply {
    fn from_iter<I: IntoIterator<Item = StreamFragment>>(iter: I) -> Self {
        let mut reply = Self::new();
        for fragment in iter {
            reply.push(&fragment);
        }
        reply
    }
}

/// An agent reply separated into its structured prefix and its spoken text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReply {
    /// The leading bracketed block, verbatim, when one was found.
    pub structured_prefix: Option<String>,
    /// Text to read aloud. Always defined, possibly empty.
    pub spoken: String,
}

impl SplitReply {
    /// Decodes the structured prefix as JSON.
    ///
    /// Returns `None` when there is no prefix or it is not valid JSON.
    pub fn structured_value(&self) -> Option<serde_json::Value> {
        self.structured_prefix
            .as_deref()
            .and_then(|prefix| serde_json::from_str(prefix).ok())
    }
}

/// Lifecycle state of a relay request.
///
/// Transitions are strictly forward; any failure jumps to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Transcribing,
    Querying,
    Splitting,
    Synthesizing,
    Responding,
    Completed,
    Failed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Transcribing => "transcribing",
            Self::Querying => "querying",
            Self::Splitting => "splitting",
            Self::Synthesizing => "synthesizing",
            Self::Responding => "responding",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
