//! Voice relay services for Waypoint.
//!
//! A relay request flows through four narrow capabilities, each behind a
//! trait so it can be swapped for a stub:
//!
//! - [`Transcriber`]: recorded clip to text (hosted HTTP or local whisper.cpp).
//! - [`AgentGateway`]: text query to a streamed agent reply, authorized by an
//!   injected [`AuthTokenProvider`].
//! - [`split`]: agent reply to structured prefix plus spoken text.
//! - [`SpeechSynthesizer`]: spoken text to WAV audio (piper or espeak-ng).
//!
//! [`ConversationPipeline`] sequences them and owns cancellation.

pub mod agent;
pub mod auth;
pub mod config;
pub mod events;
pub mod pipeline;
pub mod splitter;
pub mod stt;
pub mod tts;

pub use agent::{AgentGateway, FragmentSender, FragmentStream, HttpAgentGateway};
pub use auth::{build_token_provider, AuthTokenProvider, IamTokenProvider, StaticToken};
pub use config::{
    AgentConfig, SynthesisConfig, TranscriptionAuth, TranscriptionBackend, TranscriptionConfig,
};
pub use events::{classify_line, parse_line, EventLine, LineBuffer, EVENT_PREFIX, MAX_LINE_BYTES};
pub use pipeline::{ConversationPipeline, PipelineError, RelayOutput};
pub use splitter::split;
pub use stt::{build_transcriber, HttpTranscriber, Transcriber, WhisperCliTranscriber};
pub use tts::{pcm_to_wav, LocalSynthesizer, SpeechSynthesizer};
