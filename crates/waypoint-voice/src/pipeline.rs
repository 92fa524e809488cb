//! Request orchestration: clip in, synthesized answer out.
//!
//! Stages run strictly in sequence, since the spoken text is only known once
//! the full agent reply has been split. The first failing stage ends the
//! request and nothing after it runs.

use crate::agent::AgentGateway;
use crate::splitter::split;
use crate::stt::Transcriber;
use crate::tts::SpeechSynthesizer;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;
use waypoint_types::{
    AgentQuery, AgentStreamError, AudioClip, PipelineStage, SplitReply, SynthesisError,
    SynthesizedAudio, Transcript, TranscriptionError,
};

/// Why a relay request ended without audio.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Agent(#[from] AgentStreamError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("request cancelled while {stage}")]
    Cancelled { stage: PipelineStage },
}

impl PipelineError {
    /// The stage that was running when the request failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Transcription(_) => PipelineStage::Transcribing,
            Self::Agent(_) => PipelineStage::Querying,
            Self::Synthesis(_) => PipelineStage::Synthesizing,
            Self::Cancelled { stage } => *stage,
        }
    }
}

/// Everything a completed request produced.
#[derive(Debug, Clone)]
pub struct RelayOutput {
    pub transcript: Transcript,
    pub reply: SplitReply,
    pub audio: SynthesizedAudio,
}

/// Sequences transcription, agent query, splitting and synthesis.
///
/// Holds no per-request state; one instance serves every request.
#[derive(Clone)]
pub struct ConversationPipeline {
    transcriber: Arc<dyn Transcriber>,
    agent: Arc<dyn AgentGateway>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl ConversationPipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        agent: Arc<dyn AgentGateway>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            transcriber,
            agent,
            synthesizer,
        }
    }

    /// Runs one request to completion.
    ///
    /// Every stage is abandoned as soon as `cancel` fires.
    pub async fn run(
        &self,
        clip: AudioClip,
        cancel: CancellationToken,
    ) -> Result<RelayOutput, PipelineError> {
        let span = info_span!("relay", request_id = %Uuid::new_v4());
        async move {
            let mut progress = StageTracker::default();
            match self.execute(clip, &cancel, &mut progress).await {
                Ok(output) => {
                    progress.enter(PipelineStage::Completed);
                    Ok(output)
                }
                Err(e) => {
                    progress.enter(PipelineStage::Failed);
                    error!(stage = %e.stage(), error = %e, "relay request failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        clip: AudioClip,
        cancel: &CancellationToken,
        progress: &mut StageTracker,
    ) -> Result<RelayOutput, PipelineError> {
        info!(
            name = clip.name(),
            bytes = clip.len(),
            timestamp = clip.timestamp(),
            "received audio clip"
        );

        progress.enter(PipelineStage::Transcribing);
        let transcript = guarded(
            PipelineStage::Transcribing,
            cancel,
            self.transcriber.transcribe(&clip),
        )
        .await?;
        drop(clip);
        info!(text = %transcript.text, "transcription result");

        progress.enter(PipelineStage::Querying);
        let query = AgentQuery::from_transcript(&transcript);
        let reply = guarded(
            PipelineStage::Querying,
            cancel,
            self.agent.query(&query, cancel.child_token()),
        )
        .await?;

        progress.enter(PipelineStage::Splitting);
        let reply = split(reply.as_str());
        if let Some(prefix) = &reply.structured_prefix {
            debug!(len = prefix.len(), "agent reply carried a structured prefix");
        }
        info!(spoken = %reply.spoken, "spoken text");

        progress.enter(PipelineStage::Synthesizing);
        let audio = guarded(
            PipelineStage::Synthesizing,
            cancel,
            self.synthesizer.synthesize(&reply.spoken),
        )
        .await?;

        progress.enter(PipelineStage::Responding);
        Ok(RelayOutput {
            transcript,
            reply,
            audio,
        })
    }
}

/// Runs a stage future unless the request is cancelled first.
async fn guarded<T, E, F>(
    stage: PipelineStage,
    cancel: &CancellationToken,
    stage_future: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
        result = stage_future => result.map_err(PipelineError::from),
    }
}

/// Current position in the request lifecycle.
#[derive(Debug)]
struct StageTracker {
    current: PipelineStage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: PipelineStage::Received,
        }
    }
}

impl StageTracker {
    fn enter(&mut self, next: PipelineStage) {
        debug_assert!(
            !self.current.is_terminal(),
            "no transitions out of {}",
            self.current
        );
        debug!(from = %self.current, to = %next, "pipeline stage");
        self.current = next;
    }
}
