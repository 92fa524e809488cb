//! Text-to-speech through local engines.
//!
//! Piper emits raw PCM and espeak-ng a streamed WAV; both are normalized into
//! a WAV container with `hound`. Text always reaches the engine on stdin, never
//! on the command line.

use crate::config::SynthesisConfig;
use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use waypoint_types::{AudioFormat, SynthesisError, SynthesizedAudio, VoiceEngine, VoiceProfile};

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for TTS process execution.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Sample rate of `espeak-ng --stdout`.
const ESPEAK_SAMPLE_RATE: u32 = 22_050;

/// Size of the canonical RIFF/WAVE header espeak-ng writes.
const WAV_HEADER_LEN: usize = 44;

/// Converts spoken text to audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text`. Empty text yields a valid, silent clip.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError>;
}

/// Wraps raw s16le mono PCM in a WAV container.
///
/// A trailing odd byte is dropped.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, SynthesisError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SynthesisError::Encoding(e.to_string()))?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| SynthesisError::Encoding(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| SynthesisError::Encoding(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Synthesizer backed by a local TTS engine.
#[derive(Debug, Clone)]
pub struct LocalSynthesizer {
    voice: VoiceProfile,
    voices_dir: PathBuf,
    piper_binary: PathBuf,
    espeak_binary: PathBuf,
}

impl LocalSynthesizer {
    /// Creates a new `LocalSynthesizer` with the given voices directory, piper
    /// binary path and voice.
    pub fn new(
        voices_dir: impl AsRef<Path>,
        piper_binary: impl AsRef<Path>,
        voice: VoiceProfile,
    ) -> Self {
        Self {
            voice,
            voices_dir: voices_dir.as_ref().to_path_buf(),
            piper_binary: piper_binary.as_ref().to_path_buf(),
            espeak_binary: PathBuf::from("espeak-ng"),
        }
    }

    /// Overrides the binary used by the `system` engine.
    pub fn with_espeak_binary(mut self, espeak_binary: impl AsRef<Path>) -> Self {
        self.espeak_binary = espeak_binary.as_ref().to_path_buf();
        self
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(&config.voices_dir, &config.piper_binary, config.voice.clone())
            .with_espeak_binary(&config.espeak_binary)
    }

    pub fn voice(&self) -> &VoiceProfile {
        &self.voice
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.voices_dir.join(path)
        }
    }

    /// Runs piper and returns its raw PCM output (s16le at the voice's rate).
    async fn synthesize_piper(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let model_path = self.resolve(&self.voice.model_path);
        if !model_path.exists() {
            return Err(SynthesisError::Config(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(model_path)
            .arg("--output_raw")
            // Length scale is inverse of speed: speed 2.0 gives length_scale 0.5.
            .arg("--length_scale")
            .arg((1.0 / self.voice.speed).to_string());

        if let Some(config) = &self.voice.config_path {
            command.arg("--config").arg(self.resolve(config));
        }

        if let Some(speaker) = self.voice.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }

        run_engine(command, "piper", text).await
    }

    /// Runs `espeak-ng` and returns raw PCM with the WAV header stripped.
    async fn synthesize_system(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let mut command = Command::new(&self.espeak_binary);
        command.arg("--stdout").arg("--stdin");

        let wav_data = run_engine(command, "espeak-ng", text).await?;

        // espeak-ng streams its WAV with placeholder chunk sizes; keep only the
        // samples and re-wrap them.
        if wav_data.len() > WAV_HEADER_LEN {
            Ok(wav_data[WAV_HEADER_LEN..].to_vec())
        } else {
            Ok(Vec::new())
        }
    }
}

/// Spawns an engine, feeds `text` on stdin and returns its stdout.
async fn run_engine(
    mut command: Command,
    engine: &str,
    text: &str,
) -> Result<Vec<u8>, SynthesisError> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| SynthesisError::Process(format!("Failed to spawn {}: {}", engine, e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| SynthesisError::Process("Failed to open stdin".to_string()))?;
    let text_owned = text.to_string();

    // Spawn a task to write to stdin to avoid deadlock if output buffer fills up
    let write_task = tokio::spawn(async move {
        let result = stdin.write_all(text_owned.as_bytes()).await;
        drop(stdin);
        result
    });

    let output = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| SynthesisError::Timeout(TTS_TIMEOUT.as_secs()))?
        .map_err(|e| SynthesisError::Process(format!("Failed to wait for {}: {}", engine, e)))?;

    match write_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(SynthesisError::Process(format!(
                "Failed to write to {} stdin: {}",
                engine, e
            )))
        }
        Err(e) => return Err(SynthesisError::Process(format!("Stdin task failed: {}", e))),
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SynthesisError::Process(format!(
            "{} failed: {}",
            engine,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

#[async_trait]
impl SpeechSynthesizer for LocalSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let sample_rate = match self.voice.engine {
            VoiceEngine::Piper => self.voice.sample_rate,
            VoiceEngine::System => ESPEAK_SAMPLE_RATE,
        };
        if sample_rate == 0 {
            return Err(SynthesisError::Config(
                "sample_rate must be greater than zero".to_string(),
            ));
        }

        if text.trim().is_empty() {
            debug!("nothing to speak, returning silent clip");
            return Ok(SynthesizedAudio::new(
                pcm_to_wav(&[], sample_rate)?,
                AudioFormat::Wav,
            ));
        }

        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(SynthesisError::InvalidInput(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        if !(0.1..=10.0).contains(&self.voice.speed) {
            return Err(SynthesisError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }

        let pcm = match self.voice.engine {
            VoiceEngine::Piper => self.synthesize_piper(text).await?,
            VoiceEngine::System => self.synthesize_system(text).await?,
        };

        let wav = pcm_to_wav(&pcm, sample_rate)?;
        info!(
            chars = text.len(),
            bytes = wav.len(),
            engine = ?self.voice.engine,
            "speech synthesized"
        );
        Ok(SynthesizedAudio::new(wav, AudioFormat::Wav))
    }
}
