//! Uploaded recordings and synthesized output.

use crate::error::IngestionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container formats accepted as input, detected from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Wav,
    Webm,
    Ogg,
    Mp3,
    Flac,
    Mp4,
}

impl AudioEncoding {
    /// Detects the container from the first bytes of a file.
    ///
    /// Returns `None` when no supported signature matches.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            Some(Self::Wav)
        } else if data.len() >= 4 && data[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
            Some(Self::Webm)
        } else if data.len() >= 4 && &data[..4] == b"OggS" {
            Some(Self::Ogg)
        } else if data.len() >= 4 && &data[..4] == b"fLaC" {
            Some(Self::Flac)
        } else if data.len() >= 12 && &data[4..8] == b"ftyp" {
            Some(Self::Mp4)
        } else if data.len() >= 3 && &data[..3] == b"ID3" {
            Some(Self::Mp3)
        } else if data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
            // MPEG audio frame sync
            Some(Self::Mp3)
        } else {
            None
        }
    }

    /// MIME type sent upstream with the clip.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
            Self::Ogg => "audio/ogg",
            Self::Mp3 => "audio/mpeg",
            Self::Flac => "audio/flac",
            Self::Mp4 => "audio/mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Ogg => "ogg",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Mp4 => "m4a",
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A recording uploaded by the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    name: String,
    timestamp: String,
}

impl AudioClip {
    /// Creates a clip, rejecting empty uploads.
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        name: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<Self, IngestionError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(IngestionError::EmptyAudio);
        }
        Ok(Self {
            bytes,
            name: name.into(),
            timestamp: timestamp.into(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// File name declared by the uploader.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client-supplied timestamp, kept verbatim.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn encoding(&self) -> Option<AudioEncoding> {
        AudioEncoding::detect(&self.bytes)
    }

    /// The declared name, or a generated one carrying the detected extension.
    ///
    /// Hosted transcription services pick the decoder from the file name.
    pub fn upload_name(&self) -> String {
        if !self.name.trim().is_empty() {
            return self.name.clone();
        }
        match self.encoding() {
            Some(encoding) => format!("recording.{}", encoding.extension()),
            None => "recording".to_string(),
        }
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("len", &self.bytes.len())
            .field("name", &self.name)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Output container of the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// RIFF/WAVE, 16-bit PCM.
    #[default]
    Wav,
}

impl AudioFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
        }
    }
}

/// Synthesized speech, ready to stream back to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

impl SynthesizedAudio {
    pub fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self { bytes, format }
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

impl fmt::Debug for SynthesizedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizedAudio")
            .field("len", &self.bytes.len())
            .field("format", &self.format)
            .finish()
    }
}
