use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use waypoint_server::{app, AppState};
use waypoint_types::{
    AgentQuery, AgentStreamError, AudioClip, AudioFormat, StreamFragment, SynthesisError,
    SynthesizedAudio, Transcript, TranscriptionError,
};
use waypoint_voice::{
    AgentGateway, ConversationPipeline, FragmentStream, SpeechSynthesizer, Transcriber,
};

const BOUNDARY: &str = "waypoint-test-boundary";

/// A minimal RIFF/WAVE header followed by four samples.
const WAV_CLIP: &[u8] = b"RIFF\x2c\x00\x00\x00WAVEfmt \x10\x00\x00\x00\x01\x00\x01\x00\x22\x56\x00\x00\x44\xac\x00\x00\x02\x00\x10\x00data\x08\x00\x00\x00\x01\x00\x02\x00\x03\x00\x04\x00";

struct StubTranscriber {
    fail: bool,
    seen: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl Transcriber for StubTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, TranscriptionError> {
        self.seen.lock().unwrap().push((
            clip.name().to_string(),
            clip.timestamp().to_string(),
            clip.len(),
        ));
        if self.fail {
            return Err(TranscriptionError::Status {
                status: 502,
                body: "upstream speech outage".to_string(),
            });
        }
        Ok(Transcript::new("Find a coffee shop"))
    }
}

#[derive(Default)]
struct StubAgent {
    calls: AtomicUsize,
}

#[async_trait]
impl AgentGateway for StubAgent {
    async fn open_stream(
        &self,
        _query: &AgentQuery,
        _cancel: CancellationToken,
    ) -> Result<FragmentStream, AgentStreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FragmentStream::from_items(
            ["[{\"route\":1}] ", "Turn left in 200 meters"]
                .into_iter()
                .map(|content| Ok(StreamFragment::new(content))),
        ))
    }
}

/// Returns the spoken text itself as the "audio" so tests can see it.
#[derive(Default)]
struct EchoSynthesizer {
    calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SynthesizedAudio::new(text.as_bytes().to_vec(), AudioFormat::Wav))
    }
}

struct Harness {
    transcriber: Arc<StubTranscriber>,
    agent: Arc<StubAgent>,
    synthesizer: Arc<EchoSynthesizer>,
    router: axum::Router,
}

fn harness(transcription_fails: bool) -> Harness {
    let transcriber = Arc::new(StubTranscriber {
        fail: transcription_fails,
        seen: Mutex::new(Vec::new()),
    });
    let agent = Arc::new(StubAgent::default());
    let synthesizer = Arc::new(EchoSynthesizer::default());
    let pipeline =
        ConversationPipeline::new(transcriber.clone(), agent.clone(), synthesizer.clone());
    let router = app(AppState {
        pipeline,
        max_upload_bytes: 1024,
    });
    Harness {
        transcriber,
        agent,
        synthesizer,
        router,
    }
}

enum Part<'a> {
    File(&'a str, &'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/wav\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/transcribe-audio")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn relays_upload_to_spoken_audio() {
    let h = harness(false);
    let response = h
        .router
        .oneshot(upload(&[
            Part::File("audio", "question.wav", WAV_CLIP),
            Part::Text("timestamp", "2024-05-01T10:00:00Z"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/wav"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Turn left in 200 meters");

    let seen = h.transcriber.seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![(
            "question.wav".to_string(),
            "2024-05-01T10:00:00Z".to_string(),
            WAV_CLIP.len()
        )]
    );
    assert_eq!(h.agent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_parts_are_ignored() {
    let h = harness(false);
    let response = h
        .router
        .oneshot(upload(&[
            Part::Text("client", "web"),
            Part::File("audio", "question.wav", WAV_CLIP),
            Part::Text("timestamp", "2024-05-01T10:00:00Z"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_audio_is_bad_request() {
    let h = harness(false);
    let response = h
        .router
        .oneshot(upload(&[Part::Text("timestamp", "2024-05-01T10:00:00Z")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "missing form field: audio");
    assert!(h.transcriber.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_timestamp_is_bad_request() {
    let h = harness(false);
    let response = h
        .router
        .oneshot(upload(&[Part::File("audio", "question.wav", WAV_CLIP)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "missing form field: timestamp");
}

#[tokio::test]
async fn empty_audio_is_bad_request() {
    let h = harness(false);
    let response = h
        .router
        .oneshot(upload(&[
            Part::File("audio", "question.wav", b""),
            Part::Text("timestamp", "2024-05-01T10:00:00Z"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "uploaded audio is empty");
}

#[tokio::test]
async fn oversized_audio_is_bad_request() {
    let h = harness(false);
    let big = vec![0u8; 2048];
    let response = h
        .router
        .oneshot(upload(&[
            Part::File("audio", "question.wav", &big),
            Part::Text("timestamp", "2024-05-01T10:00:00Z"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.transcriber.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transcription_failure_is_internal_error_without_agent_call() {
    let h = harness(true);
    let response = h
        .router
        .oneshot(upload(&[
            Part::File("audio", "question.wav", WAV_CLIP),
            Part::Text("timestamp", "2024-05-01T10:00:00Z"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("upstream speech outage"), "{}", message);
    assert_eq!(h.agent.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn health_reports_version() {
    let h = harness(false);
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}
