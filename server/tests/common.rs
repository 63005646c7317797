//! Common utilities for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    routing::post,
    Router,
};
use llm_core::{LlmClient, LlmProvider};
use server::{build_router, config::ServerConfig, AppState};
use speech_core::{
    AudioBuffer, AudioPlayer, PlaybackEnd, PlaybackHandle, Segmenter, SpeechConfig,
    SpeechSynthesizer,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Synthesizer that records texts and returns a short silent buffer.
#[derive(Default)]
pub struct SilentSynthesizer {
    texts: Mutex<Vec<String>>,
}

impl SilentSynthesizer {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for SilentSynthesizer {
    fn synthesize(&self, text: &str, _speed: f32, _speaker_id: i64) -> anyhow::Result<AudioBuffer> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(AudioBuffer::new(vec![0.0; 160], 16_000))
    }
}

/// Playback that ends immediately.
pub struct InstantPlayer;

impl AudioPlayer for InstantPlayer {
    fn play(&self, _wav_path: &Path) -> anyhow::Result<PlaybackHandle> {
        Ok(PlaybackHandle::finished())
    }
}

/// Playback that lasts until `release_all`.
#[derive(Default)]
pub struct HeldPlayer {
    pending: Mutex<Vec<PlaybackEnd>>,
}

impl HeldPlayer {
    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn release_all(&self) {
        for end in self.pending.lock().unwrap().drain(..) {
            end.notify(Ok(()));
        }
    }
}

impl AudioPlayer for HeldPlayer {
    fn play(&self, _wav_path: &Path) -> anyhow::Result<PlaybackHandle> {
        let (end, handle) = PlaybackHandle::channel();
        self.pending.lock().unwrap().push(end);
        Ok(handle)
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub synth: Arc<SilentSynthesizer>,
    _audio_dir: TempDir,
}

/// Create a test app instance around fake engines
pub fn create_test_app(player: Arc<dyn AudioPlayer>, llm: Option<LlmClient>) -> TestApp {
    let audio_dir = tempfile::tempdir().unwrap();
    let speech_config = SpeechConfig {
        audio_dir: audio_dir.path().to_path_buf(),
        ..Default::default()
    };
    let synth = Arc::new(SilentSynthesizer::default());
    let segmenter = Segmenter::spawn(synth.clone(), player, &speech_config);

    let config = ServerConfig {
        request_timeout_secs: 10,
        llm_timeout_secs: 10,
        ..Default::default()
    };
    let voices = vec!["de_DE".to_string(), "en_US".to_string()];
    let state = AppState::new(segmenter, voices, llm, config);

    TestApp {
        router: build_router(state.clone()).unwrap(),
        state,
        synth,
        _audio_dir: audio_dir,
    }
}

pub fn ollama_line(content: &str, done: bool) -> String {
    serde_json::json!({
        "model": "test",
        "message": { "role": "assistant", "content": content },
        "done": done,
    })
    .to_string()
}

/// Local stand-in for an Ollama `/api/chat` endpoint.
pub async fn fake_ollama(tokens: &[&str]) -> LlmClient {
    let mut body: String = tokens
        .iter()
        .map(|t| ollama_line(t, false) + "\n")
        .collect();
    body.push_str(&ollama_line("", true));
    body.push('\n');

    let app = Router::new().route(
        "/api/chat",
        post(move || {
            let body = body.clone();
            async move { ([(header::CONTENT_TYPE, "application/x-ndjson")], body) }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    LlmClient::with_api_key(LlmProvider::Ollama, "test", None)
        .unwrap()
        .with_base_url(&format!("http://{addr}"))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send a request and decode the JSON body.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
