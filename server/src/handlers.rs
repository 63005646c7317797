use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::{extract::State, Json};
use futures_util::StreamExt;
use llm_core::ConversationStore;
use serde::{Deserialize, Serialize};
use speech_core::{GenerationState, SpeechError};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::metrics::{EndpointMetricsResponse, MetricsResponse};
use crate::state::AppState;
use crate::validation::{validate_chat_request, validate_conversation_id, validate_speak_request};

#[derive(Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    /// Wait until the text has been spoken before answering
    #[serde(default)]
    pub wait: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SpeakResponse {
    pub run_id: u64,
    pub completed: bool,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_id: String,
    pub run_id: u64,
    pub completed: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub state: String,
    pub run_id: u64,
    pub is_playing: bool,
    pub backlog_len: usize,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.voices.as_ref().clone())
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let queue = state.segmenter.queue();
    Json(StatusResponse {
        state: state.segmenter.state().to_string(),
        run_id: state.segmenter.run_id(),
        is_playing: queue.is_playing(),
        backlog_len: queue.backlog_len(),
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        request_count: state.request_count.load(Ordering::Relaxed),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        playback: state.segmenter.queue().metrics().snapshot(),
        endpoints: EndpointMetricsResponse {
            speak: state.metrics.speak.stats(),
            chat: state.metrics.chat.stats(),
        },
    })
}

/// Speak `text` as one run.
pub async fn speak_endpoint(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<SpeakResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let start_time = Instant::now();

    let result = speak(&state, req).await;
    state.metrics.speak.record(start_time.elapsed(), result.is_ok());
    result.map(Json)
}

async fn speak(state: &AppState, req: SpeakRequest) -> Result<SpeakResponse, ApiError> {
    validate_speak_request(&req.text)?;
    let _producer = state.producer.try_lock().map_err(|_| ApiError::Busy)?;
    let segmenter = &state.segmenter;

    segmenter.add_text(&req.text)?;

    if req.wait {
        let run_id = tokio::time::timeout(state.config.request_timeout(), segmenter.end_and_wait())
            .await
            .map_err(|_| {
                ApiError::InternalError("Timed out waiting for playback to finish".to_string())
            })??;
        return Ok(SpeakResponse {
            run_id,
            completed: true,
        });
    }

    let outcome = segmenter.end();
    info!(run = outcome.run(), completed = outcome.is_completed(), "Speak request queued");
    Ok(SpeakResponse {
        run_id: outcome.run(),
        completed: outcome.is_completed(),
    })
}

/// Ask the language model and speak its reply while it streams in.
pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let start_time = Instant::now();

    let result = chat(&state, req).await;
    state.metrics.chat.record(start_time.elapsed(), result.is_ok());
    result.map(Json)
}

async fn chat(state: &AppState, req: ChatRequest) -> Result<ChatResponse, ApiError> {
    validate_chat_request(&req.message)?;
    if let Some(ref id) = req.conversation_id {
        validate_conversation_id(id)?;
    }
    let llm = state
        .llm
        .clone()
        .ok_or_else(|| ApiError::LlmError("No language model configured".to_string()))?;

    let _producer = state.producer.try_lock().map_err(|_| ApiError::Busy)?;
    let segmenter = &state.segmenter;
    // The previous run may still be draining
    let current = segmenter.state();
    if current != GenerationState::Active {
        return Err(SpeechError::InvalidState { state: current }.into());
    }

    let conversation_id = req
        .conversation_id
        .unwrap_or_else(ConversationStore::new_conversation_id);
    let messages = state.conversations.prompt_for(&conversation_id, &req.message);
    info!(
        "Chat request received: message length={}, conv_id={}",
        req.message.len(),
        conversation_id
    );

    let mut reply = String::new();
    let streamed = tokio::time::timeout(state.config.llm_timeout(), async {
        let mut tokens = llm.stream_chat(&messages);
        while let Some(token) = tokens.next().await {
            let token = token.map_err(|e| ApiError::LlmError(format!("{e:#}")))?;
            segmenter.add_text(&token)?;
            reply.push_str(&token);
        }
        Ok::<_, ApiError>(())
    })
    .await;

    // Whatever was produced still gets spoken to the end
    let outcome = segmenter.end();

    match streamed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            let timeout_secs = state.config.llm_timeout().as_secs();
            warn!(run = outcome.run(), "LLM stream timed out after {}s", timeout_secs);
            return Err(ApiError::LlmError(format!(
                "Request timed out after {} seconds",
                timeout_secs
            )));
        }
    }

    state
        .conversations
        .record_turn(&conversation_id, &req.message, &reply);
    info!(run = outcome.run(), reply_length = reply.len(), "LLM reply streamed");

    Ok(ChatResponse {
        reply,
        conversation_id,
        run_id: outcome.run(),
        completed: outcome.is_completed(),
    })
}
