use thiserror::Error;

use crate::segmenter::GenerationState;

/// Errors raised by the speech pipeline.
///
/// Only `InvalidState` ever reaches a producer. Engine failures are absorbed
/// by the playback queue, logged and counted, and the segment is treated as
/// spoken.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("text receival is forbidden in state {state}")]
    InvalidState { state: GenerationState },

    #[error("lifecycle violation: {0}")]
    LifecycleViolation(String),

    #[error("synthesis failed: {0}")]
    Synthesis(anyhow::Error),

    #[error("playback failed: {0}")]
    Playback(anyhow::Error),

    #[error("audio artifact error: {0}")]
    Artifact(anyhow::Error),
}

impl SpeechError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SpeechError::InvalidState { .. } => "invalid_state",
            SpeechError::LifecycleViolation(_) => "lifecycle_violation",
            SpeechError::Synthesis(_) => "synthesis",
            SpeechError::Playback(_) => "playback",
            SpeechError::Artifact(_) => "artifact",
        }
    }
}
