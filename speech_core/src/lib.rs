//! Speak a language-model response while it is still being generated.
//!
//! Producer text goes through a [`Segmenter`], which cuts speakable
//! segments and hands them to the [`PlaybackQueue`]. The queue synthesizes
//! and plays one segment at a time, strictly in dispatch order, and tells
//! the segmenter when playback drains so it can announce completion of the
//! run.

mod config;
mod engine;
mod error;
mod metrics;
mod piper;
mod player;
mod playback;
mod segmenter;
pub mod text;
pub mod wav;

pub use config::{SpeechConfig, DEFAULT_RESPONSE_END_MARKER, DEFAULT_SENTENCE_ENDERS};
pub use engine::{AudioBuffer, AudioPlayer, PlaybackEnd, PlaybackHandle, SpeechSynthesizer};
pub use error::SpeechError;
pub use metrics::{MetricsSnapshot, PlaybackMetrics};
pub use piper::{PiperSynthesizer, VoiceEntry, VoiceMap};
pub use player::RodioPlayer;
pub use playback::{PlaybackFinished, PlaybackQueue};
pub use segmenter::{EndOutcome, GenerationState, Segmenter, SpeechEvent};
