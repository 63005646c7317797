// Configuration for the speech pipeline

use std::path::PathBuf;

pub const DEFAULT_SENTENCE_ENDERS: &[char] = &['.', ',', '!', '?'];
pub const DEFAULT_RESPONSE_END_MARKER: char = '#';

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Characters that close a speakable segment.
    pub sentence_enders: Vec<char>,
    /// Marker after which the producer's text is never spoken.
    pub response_end_marker: char,
    pub speed: f32,
    pub speaker_id: i64,
    /// Voice map key used by the Piper synthesizer.
    pub language: String,
    /// Voice within `language`; `None` picks the language's default voice.
    pub voice: Option<String>,
    pub volume: f32,
    /// Directory for the per-segment WAV artifacts.
    pub audio_dir: PathBuf,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            sentence_enders: DEFAULT_SENTENCE_ENDERS.to_vec(),
            response_end_marker: DEFAULT_RESPONSE_END_MARKER,
            speed: 1.0,
            speaker_id: 0,
            language: "en_US".to_string(),
            voice: None,
            volume: 1.0,
            audio_dir: std::env::temp_dir(),
        }
    }
}

impl SpeechConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sentence_enders = std::env::var("SPEECH_SENTENCE_ENDERS")
            .ok()
            .map(|v| v.chars().filter(|c| !c.is_whitespace()).collect::<Vec<_>>())
            .filter(|enders| !enders.is_empty())
            .unwrap_or(defaults.sentence_enders);

        let response_end_marker = std::env::var("SPEECH_RESPONSE_END_MARKER")
            .ok()
            .and_then(|v| v.trim().chars().next())
            .unwrap_or(defaults.response_end_marker);

        let speed = std::env::var("SPEECH_SPEED")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .filter(|s| *s > 0.0)
            .unwrap_or(defaults.speed);

        let speaker_id = std::env::var("SPEECH_SPEAKER_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.speaker_id);

        let language = std::env::var("SPEECH_LANGUAGE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.language);

        let voice = std::env::var("SPEECH_VOICE")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let volume = std::env::var("SPEECH_VOLUME")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .map(|v| v.clamp(0.0, 2.0))
            .unwrap_or(defaults.volume);

        let audio_dir = std::env::var("SPEECH_AUDIO_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.audio_dir);

        Self {
            sentence_enders,
            response_end_marker,
            speed,
            speaker_id,
            language,
            voice,
            volume,
            audio_dir,
        }
    }

    /// A marker that is also a sentence ender would make every sentence the
    /// last one, so it is dropped from the ender set.
    pub fn effective_enders(&self) -> Vec<char> {
        self.sentence_enders
            .iter()
            .copied()
            .filter(|c| *c != self.response_end_marker)
            .collect()
    }
}
