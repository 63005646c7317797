//! Piper-backed speech synthesis.
//!
//! Voices come from a JSON voice map (`models/map.json` by default). Two
//! layouts are accepted per language key:
//!
//! ```json
//! { "de_DE": "models/de_DE/thorsten.onnx.json",
//!   "en_US": { "config": "models/en_US/lessac.onnx.json", "default_speaker": 0 },
//!   "fr_FR": { "default_voice": "siwis",
//!              "voices": { "siwis": { "config": "models/fr_FR/siwis.onnx.json" } } } }
//! ```

use std::{collections::HashMap, fs, path::Path, sync::{Arc, RwLock}, time::Instant};

use anyhow::Context;
use dashmap::DashMap;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{AudioBuffer, SpeechSynthesizer};

const DEFAULT_MAX_CACHED_MODELS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub config: String,
    pub speaker_id: Option<i64>,
    pub display_name: Option<String>,
}

/// language -> (default voice id, voices)
#[derive(Debug, Clone, Default)]
pub struct VoiceMap {
    languages: HashMap<String, (String, HashMap<String, VoiceEntry>)>,
}

impl VoiceMap {
    pub fn from_file<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).with_context(|| "voice map is not valid JSON")?;
        let obj = json
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("voice map must be a JSON object"))?;

        let mut languages = HashMap::new();
        for (lang, v) in obj {
            let entry = match v {
                serde_json::Value::String(path) => single_voice(path.clone(), None),
                serde_json::Value::Object(o) if o.contains_key("voices") => {
                    let default_voice = o
                        .get("default_voice")
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'default_voice' for language {}", lang))?
                        .to_string();
                    let voices_obj = o
                        .get("voices")
                        .and_then(|x| x.as_object())
                        .ok_or_else(|| anyhow::anyhow!("missing 'voices' object for language {}", lang))?;

                    let mut voices = HashMap::new();
                    for (voice_id, voice) in voices_obj {
                        let config = voice
                            .get("config")
                            .and_then(|x| x.as_str())
                            .ok_or_else(|| anyhow::anyhow!("missing 'config' for voice {}", voice_id))?
                            .to_string();
                        voices.insert(
                            voice_id.clone(),
                            VoiceEntry {
                                config,
                                speaker_id: voice.get("speaker_id").and_then(|x| x.as_i64()),
                                display_name: voice
                                    .get("display_name")
                                    .and_then(|x| x.as_str())
                                    .map(|s| s.to_string()),
                            },
                        );
                    }
                    if !voices.contains_key(&default_voice) {
                        return Err(anyhow::anyhow!(
                            "default voice '{}' is not listed for language {}",
                            default_voice,
                            lang
                        ));
                    }
                    (default_voice, voices)
                }
                serde_json::Value::Object(o) => {
                    let config = o
                        .get("config")
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'config' for key {}", lang))?
                        .to_string();
                    single_voice(config, o.get("default_speaker").and_then(|x| x.as_i64()))
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "invalid entry for key {} (expected string or object)",
                        lang
                    ));
                }
            };
            languages.insert(lang.clone(), entry);
        }

        Ok(Self { languages })
    }

    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.languages.keys().cloned().collect();
        langs.sort();
        langs
    }

    /// Resolve the voice for a language, falling back to its default voice.
    pub fn voice_for(&self, lang: &str, voice: Option<&str>) -> anyhow::Result<&VoiceEntry> {
        let (default_voice, voices) = self
            .languages
            .get(lang)
            .ok_or_else(|| anyhow::anyhow!("Unknown language key: {lang}"))?;
        let voice_id = voice.unwrap_or(default_voice);
        voices.get(voice_id).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown voice '{}' for language '{}'. Available voices: {}",
                voice_id,
                lang,
                voices.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }
}

fn single_voice(config: String, speaker_id: Option<i64>) -> (String, HashMap<String, VoiceEntry>) {
    let mut voices = HashMap::new();
    voices.insert(
        "default".to_string(),
        VoiceEntry {
            config,
            speaker_id,
            display_name: None,
        },
    );
    ("default".to_string(), voices)
}

struct CachedSynth {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
    last_accessed: Instant,
}

pub struct PiperSynthesizer {
    voices: VoiceMap,
    language: String,
    voice: Option<String>,
    // config path -> loaded model
    cache: DashMap<String, CachedSynth>,
    max_cached_models: usize,
}

impl PiperSynthesizer {
    pub fn new(voices: VoiceMap, language: impl Into<String>) -> Self {
        Self {
            voices,
            language: language.into(),
            voice: None,
            cache: DashMap::new(),
            max_cached_models: DEFAULT_MAX_CACHED_MODELS,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn voices(&self) -> &VoiceMap {
        &self.voices
    }

    /// Load the configured voice ahead of the first segment.
    pub fn preload(&self) -> anyhow::Result<()> {
        let entry = self.voices.voice_for(&self.language, self.voice.as_deref())?;
        let (_, sample_rate) = self.get_or_create_synth(&entry.config)?;
        info!(language = %self.language, sample_rate, "piper voice loaded");
        Ok(())
    }

    /// Read sample rate from model config JSON
    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

        let sample_rate = json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

        Ok(sample_rate as u32)
    }

    fn get_or_create_synth(
        &self,
        cfg_path: &str,
    ) -> anyhow::Result<(Arc<RwLock<PiperSpeechSynthesizer>>, u32)> {
        if let Some(mut cached) = self.cache.get_mut(cfg_path) {
            cached.last_accessed = Instant::now();
            return Ok((cached.synth.clone(), cached.sample_rate));
        }

        let sample_rate = Self::read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(Path::new(cfg_path))
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = Arc::new(RwLock::new(PiperSpeechSynthesizer::new(model)?));

        if self.cache.len() >= self.max_cached_models {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.last_accessed)
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                debug!(config = %key, "evicting piper model");
                self.cache.remove(&key);
            }
        }

        self.cache.insert(
            cfg_path.to_string(),
            CachedSynth {
                synth: synth.clone(),
                sample_rate,
                last_accessed: Instant::now(),
            },
        );
        Ok((synth, sample_rate))
    }
}

impl SpeechSynthesizer for PiperSynthesizer {
    // piper-rs 0.1.9 exposes no speaker or rate selection on the parallel
    // synthesizer; the model defaults apply.
    fn synthesize(&self, text: &str, speed: f32, speaker_id: i64) -> anyhow::Result<AudioBuffer> {
        let entry = self.voices.voice_for(&self.language, self.voice.as_deref())?;
        let (synth_arc, sample_rate) = self.get_or_create_synth(&entry.config)?;
        let synth = synth_arc
            .read()
            .map_err(|_| anyhow::anyhow!("Synthesizer lock poisoned"))?;
        debug!(chars = text.len(), speed, speaker_id, "piper synthesis");

        let iter: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in iter {
            samples.extend(
                part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                    .into_vec(),
            );
        }
        Ok(AudioBuffer::new(samples, sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"{
        "de_DE": "models/de_DE/thorsten.onnx.json",
        "en_US": { "config": "models/en_US/lessac.onnx.json", "default_speaker": 3 },
        "fr_FR": {
            "default_voice": "siwis",
            "voices": {
                "siwis": { "config": "models/fr_FR/siwis.onnx.json", "display_name": "Siwis" },
                "tom": { "config": "models/fr_FR/tom.onnx.json", "speaker_id": 1 }
            }
        }
    }"#;

    #[test]
    fn test_voice_map_all_layouts() {
        let map = VoiceMap::from_json(MAP).unwrap();
        assert_eq!(map.languages(), vec!["de_DE", "en_US", "fr_FR"]);

        assert_eq!(map.voice_for("de_DE", None).unwrap().config, "models/de_DE/thorsten.onnx.json");
        assert_eq!(map.voice_for("en_US", None).unwrap().speaker_id, Some(3));
        assert_eq!(map.voice_for("fr_FR", None).unwrap().config, "models/fr_FR/siwis.onnx.json");
        assert_eq!(map.voice_for("fr_FR", Some("tom")).unwrap().speaker_id, Some(1));
    }

    #[test]
    fn test_unknown_language_and_voice() {
        let map = VoiceMap::from_json(MAP).unwrap();
        assert!(map.voice_for("it_IT", None).is_err());
        let err = map.voice_for("fr_FR", Some("nobody")).unwrap_err().to_string();
        assert!(err.contains("Available voices"));
    }

    #[test]
    fn test_invalid_maps() {
        assert!(VoiceMap::from_json("[]").is_err());
        assert!(VoiceMap::from_json(r#"{"en_US": 5}"#).is_err());
        assert!(VoiceMap::from_json(r#"{"en_US": {"voices": {}}}"#).is_err());
        assert!(VoiceMap::from_json(r#"{"en_US": {"default_voice": "a", "voices": {}}}"#).is_err());
    }

    #[test]
    fn test_missing_model_fails_synthesis() {
        let map = VoiceMap::from_json(MAP).unwrap();
        let synth = PiperSynthesizer::new(map, "de_DE");
        assert!(synth.synthesize("Hallo.", 1.0, 0).is_err());
    }

    #[test]
    fn test_selected_voice_must_exist() {
        let map = VoiceMap::from_json(MAP).unwrap();
        let synth = PiperSynthesizer::new(map, "fr_FR").with_voice("nobody");
        let err = synth.synthesize("Bonjour.", 1.0, 0).unwrap_err().to_string();
        assert!(err.contains("Unknown voice 'nobody'"));
        assert!(synth.preload().is_err());
    }
}
