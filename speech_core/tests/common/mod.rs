//! Fake engines for pipeline tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use speech_core::{
    AudioBuffer, AudioPlayer, PlaybackEnd, PlaybackHandle, Segmenter, SpeechConfig,
    SpeechSynthesizer,
};

/// Records every text it is asked to speak. Fails for texts containing
/// `fail_on`.
#[derive(Default)]
pub struct RecordingSynthesizer {
    texts: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(pattern: &str) -> Arc<Self> {
        Arc::new(Self {
            texts: Mutex::new(Vec::new()),
            fail_on: Some(pattern.to_string()),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for RecordingSynthesizer {
    fn synthesize(&self, text: &str, _speed: f32, _speaker_id: i64) -> anyhow::Result<AudioBuffer> {
        self.texts.lock().unwrap().push(text.to_string());
        if let Some(pattern) = &self.fail_on {
            if text.contains(pattern.as_str()) {
                anyhow::bail!("synthesis refused for {text:?}");
            }
        }
        Ok(AudioBuffer::new(vec![0.1; 160], 16_000))
    }
}

/// Playback that ends as soon as it starts.
#[derive(Default)]
pub struct InstantPlayer {
    played: Mutex<Vec<(PathBuf, bool)>>,
    fail: bool,
}

impl InstantPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    /// Paths played, with whether the artifact existed during playback.
    pub fn played(&self) -> Vec<(PathBuf, bool)> {
        self.played.lock().unwrap().clone()
    }
}

impl AudioPlayer for InstantPlayer {
    fn play(&self, wav_path: &Path) -> anyhow::Result<PlaybackHandle> {
        if self.fail {
            anyhow::bail!("no audio device");
        }
        self.played
            .lock()
            .unwrap()
            .push((wav_path.to_path_buf(), wav_path.exists()));
        Ok(PlaybackHandle::finished())
    }
}

/// Playback that runs until the test calls `finish_next`.
#[derive(Default)]
pub struct ManualPlayer {
    pending: Mutex<VecDeque<PlaybackEnd>>,
    started: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl ManualPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn finish_next(&self) -> bool {
        match self.pending.lock().unwrap().pop_front() {
            Some(end) => {
                end.notify(Ok(()));
                true
            }
            None => false,
        }
    }

    pub fn fail_next(&self) -> bool {
        match self.pending.lock().unwrap().pop_front() {
            Some(end) => {
                end.notify(Err(anyhow::anyhow!("device unplugged")));
                true
            }
            None => false,
        }
    }
}

impl AudioPlayer for ManualPlayer {
    fn play(&self, _wav_path: &Path) -> anyhow::Result<PlaybackHandle> {
        let (end, handle) = PlaybackHandle::channel();
        let mut pending = self.pending.lock().unwrap();
        pending.push_back(end);
        self.max_concurrent.fetch_max(pending.len(), Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}

pub fn test_config(audio_dir: &Path) -> SpeechConfig {
    SpeechConfig {
        audio_dir: audio_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn pipeline(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    audio_dir: &Path,
) -> Segmenter {
    Segmenter::spawn(synthesizer, player, &test_config(audio_dir))
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(5);
