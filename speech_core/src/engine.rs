//! Seams to the external engines.
//!
//! The playback queue only knows these traits. `PiperSynthesizer` and
//! `RodioPlayer` are the production implementations; tests plug in fakes.

use std::path::Path;

use tokio::sync::oneshot;

/// Mono PCM samples in [-1.0, 1.0].
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as f64 / self.sample_rate as f64 * 1000.0) as u64
    }
}

/// Text-to-samples engine. Called from a blocking thread.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, speed: f32, speaker_id: i64) -> anyhow::Result<AudioBuffer>;
}

/// Audio output. `play` returns once playback has started; the returned
/// handle resolves when it ends. Called from a blocking thread.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, wav_path: &Path) -> anyhow::Result<PlaybackHandle>;
}

/// Sending half of an end-of-playback notification.
#[derive(Debug)]
pub struct PlaybackEnd(oneshot::Sender<anyhow::Result<()>>);

impl PlaybackEnd {
    pub fn notify(self, result: anyhow::Result<()>) {
        // The queue may have given up on this playback already
        let _ = self.0.send(result);
    }
}

#[derive(Debug)]
pub struct PlaybackHandle {
    ended: oneshot::Receiver<anyhow::Result<()>>,
}

impl PlaybackHandle {
    pub fn channel() -> (PlaybackEnd, PlaybackHandle) {
        let (tx, rx) = oneshot::channel();
        (PlaybackEnd(tx), PlaybackHandle { ended: rx })
    }

    /// A handle for a playback that has already finished.
    pub fn finished() -> Self {
        let (end, handle) = Self::channel();
        end.notify(Ok(()));
        handle
    }

    pub async fn ended(self) -> anyhow::Result<()> {
        match self.ended.await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("playback ended without a notification")),
        }
    }
}
