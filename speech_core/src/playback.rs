//! Serialized synthesis and playback of dispatched segments.
//!
//! `PlaybackQueue` owns the FIFO backlog and the activity flag. Both live
//! behind one mutex so that "is anything active?" plus the dequeue is a
//! single atomic step with respect to concurrent `enqueue` calls. The audio
//! work itself runs on a single worker task outside that lock: a segment
//! reaches the worker either from `enqueue` (when the queue was idle) or from
//! the worker's own continuation after the previous playback ended.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SpeechConfig;
use crate::engine::{AudioPlayer, SpeechSynthesizer};
use crate::error::SpeechError;
use crate::metrics::PlaybackMetrics;
use crate::text::strip_control_tags;
use crate::wav;

/// Emitted after every segment, played or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackFinished {
    /// Nothing is queued and nothing is about to play.
    pub backlog_empty: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    backlog: VecDeque<String>,
    active: bool,
}

#[derive(Debug, Default)]
struct QueueShared {
    state: Mutex<QueueState>,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try-acquire-and-dequeue. A fresh attempt may start only when nothing
    /// is active; a continuation (previous playback just ended) keeps the
    /// flag while the backlog has work and clears it otherwise.
    fn attempt_start(&self, from_continuation: bool) -> Option<String> {
        let mut state = self.lock();
        let permitted = !state.active || (from_continuation && !state.backlog.is_empty());
        if !permitted {
            if from_continuation {
                state.active = false;
            }
            return None;
        }

        match state.backlog.pop_front() {
            Some(segment) => {
                state.active = true;
                Some(segment)
            }
            None => {
                state.active = false;
                None
            }
        }
    }
}

pub struct PlaybackQueue {
    shared: Arc<QueueShared>,
    jobs: mpsc::UnboundedSender<String>,
    finished: mpsc::UnboundedSender<PlaybackFinished>,
    metrics: Arc<PlaybackMetrics>,
}

impl PlaybackQueue {
    /// Spawn the playback worker and return the queue together with the
    /// stream of `PlaybackFinished` notifications.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
        config: &SpeechConfig,
        metrics: Arc<PlaybackMetrics>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PlaybackFinished>) {
        let shared = Arc::new(QueueShared::default());
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            shared: Arc::clone(&shared),
            synthesizer,
            player,
            speed: config.speed,
            speaker_id: config.speaker_id,
            audio_dir: config.audio_dir.clone(),
            finished: finished_tx.clone(),
            metrics: Arc::clone(&metrics),
        };
        tokio::spawn(worker.run(jobs_rx));

        let queue = Arc::new(Self {
            shared,
            jobs: jobs_tx,
            finished: finished_tx,
            metrics,
        });
        (queue, finished_rx)
    }

    /// A queue whose worker has already stopped.
    #[cfg(test)]
    pub(crate) fn detached() -> (Arc<Self>, mpsc::UnboundedReceiver<PlaybackFinished>) {
        let (jobs, _) = mpsc::unbounded_channel();
        let (finished, finished_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            shared: Arc::new(QueueShared::default()),
            jobs,
            finished,
            metrics: Arc::new(PlaybackMetrics::new()),
        });
        (queue, finished_rx)
    }

    /// Append a segment and start playback if idle. Never waits on audio.
    pub fn enqueue(&self, segment: String) {
        self.metrics.record_enqueued();
        self.shared.lock().backlog.push_back(segment);
        self.attempt_start(false);
    }

    fn attempt_start(&self, from_continuation: bool) {
        let Some(segment) = self.shared.attempt_start(from_continuation) else {
            return;
        };
        if self.jobs.send(segment).is_ok() {
            return;
        }

        // Nothing will ever play the backlog; drop it and settle the queue
        // so a pending run still completes.
        let dropped = {
            let mut state = self.shared.lock();
            state.active = false;
            let queued = state.backlog.len();
            state.backlog.clear();
            queued + 1
        };
        warn!(dropped, "playback worker is gone, dropping segments");
        let error = SpeechError::Playback(anyhow::anyhow!("playback worker is gone"));
        for _ in 0..dropped {
            self.metrics.record_failure(&error);
        }
        let _ = self.finished.send(PlaybackFinished { backlog_empty: true });
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().active
    }

    /// Not playing and nothing queued.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        !state.active && state.backlog.is_empty()
    }

    pub fn backlog_len(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    pub fn metrics(&self) -> &Arc<PlaybackMetrics> {
        &self.metrics
    }
}

struct Worker {
    shared: Arc<QueueShared>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    speed: f32,
    speaker_id: i64,
    audio_dir: PathBuf,
    finished: mpsc::UnboundedSender<PlaybackFinished>,
    metrics: Arc<PlaybackMetrics>,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<String>) {
        while let Some(first) = jobs.recv().await {
            let mut next = Some(first);
            while let Some(segment) = next {
                self.speak(segment).await;

                // Flag update happens before the notification so listeners
                // observe a settled queue.
                next = self.shared.attempt_start(true);
                let _ = self.finished.send(PlaybackFinished {
                    backlog_empty: next.is_none(),
                });
            }
        }
        debug!("playback worker stopped");
    }

    async fn speak(&self, segment: String) {
        match self.try_speak(&segment).await {
            Ok(true) => self.metrics.record_played(),
            Ok(false) => {
                debug!(segment = %segment, "nothing to speak in segment");
                self.metrics.record_skipped();
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, segment = %segment, "segment consumed without audio");
                self.metrics.record_failure(&e);
            }
        }
    }

    /// Ok(false) when there was nothing audible to play.
    async fn try_speak(&self, segment: &str) -> Result<bool, SpeechError> {
        let text = strip_control_tags(segment).trim().to_string();
        if text.is_empty() {
            return Ok(false);
        }

        let synthesizer = Arc::clone(&self.synthesizer);
        let (speed, speaker_id) = (self.speed, self.speaker_id);
        let started = Instant::now();
        let audio = tokio::task::spawn_blocking(move || synthesizer.synthesize(&text, speed, speaker_id))
            .await
            .map_err(|e| SpeechError::Synthesis(anyhow::anyhow!("Task join error: {e}")))?
            .map_err(SpeechError::Synthesis)?;
        self.metrics.record_synthesis(started.elapsed());

        if audio.is_empty() {
            return Ok(false);
        }
        debug!(duration_ms = audio.duration_ms(), "segment synthesized");

        // Kept alive until playback ends; dropping it deletes the file
        let artifact = wav::write_temp_wav(&self.audio_dir, &audio).map_err(SpeechError::Artifact)?;
        let path = artifact.path().to_path_buf();

        let player = Arc::clone(&self.player);
        let handle = tokio::task::spawn_blocking(move || player.play(&path))
            .await
            .map_err(|e| SpeechError::Playback(anyhow::anyhow!("Task join error: {e}")))?
            .map_err(SpeechError::Playback)?;

        let ended = handle.ended().await.map_err(SpeechError::Playback);
        drop(artifact);
        ended.map(|_| true)
    }
}
