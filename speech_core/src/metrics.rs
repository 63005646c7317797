// Playback pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::error::SpeechError;

const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Default)]
pub struct PlaybackMetrics {
    segments_enqueued: AtomicU64,
    segments_played: AtomicU64,
    segments_skipped: AtomicU64,
    synthesis_failures: AtomicU64,
    playback_failures: AtomicU64,
    runs_completed: AtomicU64,
    // Synthesis latency, last `MAX_LATENCY_SAMPLES` segments
    synthesis_latency_ms: Mutex<Vec<u64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub segments_enqueued: u64,
    pub segments_played: u64,
    pub segments_skipped: u64,
    pub synthesis_failures: u64,
    pub playback_failures: u64,
    pub runs_completed: u64,
    pub synthesis_p50_ms: u64,
    pub synthesis_p95_ms: u64,
}

impl PlaybackMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.segments_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_played(&self) {
        self.segments_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.segments_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &SpeechError) {
        match error {
            SpeechError::Synthesis(_) => {
                self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
            }
            // Artifact errors happen between synthesis and the speaker
            SpeechError::Playback(_) | SpeechError::Artifact(_) => {
                self.playback_failures.fetch_add(1, Ordering::Relaxed);
            }
            SpeechError::InvalidState { .. } | SpeechError::LifecycleViolation(_) => {}
        }
    }

    pub fn record_synthesis(&self, latency: Duration) {
        if let Ok(mut samples) = self.synthesis_latency_ms.lock() {
            samples.push(latency.as_millis() as u64);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn segments_played(&self) -> u64 {
        self.segments_played.load(Ordering::Relaxed)
    }

    pub fn synthesis_failures(&self) -> u64 {
        self.synthesis_failures.load(Ordering::Relaxed)
    }

    pub fn playback_failures(&self) -> u64 {
        self.playback_failures.load(Ordering::Relaxed)
    }

    fn percentile(&self, p: u8) -> u64 {
        if let Ok(samples) = self.synthesis_latency_ms.lock() {
            if samples.is_empty() {
                return 0;
            }
            let mut sorted = samples.clone();
            sorted.sort_unstable();
            let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
            sorted[index]
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_enqueued: self.segments_enqueued.load(Ordering::Relaxed),
            segments_played: self.segments_played.load(Ordering::Relaxed),
            segments_skipped: self.segments_skipped.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            playback_failures: self.playback_failures.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            synthesis_p50_ms: self.percentile(50),
            synthesis_p95_ms: self.percentile(95),
        }
    }
}
