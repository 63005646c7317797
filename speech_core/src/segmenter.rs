//! Streaming segmentation of producer text and run completion tracking.
//!
//! A run starts `Active`, moves to `PendingCompletion` when the producer
//! ends while audio is still queued or playing, and passes through
//! `Completed` straight back to a fresh `Active` run. `Completed` is
//! announced exactly once per run on the event channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SpeechConfig;
use crate::engine::{AudioPlayer, SpeechSynthesizer};
use crate::error::SpeechError;
use crate::metrics::PlaybackMetrics;
use crate::playback::{PlaybackFinished, PlaybackQueue};
use crate::text::{last_boundary, strip_role_prefix};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Active,
    PendingCompletion,
    Completed,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Active => "active",
            GenerationState::PendingCompletion => "pending_completion",
            GenerationState::Completed => "completed",
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    SegmentDispatched { run: u64, text: String },
    Completed { run: u64 },
}

/// What `Segmenter::end` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// Nothing left to speak; `Completed` already fired.
    Completed { run: u64 },
    /// Audio is still queued or playing; `Completed` follows the drain.
    Pending { run: u64 },
}

impl EndOutcome {
    pub fn run(&self) -> u64 {
        match *self {
            EndOutcome::Completed { run } | EndOutcome::Pending { run } => run,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, EndOutcome::Completed { .. })
    }
}

/// Buffer of not-yet-dispatched text for one run.
#[derive(Debug)]
pub(crate) struct PendingText {
    buffer: String,
    response_ended: bool,
    first_dispatch: bool,
    enders: Vec<char>,
    marker: char,
}

impl PendingText {
    pub(crate) fn new(enders: Vec<char>, marker: char) -> Self {
        Self {
            buffer: String::new(),
            response_ended: false,
            first_dispatch: true,
            enders,
            marker,
        }
    }

    /// Feed one increment; returns the segment to dispatch, if any.
    pub(crate) fn push(&mut self, increment: &str) -> Option<String> {
        if increment.is_empty() || self.response_ended {
            return None;
        }

        let increment = match increment.find(self.marker) {
            Some(pos) => {
                self.response_ended = true;
                &increment[..pos]
            }
            None => increment,
        };
        self.buffer.push_str(increment);

        // After the marker the whole buffer is final; the marker itself
        // was cut off above.
        let cut = if self.response_ended {
            self.buffer.len()
        } else {
            last_boundary(&self.buffer, &self.enders)?
        };

        let rest = self.buffer.split_off(cut);
        let segment = std::mem::replace(&mut self.buffer, rest);
        self.take_segment(segment)
    }

    /// Everything still buffered, as a final segment.
    pub(crate) fn flush(&mut self) -> Option<String> {
        let segment = std::mem::take(&mut self.buffer);
        self.take_segment(segment)
    }

    fn take_segment(&mut self, segment: String) -> Option<String> {
        if segment.is_empty() {
            return None;
        }
        let segment = if self.first_dispatch {
            self.first_dispatch = false;
            strip_role_prefix(&segment).to_string()
        } else {
            segment
        };
        (!segment.is_empty()).then_some(segment)
    }

    pub(crate) fn buffered(&self) -> &str {
        &self.buffer
    }
}

#[derive(Debug)]
struct Run {
    id: u64,
    state: GenerationState,
    pending: PendingText,
}

struct Shared {
    run: Mutex<Run>,
    // Highest run id that fired `Completed`; written under the run lock
    completed_through: AtomicU64,
    queue: Arc<PlaybackQueue>,
    events: broadcast::Sender<SpeechEvent>,
    enders: Vec<char>,
    marker: char,
}

impl Shared {
    // Lock order: run, then the playback queue's state.
    fn lock_run(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, run: &Run, segment: String) {
        debug!(run = run.id, segment = %segment, "dispatching segment");
        self.queue.enqueue(segment.clone());
        let _ = self.events.send(SpeechEvent::SegmentDispatched {
            run: run.id,
            text: segment,
        });
    }

    /// Fire `Completed` for run `id` and start the next one. `id` must be
    /// the current run and must not have completed before.
    fn complete(&self, run: &mut Run, id: u64) -> Result<u64, SpeechError> {
        if id <= self.completed_through.load(Ordering::Acquire) {
            return Err(SpeechError::LifecycleViolation(format!(
                "run {id} completed twice"
            )));
        }
        if run.id != id || run.state == GenerationState::Completed {
            return Err(SpeechError::LifecycleViolation(format!(
                "run {id} is not the current run {} ({})",
                run.id, run.state
            )));
        }
        run.state = GenerationState::Completed;
        self.completed_through.store(id, Ordering::Release);

        *run = Run {
            id: id + 1,
            state: GenerationState::Active,
            pending: PendingText::new(self.enders.clone(), self.marker),
        };

        self.queue.metrics().record_run_completed();
        info!(run = id, "speech run completed");
        let _ = self.events.send(SpeechEvent::Completed { run: id });
        Ok(id)
    }

    fn complete_or_report(&self, run: &mut Run) -> u64 {
        let id = run.id;
        match self.complete(run, id) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "speech lifecycle broken");
                debug_assert!(false, "{e}");
                id
            }
        }
    }
}

pub struct Segmenter {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl Segmenter {
    /// Attach a segmenter to an existing queue and its notification stream.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        queue: Arc<PlaybackQueue>,
        finished: mpsc::UnboundedReceiver<PlaybackFinished>,
        config: &SpeechConfig,
    ) -> Self {
        let enders = config.effective_enders();
        let marker = config.response_end_marker;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            run: Mutex::new(Run {
                id: 1,
                state: GenerationState::Active,
                pending: PendingText::new(enders.clone(), marker),
            }),
            completed_through: AtomicU64::new(0),
            queue,
            events,
            enders,
            marker,
        });

        let listener = tokio::spawn(listen(Arc::clone(&shared), finished));
        Self { shared, listener }
    }

    /// Build the whole pipeline: playback queue, worker and segmenter.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
        config: &SpeechConfig,
    ) -> Self {
        let metrics = Arc::new(PlaybackMetrics::new());
        let (queue, finished) = PlaybackQueue::start(synthesizer, player, config, metrics);
        Self::new(queue, finished, config)
    }

    /// Feed one producer increment.
    pub fn add_text(&self, increment: &str) -> Result<(), SpeechError> {
        let mut run = self.shared.lock_run();
        if run.state != GenerationState::Active {
            return Err(SpeechError::InvalidState { state: run.state });
        }

        if let Some(segment) = run.pending.push(increment) {
            self.shared.dispatch(&run, segment);
        }
        Ok(())
    }

    /// The producer has no more text for this run.
    pub fn end(&self) -> EndOutcome {
        let mut run = self.shared.lock_run();
        if run.state != GenerationState::Active {
            warn!(run = run.id, state = %run.state, "end() called on a run that already ended");
            return EndOutcome::Pending { run: run.id };
        }

        if let Some(segment) = run.pending.flush() {
            self.shared.dispatch(&run, segment);
            run.state = GenerationState::PendingCompletion;
            return EndOutcome::Pending { run: run.id };
        }

        if self.shared.queue.is_idle() {
            let id = self.shared.complete_or_report(&mut run);
            return EndOutcome::Completed { run: id };
        }

        run.state = GenerationState::PendingCompletion;
        EndOutcome::Pending { run: run.id }
    }

    /// `end()` and wait until everything of this run has been spoken.
    pub async fn end_and_wait(&self) -> Result<u64, SpeechError> {
        let mut events = self.subscribe();
        let run = match self.end() {
            EndOutcome::Completed { run } => return Ok(run),
            EndOutcome::Pending { run } => run,
        };

        loop {
            match events.recv().await {
                Ok(SpeechEvent::Completed { run: done }) if done == run => return Ok(run),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "speech event receiver lagged");
                    if self.run_id() != run {
                        return Ok(run);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SpeechError::LifecycleViolation(
                        "speech event channel closed before completion".to_string(),
                    ));
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> GenerationState {
        self.shared.lock_run().state
    }

    pub fn run_id(&self) -> u64 {
        self.shared.lock_run().id
    }

    /// Text received but not yet dispatched.
    pub fn buffered_text(&self) -> String {
        self.shared.lock_run().pending.buffered().to_string()
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.shared.queue
    }
}

impl Drop for Segmenter {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(shared: Arc<Shared>, mut finished: mpsc::UnboundedReceiver<PlaybackFinished>) {
    while let Some(notification) = finished.recv().await {
        let mut run = shared.lock_run();
        // The queue itself is re-checked: a notification from an earlier
        // run must not complete the current one.
        if notification.backlog_empty
            && run.state == GenerationState::PendingCompletion
            && shared.queue.is_idle()
        {
            shared.complete_or_report(&mut run);
        }
    }
    debug!("playback notifications closed");
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::engine::{AudioBuffer, PlaybackHandle};

    struct Mute;

    impl SpeechSynthesizer for Mute {
        fn synthesize(&self, _text: &str, _speed: f32, _speaker_id: i64) -> anyhow::Result<AudioBuffer> {
            Ok(AudioBuffer::new(Vec::new(), 16_000))
        }
    }

    struct InstantPlayer;

    impl AudioPlayer for InstantPlayer {
        fn play(&self, _wav_path: &Path) -> anyhow::Result<PlaybackHandle> {
            Ok(PlaybackHandle::finished())
        }
    }

    fn pending() -> PendingText {
        PendingText::new(vec!['.', ',', '!', '?'], '#')
    }

    fn feed(pending: &mut PendingText, increments: &[&str]) -> Vec<String> {
        increments.iter().filter_map(|inc| pending.push(inc)).collect()
    }

    #[test]
    fn test_segment_waits_for_boundary() {
        let mut p = pending();
        assert_eq!(p.push("Hello"), None);
        assert_eq!(p.push(" world."), Some("Hello world.".to_string()));
        assert_eq!(p.buffered(), "");
    }

    #[test]
    fn test_role_prefix_and_response_end() {
        let mut p = pending();
        let segments = feed(&mut p, &["Assistant: I am fine.", " Thanks#extra note"]);
        assert_eq!(segments, vec![" I am fine.", " Thanks"]);
        assert_eq!(p.push("more text."), None);
        assert_eq!(p.flush(), None);
    }

    #[test]
    fn test_role_prefix_only_on_first_segment() {
        let mut p = pending();
        let segments = feed(&mut p, &["Bob: hi.", " Alice: there."]);
        assert_eq!(segments, vec![" hi.", " Alice: there."]);
    }

    #[test]
    fn test_role_prefix_applies_to_flush() {
        let mut p = pending();
        assert_eq!(p.push("Assistant: no punctuation"), None);
        assert_eq!(p.flush(), Some(" no punctuation".to_string()));
    }

    #[test]
    fn test_rightmost_boundary_wins() {
        let mut p = pending();
        assert_eq!(p.push("One. Two, three"), Some("One. Two,".to_string()));
        assert_eq!(p.buffered(), " three");
        assert_eq!(p.flush(), Some(" three".to_string()));
    }

    #[test]
    fn test_marker_flushes_buffer_without_marker() {
        let mut p = pending();
        assert_eq!(p.push("Fine"), None);
        assert_eq!(p.push(", thanks#note. More."), Some("Fine, thanks".to_string()));
        assert_eq!(p.buffered(), "");
    }

    #[test]
    fn test_marker_keeps_punctuation_before_it() {
        let mut p = pending();
        assert_eq!(p.push("Fine.#x"), Some("Fine.".to_string()));
        assert_eq!(p.flush(), None);
    }

    #[test]
    fn test_marker_with_nothing_before_it() {
        let mut p = pending();
        assert_eq!(p.push("Done."), Some("Done.".to_string()));
        assert_eq!(p.push("#secret"), None);
        assert_eq!(p.push(" ignored."), None);
    }

    #[test]
    fn test_empty_increment_is_noop() {
        let mut p = pending();
        assert_eq!(p.push(""), None);
        assert_eq!(p.buffered(), "");
    }

    #[test]
    fn test_concatenation_preserved_without_marker() {
        let increments = [
            "Assistant:", " The", " weather", " is nice", ". It", " will", " rain, maybe", "!",
            " Or", " not", "? Who", " knows",
        ];
        let mut p = pending();
        let mut spoken: String = feed(&mut p, &increments).concat();
        if let Some(rest) = p.flush() {
            spoken.push_str(&rest);
        }

        let received: String = increments.concat();
        assert_eq!(spoken, strip_role_prefix(&received));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(GenerationState::PendingCompletion.to_string(), "pending_completion");
        assert_eq!(GenerationState::Active.as_str(), "active");
    }

    #[tokio::test]
    async fn test_second_completion_is_a_lifecycle_violation() {
        let segmenter = Segmenter::spawn(Arc::new(Mute), Arc::new(InstantPlayer), &SpeechConfig::default());
        let mut events = segmenter.subscribe();

        {
            let mut run = segmenter.shared.lock_run();
            assert_eq!(segmenter.shared.complete(&mut run, 1).unwrap(), 1);

            let again = segmenter.shared.complete(&mut run, 1);
            assert!(matches!(again, Err(SpeechError::LifecycleViolation(_))));

            // Only the current run can complete
            let ahead = segmenter.shared.complete(&mut run, 3);
            assert!(matches!(ahead, Err(SpeechError::LifecycleViolation(_))));

            assert_eq!(run.id, 2);
            assert_eq!(run.state, GenerationState::Active);
        }

        assert_eq!(events.try_recv().unwrap(), SpeechEvent::Completed { run: 1 });
        assert!(events.try_recv().is_err());
        assert_eq!(segmenter.queue().metrics().snapshot().runs_completed, 1);
    }

    #[tokio::test]
    async fn test_run_completes_when_playback_worker_is_gone() {
        let (queue, finished) = PlaybackQueue::detached();
        let segmenter = Segmenter::new(queue, finished, &SpeechConfig::default());
        let mut events = segmenter.subscribe();

        segmenter.add_text("Hello").unwrap();
        // The flushed segment is dropped, the run still finishes
        assert_eq!(segmenter.end(), EndOutcome::Pending { run: 1 });

        let completed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(SpeechEvent::Completed { run }) = events.recv().await {
                    return run;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(completed, 1);
        assert_eq!(segmenter.state(), GenerationState::Active);
        assert_eq!(segmenter.run_id(), 2);
    }
}
