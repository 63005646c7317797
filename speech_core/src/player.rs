use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::mpsc as std_mpsc;

use anyhow::Context;
use rodio::{Decoder, OutputStream, Sink};
use tracing::debug;

use crate::engine::{AudioPlayer, PlaybackHandle};

/// Plays WAV artifacts on the default output device.
///
/// The rodio output stream is not `Send`, so every playback owns a short
/// lived thread that opens the device, drains the sink and reports the end.
#[derive(Debug, Clone)]
pub struct RodioPlayer {
    volume: f32,
}

impl RodioPlayer {
    pub fn new(volume: f32) -> Self {
        Self { volume }
    }
}

impl Default for RodioPlayer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AudioPlayer for RodioPlayer {
    fn play(&self, wav_path: &Path) -> anyhow::Result<PlaybackHandle> {
        let file = File::open(wav_path)
            .with_context(|| format!("Failed to open audio artifact {}", wav_path.display()))?;
        let source = Decoder::new(BufReader::new(file)).context("Failed to decode audio artifact")?;

        let (started_tx, started_rx) = std_mpsc::sync_channel::<anyhow::Result<()>>(1);
        let (end, handle) = PlaybackHandle::channel();
        let volume = self.volume;

        std::thread::Builder::new()
            .name("speech-playback".to_string())
            .spawn(move || {
                let (_stream, stream_handle) = match OutputStream::try_default() {
                    Ok(output) => output,
                    Err(e) => {
                        let _ = started_tx.send(Err(anyhow::anyhow!("no audio output device: {e}")));
                        return;
                    }
                };
                let sink = match Sink::try_new(&stream_handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = started_tx.send(Err(anyhow::anyhow!("failed to open audio sink: {e}")));
                        return;
                    }
                };
                sink.set_volume(volume);
                sink.append(source);
                let _ = started_tx.send(Ok(()));

                sink.sleep_until_end();
                debug!("playback drained");
                end.notify(Ok(()));
            })
            .context("Failed to spawn playback thread")?;

        started_rx
            .recv()
            .context("playback thread exited before starting")??;
        Ok(handle)
    }
}
