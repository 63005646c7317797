use std::io::{Seek, Write};
use std::path::Path;

use anyhow::Context;
use tempfile::NamedTempFile;

use crate::engine::AudioBuffer;

/// Encode samples as 16-bit mono PCM WAV.
pub fn write_wav<W: Write + Seek>(writer: W, audio: &AudioBuffer) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(writer, spec)
        .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

    const I16_MAX_F32: f32 = i16::MAX as f32;
    for &s in &audio.samples {
        let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        writer
            .write_sample(v)
            .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
    }

    writer
        .finalize()
        .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))
}

/// Write one segment's audio to a temporary WAV file in `dir`.
/// The file is deleted when the returned handle is dropped.
pub fn write_temp_wav(dir: &Path, audio: &AudioBuffer) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("segment-")
        .suffix(".wav")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create audio artifact in {}", dir.display()))?;

    write_wav(std::io::BufWriter::new(file.as_file_mut()), audio)?;
    Ok(file)
}
