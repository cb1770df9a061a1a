//! Raw PCM extraction for audio analysis.

use std::path::Path;

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};

/// Sample rate used for analysis decoding. Beat tracking does not need
/// full fidelity; a low rate keeps the buffers small.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22050;

/// Decode an audio file to mono f32 samples at [`ANALYSIS_SAMPLE_RATE`].
pub async fn decode_mono(path: impl AsRef<Path>) -> MediaResult<Vec<f32>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let args: Vec<String> = vec![
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-f".to_string(),
        "f32le".to_string(),
        "-acodec".to_string(),
        "pcm_f32le".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        ANALYSIS_SAMPLE_RATE.to_string(),
        "pipe:1".to_string(),
    ];

    let bytes = FfmpegRunner::new().run_capture(&args).await?;
    if bytes.len() < 4 {
        return Err(MediaError::invalid_media(format!(
            "no audio decoded from {}",
            path.display()
        )));
    }

    let samples = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(samples)
}

/// Duration implied by a decoded sample buffer.
pub fn samples_duration(samples: &[f32]) -> f64 {
    samples.len() as f64 / ANALYSIS_SAMPLE_RATE as f64
}
