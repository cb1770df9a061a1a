//! FFprobe media information.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Probed media file information.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    /// Duration in seconds.
    pub duration: f64,
    /// Width in pixels (0 for audio-only files).
    pub width: u32,
    /// Height in pixels (0 for audio-only files).
    pub height: u32,
    /// Whether an audio stream is present.
    pub has_audio: bool,
    /// Whether a video stream is present.
    pub has_video: bool,
    /// Sample rate of the first audio stream, if any.
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    sample_rate: Option<String>,
}

/// Probe a media file.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    // Container duration first, stream duration as backup.
    let mut duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    if duration <= 0.0 {
        duration = probe
            .streams
            .iter()
            .filter_map(|s| s.duration.as_deref())
            .filter_map(|d| d.parse::<f64>().ok())
            .fold(0.0, f64::max);
    }

    let video = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");

    Ok(MediaInfo {
        duration,
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
        has_audio: audio.is_some(),
        has_video: video.is_some(),
        sample_rate: audio
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|r| r.parse().ok()),
    })
}

/// Probe just the duration of a media file.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = probe_media(path.as_ref()).await?;
    if info.duration > 0.0 {
        Ok(info.duration)
    } else {
        Err(MediaError::invalid_media(format!(
            "no duration reported for {}",
            path.as_ref().display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_output_parsing() {
        let json = r#"{
            "format": {"duration": "184.32"},
            "streams": [
                {"codec_type": "audio", "sample_rate": "44100"},
                {"codec_type": "video", "width": 1920, "height": 1080}
            ]
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(probe.format.duration.as_deref(), Some("184.32"));
        assert_eq!(probe.streams.len(), 2);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media("/definitely/not/here.mp3").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
