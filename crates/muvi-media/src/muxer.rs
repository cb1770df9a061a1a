//! The media muxer: clip building, concatenation and retiming.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_duration;

/// Media assembly operations the exporter depends on.
///
/// Kept behind a trait so export logic can be exercised without ffmpeg
/// installed.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MediaMuxer: Send + Sync {
    /// Verify the muxer is usable.
    async fn probe(&self) -> MediaResult<()>;

    /// Render a still image into an MP4 clip of the given length, scaled
    /// and padded to the target resolution.
    async fn image_to_clip(
        &self,
        image: &Path,
        duration: f64,
        width: u32,
        height: u32,
        fps: u32,
        output: &Path,
    ) -> MediaResult<()>;

    /// Concatenate clips and mux the audio track, truncating to the
    /// shorter of the two.
    async fn concat(&self, clips: &[PathBuf], audio: &Path, output: &Path) -> MediaResult<()>;

    /// Cut a clip down to `target_duration` with a stream copy.
    async fn trim(&self, clip: &Path, target_duration: f64, output: &Path) -> MediaResult<()>;

    /// Retime a clip by a speed factor (>1 plays faster). The output
    /// duration is `input_duration / factor`.
    async fn speed_adjust(&self, clip: &Path, factor: f64, output: &Path) -> MediaResult<()>;

    /// Actual duration of a clip on disk.
    async fn clip_duration(&self, clip: &Path) -> MediaResult<f64>;
}

/// FFmpeg-backed muxer.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMuxer {
    runner: FfmpegRunner,
}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self {
            runner: FfmpegRunner::new(),
        }
    }

    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(timeout_secs),
        }
    }

    /// Write a concat-demuxer manifest next to the output file.
    async fn write_manifest(clips: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        let manifest = output.with_extension("concat.txt");
        let mut body = String::new();
        for clip in clips {
            // Single quotes in paths need the concat demuxer's escape.
            let escaped = clip.to_string_lossy().replace('\'', "'\\''");
            body.push_str(&format!("file '{}'\n", escaped));
        }
        tokio::fs::write(&manifest, body).await?;
        Ok(manifest)
    }
}

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn probe(&self) -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }

    async fn image_to_clip(
        &self,
        image: &Path,
        duration: f64,
        width: u32,
        height: u32,
        fps: u32,
        output: &Path,
    ) -> MediaResult<()> {
        if !image.exists() {
            return Err(MediaError::FileNotFound(image.to_path_buf()));
        }
        if duration <= 0.0 {
            return Err(MediaError::invalid_media(format!(
                "clip duration must be positive, got {duration}"
            )));
        }

        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps},format=yuv420p",
            w = width,
            h = height,
            fps = fps
        );

        let cmd = FfmpegCommand::new(output)
            .input_with_args(["-loop", "1"], image)
            .duration(duration)
            .video_filter(filter)
            .video_codec("libx264")
            .args(["-preset", "medium", "-crf", "18", "-an"]);

        self.runner.run(&cmd).await?;
        debug!("built {:.2}s clip from {}", duration, image.display());
        Ok(())
    }

    async fn concat(&self, clips: &[PathBuf], audio: &Path, output: &Path) -> MediaResult<()> {
        if clips.is_empty() {
            return Err(MediaError::invalid_media("nothing to concatenate"));
        }
        if !audio.exists() {
            return Err(MediaError::FileNotFound(audio.to_path_buf()));
        }

        let manifest = Self::write_manifest(clips, output).await?;

        let cmd = FfmpegCommand::new(output)
            .input_with_args(["-f", "concat", "-safe", "0"], &manifest)
            .input(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0"])
            .video_codec("copy")
            .audio_codec("aac")
            .args(["-b:a", "192k", "-shortest"]);

        let result = self.runner.run(&cmd).await;
        let _ = tokio::fs::remove_file(&manifest).await;
        result?;

        info!("concatenated {} clips into {}", clips.len(), output.display());
        Ok(())
    }

    async fn trim(&self, clip: &Path, target_duration: f64, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(output)
            .input(clip)
            .duration(target_duration)
            .args(["-c", "copy"]);
        self.runner.run(&cmd).await
    }

    async fn speed_adjust(&self, clip: &Path, factor: f64, output: &Path) -> MediaResult<()> {
        if factor <= 0.0 {
            return Err(MediaError::invalid_media(format!(
                "speed factor must be positive, got {factor}"
            )));
        }
        let cmd = FfmpegCommand::new(output)
            .input(clip)
            .video_filter(format!("setpts=PTS/{:.6}", factor))
            .video_codec("libx264")
            .args(["-preset", "medium", "-crf", "18", "-an"]);
        self.runner.run(&cmd).await
    }

    async fn clip_duration(&self, clip: &Path) -> MediaResult<f64> {
        probe_duration(clip).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_manifest_escapes_quotes() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out.mp4");
        let clips = vec![
            tmp.path().join("a.mp4"),
            tmp.path().join("it's here.mp4"),
        ];
        let manifest = FfmpegMuxer::write_manifest(&clips, &out).await.unwrap();
        let body = tokio::fs::read_to_string(&manifest).await.unwrap();
        assert!(body.contains("file '"));
        assert!(body.contains("it'\\''s here.mp4"));
        assert_eq!(body.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_concat_rejects_empty_input() {
        let tmp = TempDir::new().unwrap();
        let muxer = FfmpegMuxer::new();
        let audio = tmp.path().join("song.mp3");
        tokio::fs::write(&audio, b"x").await.unwrap();
        let err = muxer
            .concat(&[], &audio, &tmp.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }

    #[tokio::test]
    async fn test_image_to_clip_rejects_bad_duration() {
        let tmp = TempDir::new().unwrap();
        let muxer = FfmpegMuxer::new();
        let image = tmp.path().join("frame.png");
        tokio::fs::write(&image, b"x").await.unwrap();
        let err = muxer
            .image_to_clip(&image, 0.0, 1920, 1080, 24, &tmp.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }

    #[tokio::test]
    async fn test_speed_adjust_rejects_bad_factor() {
        let tmp = TempDir::new().unwrap();
        let muxer = FfmpegMuxer::new();
        let err = muxer
            .speed_adjust(&tmp.path().join("a.mp4"), 0.0, &tmp.path().join("b.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }
}
