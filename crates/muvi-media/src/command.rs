//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Builder for ffmpeg invocations with any number of inputs.
///
/// Clip assembly needs multi-input commands (concat manifest + audio
/// track), so inputs are a list, each with its own pre-`-i` arguments.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCommand {
    inputs: Vec<(Vec<String>, PathBuf)>,
    output: PathBuf,
    output_args: Vec<String>,
    log_level: Option<String>,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: None,
        }
    }

    /// Add an input file.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push((Vec::new(), path.as_ref().to_path_buf()));
        self
    }

    /// Add an input file with arguments placed before its `-i`.
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push((
            args.into_iter().map(Into::into).collect(),
            path.as_ref().to_path_buf(),
        ));
        self
    }

    /// Add an output argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add output arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.arg("-vf").arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.arg("-t").arg(format!("{:.3}", seconds))
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone().unwrap_or_else(|| "error".to_string()),
        ];
        for (input_args, path) in &self.inputs {
            args.extend(input_args.clone());
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
        }
        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Runs ffmpeg commands with a timeout.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    timeout_secs: u64,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Run an ffmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("running ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let timeout = std::time::Duration::from_secs(self.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("ffmpeg timed out after {} seconds", self.timeout_secs);
                return Err(MediaError::Timeout(self.timeout_secs));
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(MediaError::ffmpeg_failed(
                "ffmpeg exited with non-zero status",
                Some(stderr),
                output.status.code(),
            ))
        }
    }

    /// Run ffmpeg capturing raw stdout (PCM extraction).
    pub async fn run_capture(&self, args: &[String]) -> MediaResult<Vec<u8>> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        debug!("running ffmpeg {}", args.join(" "));
        let child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let timeout = std::time::Duration::from_secs(self.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(MediaError::Timeout(self.timeout_secs)),
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(MediaError::ffmpeg_failed(
                "ffmpeg exited with non-zero status",
                Some(stderr),
                output.status.code(),
            ))
        }
    }
}

/// Check ffmpeg is installed.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check ffprobe is installed.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
