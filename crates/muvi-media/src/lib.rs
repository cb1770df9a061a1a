//! FFmpeg CLI wrapper for the muvi pipeline.
//!
//! Everything here shells out to `ffmpeg`/`ffprobe`; no codec bindings.
//! The exporter consumes the [`MediaMuxer`] trait, the audio analyzer the
//! probe and PCM helpers.

mod command;
mod error;
mod muxer;
mod pcm;
mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use muxer::{FfmpegMuxer, MediaMuxer};
pub use pcm::{decode_mono, samples_duration, ANALYSIS_SAMPLE_RATE};
pub use probe::{probe_duration, probe_media, MediaInfo};

#[cfg(any(test, feature = "mocks"))]
pub use muxer::MockMediaMuxer;
