//! Audio analysis results ("audio DNA").
//!
//! Populated once per audio upload by the analyzer, then consumed by the
//! storyboard planner. The beat grid is derived from BPM and duration
//! assuming 4/4 and can be rebuilt after a manual BPM patch.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::round_secs;

/// Valid manual BPM range.
pub const BPM_MIN: f64 = 40.0;
pub const BPM_MAX: f64 = 240.0;

/// BPM used for grid construction when detection failed entirely.
pub const BPM_FALLBACK: f64 = 120.0;

/// Where a BPM (or duration) figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BpmSource {
    /// Local beat tracking over decoded PCM.
    #[default]
    Librosa,
    /// Reported by the external audio-understanding service.
    Fal,
    /// User override.
    Manual,
    /// Nothing worked; grid built at the fallback tempo.
    #[serde(rename = "default")]
    Fallback,
}

impl BpmSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BpmSource::Librosa => "librosa",
            BpmSource::Fal => "fal",
            BpmSource::Manual => "manual",
            BpmSource::Fallback => "default",
        }
    }
}

/// Core measurements of the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct AudioMeta {
    pub duration_sec: f64,
    pub bpm: f64,
    #[serde(default)]
    pub bpm_source: BpmSource,
    /// BPM as reported by the external service, kept for reference when the
    /// local figure wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm_fal: Option<f64>,
    #[serde(default)]
    pub duration_source: String,
}

/// A structural section of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    #[serde(rename = "type")]
    pub kind: String,
    pub start: f64,
    pub end: f64,
}

/// Energy over a time span, in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DynamicsSpan {
    pub start: f64,
    pub end: f64,
    pub energy: f64,
}

/// One lyric line, optionally time-anchored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LyricLine {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
}

/// Derived beat/bar/downbeat times assuming 4/4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct BeatGrid {
    pub beats: Vec<f64>,
    pub bars: Vec<f64>,
    pub downbeats: Vec<f64>,
    pub total_beats: usize,
    pub total_bars: usize,
}

impl BeatGrid {
    /// Build the grid for a tempo and duration.
    ///
    /// `beats` carries every beat time, `bars` every fourth beat,
    /// `downbeats` the first beat of each bar (same times as `bars` in 4/4,
    /// kept separate because consumers treat them differently).
    pub fn build(bpm: f64, duration_sec: f64) -> Self {
        if bpm <= 0.0 || duration_sec <= 0.0 {
            return Self::default();
        }

        let beat_duration = 60.0 / bpm;
        let mut beats = Vec::new();
        let mut t = 0.0;
        while t < duration_sec {
            beats.push(round_secs(t));
            t += beat_duration;
        }

        let bars: Vec<f64> = beats.iter().copied().step_by(4).collect();
        let downbeats = bars.clone();
        let total_beats = beats.len();
        let total_bars = bars.len();

        Self {
            beats,
            bars,
            downbeats,
            total_beats,
            total_bars,
        }
    }
}

/// The full normalized analysis of one audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct AudioDna {
    pub meta: AudioMeta,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub dynamics: Vec<DynamicsSpan>,
    #[serde(default)]
    pub delivery: String,
    #[serde(default)]
    pub story: String,
    #[serde(default)]
    pub lyrics: Vec<LyricLine>,
    #[serde(default)]
    pub lyrics_source: String,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub beat_grid: BeatGrid,
}

impl AudioDna {
    /// Apply a manual BPM override and rebuild the grid.
    ///
    /// The value is clamped to the valid range rather than rejected; the
    /// control surface validates before calling.
    pub fn update_bpm(&mut self, new_bpm: f64) {
        let bpm = new_bpm.clamp(BPM_MIN, BPM_MAX);
        self.meta.bpm = bpm;
        self.meta.bpm_source = BpmSource::Manual;
        self.beat_grid = BeatGrid::build(bpm, self.meta.duration_sec);
    }

    /// Joined lyric text, one line per entry.
    pub fn lyrics_text(&self) -> String {
        self.lyrics
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
