//! Per-shot render state.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Render lifecycle for one shot.
///
/// `Rendering` exists only in memory while a call is in flight; persisted
/// states are `None`, `Done` and `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    #[default]
    None,
    Rendering,
    Done,
    Error,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::None => "none",
            RenderStatus::Rendering => "rendering",
            RenderStatus::Done => "done",
            RenderStatus::Error => "error",
        }
    }

    /// Whether this status may be written to disk.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenderStatus::Rendering)
    }
}

/// A generated video clip for a shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ShotVideo {
    pub video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// Length of the clip as the model actually generated it.
    pub duration: f64,
    /// Length the storyboard wants; the exporter reconciles the two.
    pub target_duration: f64,
    pub model: String,
    #[serde(default)]
    pub has_audio: bool,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub motion_prompt: String,
}

/// Render state of one shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ShotRender {
    #[serde(default)]
    pub status: RenderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ref_images_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<ShotVideo>,
}

impl ShotRender {
    /// Mark the render done, clearing any previous error.
    pub fn complete(&mut self, image_url: String, model: String, refs_used: Vec<String>) {
        self.status = RenderStatus::Done;
        self.image_url = Some(image_url);
        self.model = Some(model);
        self.ref_images_used = refs_used;
        self.error = None;
    }

    /// Mark the render failed without touching any previous image.
    pub fn fail(&mut self, error: String) {
        self.status = RenderStatus::Error;
        self.error = Some(error);
    }

    /// Reset to an empty render (used when the backing file disappeared).
    pub fn clear(&mut self) {
        *self = ShotRender::default();
    }
}
