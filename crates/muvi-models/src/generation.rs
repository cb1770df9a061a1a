//! Generation model catalogs.
//!
//! Image families each come as a text-to-image endpoint plus an img2img
//! editor with its own reference-count limit. Video models encode duration
//! support differently per model; the catalog carries the hard ranges.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Image model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageModel {
    #[default]
    Nanobanana,
    Seedream45,
    Flux2,
}

impl ImageModel {
    pub const ALL: &'static [ImageModel] =
        &[ImageModel::Nanobanana, ImageModel::Seedream45, ImageModel::Flux2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageModel::Nanobanana => "nanobanana",
            ImageModel::Seedream45 => "seedream45",
            ImageModel::Flux2 => "flux2",
        }
    }

    /// Text-to-image endpoint id.
    pub fn t2i_endpoint(&self) -> &'static str {
        match self {
            ImageModel::Nanobanana => "fal-ai/nano-banana",
            ImageModel::Seedream45 => "fal-ai/bytedance/seedream/v4.5/text-to-image",
            ImageModel::Flux2 => "fal-ai/flux-2",
        }
    }

    /// Img2img editor endpoint id.
    pub fn edit_endpoint(&self) -> &'static str {
        match self {
            ImageModel::Nanobanana => "fal-ai/nano-banana/edit",
            ImageModel::Seedream45 => "fal-ai/bytedance/seedream/v4.5/edit",
            ImageModel::Flux2 => "fal-ai/flux-2/edit",
        }
    }

    /// How many reference images the editor accepts.
    pub fn max_edit_refs(&self) -> usize {
        match self {
            ImageModel::Nanobanana => 4,
            ImageModel::Seedream45 => 10,
            ImageModel::Flux2 => 4,
        }
    }

    /// Baseline USD cost per generated image.
    pub fn base_cost(&self) -> f64 {
        match self {
            ImageModel::Nanobanana => 0.039,
            ImageModel::Seedream45 => 0.03,
            ImageModel::Flux2 => 0.025,
        }
    }
}

impl fmt::Display for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown image model: {0}")]
pub struct ParseImageModelError(String);

impl FromStr for ImageModel {
    type Err = ParseImageModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nanobanana" | "nano-banana" | "nano_banana" => Ok(ImageModel::Nanobanana),
            "seedream45" | "seedream" => Ok(ImageModel::Seedream45),
            "flux2" | "flux-2" => Ok(ImageModel::Flux2),
            other => Err(ParseImageModelError(other.to_string())),
        }
    }
}

/// Image-to-video model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoModel {
    #[default]
    Veo3Fast,
    Kling25,
    Wan25,
    Ltx2Fast,
}

impl VideoModel {
    pub const ALL: &'static [VideoModel] = &[
        VideoModel::Veo3Fast,
        VideoModel::Kling25,
        VideoModel::Wan25,
        VideoModel::Ltx2Fast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoModel::Veo3Fast => "veo3-fast",
            VideoModel::Kling25 => "kling25",
            VideoModel::Wan25 => "wan25",
            VideoModel::Ltx2Fast => "ltx2-fast",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            VideoModel::Veo3Fast => "fal-ai/veo3/fast/image-to-video",
            VideoModel::Kling25 => "fal-ai/kling-video/v2.5-turbo/pro/image-to-video",
            VideoModel::Wan25 => "fal-ai/wan-25-preview/image-to-video",
            VideoModel::Ltx2Fast => "fal-ai/ltx-2/fast/image-to-video",
        }
    }

    /// Hard (min, max) clip length in seconds the model accepts.
    pub fn duration_range(&self) -> (f64, f64) {
        match self {
            VideoModel::Veo3Fast => (4.0, 8.0),
            VideoModel::Kling25 => (5.0, 10.0),
            VideoModel::Wan25 => (5.0, 15.0),
            VideoModel::Ltx2Fast => (2.0, 10.0),
        }
    }

    pub fn supports_audio(&self) -> bool {
        matches!(self, VideoModel::Veo3Fast)
    }

    /// Baseline USD cost per generated clip.
    pub fn base_cost(&self) -> f64 {
        match self {
            VideoModel::Veo3Fast => 0.40,
            VideoModel::Kling25 => 0.35,
            VideoModel::Wan25 => 0.25,
            VideoModel::Ltx2Fast => 0.12,
        }
    }

    /// Clamp a target duration into the model's supported range.
    pub fn clamp_duration(&self, target: f64) -> f64 {
        let (min, max) = self.duration_range();
        target.clamp(min, max)
    }
}

impl fmt::Display for VideoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown video model: {0}")]
pub struct ParseVideoModelError(String);

impl FromStr for VideoModel {
    type Err = ParseVideoModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "veo3-fast" | "veo3" | "veo" => Ok(VideoModel::Veo3Fast),
            "kling25" | "kling" => Ok(VideoModel::Kling25),
            "wan25" | "wan" => Ok(VideoModel::Wan25),
            "ltx2-fast" | "ltx2" | "ltx" => Ok(VideoModel::Ltx2Fast),
            other => Err(ParseVideoModelError(other.to_string())),
        }
    }
}
