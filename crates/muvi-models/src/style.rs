//! Visual style presets and output aspect.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Output aspect for every generated image and the final export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    #[default]
    Horizontal,
    Vertical,
    Square,
}

impl Aspect {
    pub const ALL: &'static [Aspect] = &[Aspect::Horizontal, Aspect::Vertical, Aspect::Square];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::Horizontal => "horizontal",
            Aspect::Vertical => "vertical",
            Aspect::Square => "square",
        }
    }

    /// Aspect-ratio string as generation backends expect it ("16:9" etc).
    pub fn ratio(&self) -> &'static str {
        match self {
            Aspect::Horizontal => "16:9",
            Aspect::Vertical => "9:16",
            Aspect::Square => "1:1",
        }
    }

    /// Named image size for backends that take a size keyword.
    pub fn image_size(&self) -> &'static str {
        match self {
            Aspect::Horizontal => "landscape_16_9",
            Aspect::Vertical => "portrait_16_9",
            Aspect::Square => "square_hd",
        }
    }

    /// Concrete pixel dimensions for backends that require width/height.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Aspect::Horizontal => (1920, 1080),
            Aspect::Vertical => (1080, 1920),
            Aspect::Square => (1440, 1440),
        }
    }

    /// Prompt fragment describing the frame orientation.
    pub fn prompt_token(&self) -> &'static str {
        match self {
            Aspect::Horizontal => "widescreen cinematic frame",
            Aspect::Vertical => "vertical portrait frame",
            Aspect::Square => "square frame",
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown aspect: {0}")]
pub struct ParseAspectError(String);

impl FromStr for Aspect {
    type Err = ParseAspectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "horizontal" | "landscape" | "16:9" => Ok(Aspect::Horizontal),
            "vertical" | "portrait" | "9:16" => Ok(Aspect::Vertical),
            "square" | "1:1" => Ok(Aspect::Square),
            other => Err(ParseAspectError(other.to_string())),
        }
    }
}

/// A visual style preset.
///
/// `tokens` is prepended to every generation prompt; `notes` is fed to the
/// storyboard LLM so sequences and shots are written for the look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub key: &'static str,
    pub label: &'static str,
    pub tokens: &'static str,
    pub notes: &'static str,
}

/// The preset catalog. Unknown keys resolve to `cinematic`.
pub const STYLE_PRESETS: &[StylePreset] = &[
    StylePreset {
        key: "cinematic",
        label: "Cinematic",
        tokens: "cinematic film still, anamorphic lens, shallow depth of field, natural color grade",
        notes: "Grounded, photographic. Lean on lighting and blocking rather than effects.",
    },
    StylePreset {
        key: "neon_noir",
        label: "Neon Noir",
        tokens: "neon noir, rain-slick streets, hard rim light, saturated magenta and cyan, deep shadows",
        notes: "Night exteriors, reflective surfaces, silhouettes. High contrast throughout.",
    },
    StylePreset {
        key: "analog_film",
        label: "Analog Film",
        tokens: "35mm analog film still, visible grain, halation, muted kodak palette, handheld framing",
        notes: "Imperfect and warm. Favor daylight, lens flares, slightly off-center framing.",
    },
    StylePreset {
        key: "anime",
        label: "Anime",
        tokens: "anime key visual, clean line art, cel shading, dramatic sky, vivid palette",
        notes: "Stylized but consistent character designs. Big establishing shots welcome.",
    },
    StylePreset {
        key: "painterly",
        label: "Painterly",
        tokens: "painterly illustration, oil texture, impressionist light, soft edges, rich brushwork",
        notes: "Mood over detail. Let color temperature carry the emotional arc.",
    },
    StylePreset {
        key: "documentary",
        label: "Documentary",
        tokens: "observational documentary photography, available light, true-to-life color, candid framing",
        notes: "No staging, no glamour. Real locations, real texture.",
    },
];

impl StylePreset {
    /// Look up a preset by key, falling back to `cinematic`.
    pub fn resolve(key: &str) -> &'static StylePreset {
        STYLE_PRESETS
            .iter()
            .find(|p| p.key == key)
            .unwrap_or(&STYLE_PRESETS[0])
    }

    pub fn is_known(key: &str) -> bool {
        STYLE_PRESETS.iter().any(|p| p.key == key)
    }
}
