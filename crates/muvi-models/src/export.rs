//! Export mode selection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How the final video is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Each shot is its still image held for the shot's duration.
    #[default]
    Stills,
    /// Each shot plays its generated clip, retimed to the storyboard.
    Img2vid,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Stills => "stills",
            ExportMode::Img2vid => "img2vid",
        }
    }
}
