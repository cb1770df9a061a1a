//! Project root settings.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::generation::{ImageModel, VideoModel};
use crate::ids::ProjectId;
use crate::style::Aspect;

/// Locked generation endpoints derived from the image model choice.
///
/// Re-derived whenever `image_model_choice` changes so every render in a
/// project goes through the same family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct RenderModels {
    pub image: String,
    pub editor: String,
}

impl RenderModels {
    pub fn lock(choice: ImageModel) -> Self {
        Self {
            image: choice.t2i_endpoint().to_string(),
            editor: choice.edit_endpoint().to_string(),
        }
    }
}

/// Project settings and identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    #[serde(default = "default_style_preset")]
    pub style_preset: String,
    #[serde(default)]
    pub aspect: Aspect,
    #[serde(default)]
    pub llm_preference: String,
    #[serde(default)]
    pub image_model_choice: ImageModel,
    #[serde(default)]
    pub video_model_choice: VideoModel,
    #[serde(default)]
    pub use_whisper: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_version: String,
    /// User-chosen absolute folder; single source of truth for the
    /// project's files. Absent only on pre-migration projects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_location: Option<String>,
    #[serde(default)]
    pub style_locked: bool,
    /// Anchor image steering cast-ref generations toward one look.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_lock_image: Option<String>,
    #[serde(default)]
    pub render_models: RenderModels,
    /// local URL -> external upload URL. Soft cache: entries are
    /// revalidated by HEAD before reuse.
    #[serde(default)]
    pub fal_upload_cache: BTreeMap<String, String>,
}

fn default_style_preset() -> String {
    "cinematic".to_string()
}

impl Project {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        let image_model = ImageModel::default();
        Self {
            id: ProjectId::new(),
            title: title.into(),
            style_preset: default_style_preset(),
            aspect: Aspect::default(),
            llm_preference: String::new(),
            image_model_choice: image_model,
            video_model_choice: VideoModel::default(),
            use_whisper: false,
            created_at: now,
            updated_at: now,
            created_version: version.into(),
            project_location: None,
            style_locked: false,
            style_lock_image: None,
            render_models: RenderModels::lock(image_model),
            fal_upload_cache: BTreeMap::new(),
        }
    }

    /// Switch image family and re-lock the render endpoints.
    pub fn set_image_model(&mut self, choice: ImageModel) {
        self.image_model_choice = choice;
        self.render_models = RenderModels::lock(choice);
    }
}
