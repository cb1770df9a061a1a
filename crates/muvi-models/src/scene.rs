//! Derived reference graph: canonical character refs and per-sequence
//! scenes (decor plates, wardrobe previews).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{CastId, SceneId, SequenceId};

/// Canonical stylized references for one cast member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CharacterRefs {
    /// Full-body reference (local URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_a: Option<String>,
    /// Portrait close-up reference (local URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_b: Option<String>,
}

impl CharacterRefs {
    pub fn is_complete(&self) -> bool {
        self.ref_a.is_some() && self.ref_b.is_some()
    }
}

/// A decor plate and optional wardrobe preview, one per sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub scene_id: SceneId,
    pub sequence_id: SequenceId,
    pub title: String,
    /// Decor-only plate prompt; scenes must not contain people.
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decor_alt_prompt: Option<String>,
    /// Wardrobe description for the sequence, if styled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wardrobe: Option<String>,
    /// Rendered decor plates (local URLs), wide establishing first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decor_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decor_alt: Option<String>,
    /// Composed lead-in-costume-in-space preview (local URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wardrobe_ref: Option<String>,
    #[serde(default)]
    pub decor_locked: bool,
    #[serde(default)]
    pub wardrobe_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
}

impl Scene {
    pub fn new(
        scene_id: SceneId,
        sequence_id: SequenceId,
        title: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            scene_id,
            sequence_id,
            title: title.into(),
            prompt: prompt.into(),
            decor_alt_prompt: None,
            wardrobe: None,
            decor_refs: Vec::new(),
            decor_alt: None,
            wardrobe_ref: None,
            decor_locked: false,
            wardrobe_locked: false,
            output_url: None,
        }
    }

    /// First decor plate, the one shot renders consume.
    pub fn primary_decor(&self) -> Option<&str> {
        self.decor_refs.first().map(String::as_str)
    }
}

/// The reference graph every shot render consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CastMatrix {
    /// cast_id -> canonical refs. BTreeMap keeps serialization stable.
    #[serde(default)]
    pub character_refs: BTreeMap<CastId, CharacterRefs>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

impl CastMatrix {
    pub fn refs_for(&self, cast_id: &CastId) -> Option<&CharacterRefs> {
        self.character_refs.get(cast_id)
    }

    pub fn scene_for_sequence(&self, sequence_id: &SequenceId) -> Option<&Scene> {
        self.scenes.iter().find(|s| &s.sequence_id == sequence_id)
    }

    pub fn scene_mut(&mut self, scene_id: &SceneId) -> Option<&mut Scene> {
        self.scenes.iter_mut().find(|s| &s.scene_id == scene_id)
    }

    /// Drop everything derived for a cast member (on cast delete).
    pub fn remove_cast(&mut self, cast_id: &CastId) {
        self.character_refs.remove(cast_id);
    }
}
