//! The single authoritative project document.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::audio::AudioDna;
use crate::cast::CastMember;
use crate::cost::CostLedger;
use crate::ids::CastId;
use crate::project::Project;
use crate::scene::CastMatrix;
use crate::storyboard::Storyboard;

/// Current state-document version; saves migrate `created_version` to this.
pub const STATE_VERSION: &str = "0.3.0";

/// Everything about one project, as persisted in `project.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectState {
    pub project: Project,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_dna: Option<AudioDna>,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub cast_matrix: CastMatrix,
    #[serde(default)]
    pub storyboard: Storyboard,
    #[serde(default)]
    pub costs: CostLedger,
}

impl ProjectState {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            audio_dna: None,
            cast: Vec::new(),
            cast_matrix: CastMatrix::default(),
            storyboard: Storyboard::default(),
            costs: CostLedger::default(),
        }
    }

    pub fn cast_member(&self, cast_id: &CastId) -> Option<&CastMember> {
        self.cast.iter().find(|m| &m.cast_id == cast_id)
    }

    pub fn cast_member_mut(&mut self, cast_id: &CastId) -> Option<&mut CastMember> {
        self.cast.iter_mut().find(|m| &m.cast_id == cast_id)
    }

    /// Audio duration, if analysis ran.
    pub fn audio_duration(&self) -> Option<f64> {
        self.audio_dna.as_ref().map(|dna| dna.meta.duration_sec)
    }

    /// Delete a cast member and everything derived from it: canonical
    /// refs, and references from sequences and shots.
    pub fn delete_cast(&mut self, cast_id: &CastId) -> bool {
        let before = self.cast.len();
        self.cast.retain(|m| &m.cast_id != cast_id);
        if self.cast.len() == before {
            return false;
        }
        self.cast_matrix.remove_cast(cast_id);
        self.storyboard.strip_cast(cast_id);
        true
    }
}
