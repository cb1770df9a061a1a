//! Shared data models for the muvi backend.
//!
//! This crate provides Serde-serializable types for:
//! - The project state document (`project.json`)
//! - Audio analysis results (duration, BPM, beat grid, structure, lyrics)
//! - Cast members and the derived reference graph
//! - Storyboard sequences, shots and per-shot render state
//! - Generation model catalogs (image and video families)
//! - Cost ledger entries
//! - State validation against the timeline and identity invariants

pub mod audio;
pub mod cast;
pub mod cost;
pub mod export;
pub mod generation;
pub mod ids;
pub mod project;
pub mod render;
pub mod scene;
pub mod state;
pub mod storyboard;
pub mod style;
pub mod utils;
pub mod validate;

// Re-export common types
pub use audio::{AudioDna, AudioMeta, BeatGrid, BpmSource, DynamicsSpan, LyricLine, Section};
pub use cast::{
    sort_cast_for_presence, CastConditioning, CastMember, CastPresence, ReferenceImage, Role,
    MAX_REFERENCE_IMAGES,
};
pub use cost::{CostCall, CostLedger};
pub use export::ExportMode;
pub use generation::{ImageModel, VideoModel};
pub use ids::{CastId, ProjectId, SceneId, SequenceId, ShotId};
pub use project::{Project, RenderModels};
pub use render::{RenderStatus, ShotRender, ShotVideo};
pub use scene::{CastMatrix, CharacterRefs, Scene};
pub use state::{ProjectState, STATE_VERSION};
pub use storyboard::{
    target_counts, Sequence, Shot, Storyboard, StructureType, MAX_SHOT_GAP_SECS,
    TIGHTEN_GAP_SECS,
};
pub use style::{Aspect, StylePreset, STYLE_PRESETS};
pub use utils::sanitize_filename;
pub use validate::{validate_state, FileResolver, ValidationReport};
