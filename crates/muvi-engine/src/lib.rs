//! The muvi pipeline core.
//!
//! Everything between the control surface and the external services:
//! audio analysis, storyboard planning, the identity/reference graph,
//! shot rendering, video generation and final export. State flows through
//! `muvi-state` under per-project locks; external calls flow through
//! `muvi-gen` with retry and cost tracking.

mod analyzer;
mod beat;
mod context;
mod costs;
mod debug_log;
mod download;
mod error;
mod export;
mod export_status;
mod planner;
mod refgraph;
mod renderer;
mod thumbs;
mod uploads;
mod video;

pub use analyzer::AudioAnalyzer;
pub use beat::detect_bpm;
pub use context::{EngineContext, DEFAULT_IMAGE_PERMITS, DEFAULT_VIDEO_PERMITS};
pub use costs::{record_cost, SessionCost};
pub use export::{export, ExportOptions, ExportResult};
pub use export_status::{ExportPhase, ExportStatus, ExportStatusMap};
pub use planner::{repair, tighten, CastResolver, RepairReport, StoryboardPlanner};
pub use refgraph::{RefVariant, ReferenceGraph};
pub use renderer::{assemble_prompt, is_closeup, select_refs, RenderOrchestrator};
pub use uploads::{prewarm_upload_cache, upload_local_ref};
pub use video::{generate_batch, motion_prompt, BatchReport, VideoGenerator};

pub use error::{EngineError, EngineResult};
