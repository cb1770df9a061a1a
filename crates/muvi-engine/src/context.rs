//! The engine context.
//!
//! Owns every process-wide store (session costs, export status, the
//! generation semaphores) plus the seams to the outside world. One value,
//! created at startup and passed to every handler; no globals.

use std::sync::Arc;

use tokio::sync::Semaphore;

use muvi_gen::{GenerationBackend, LlmClient, PricingTable};
use muvi_media::MediaMuxer;
use muvi_state::StateStore;
use muvi_storage::PathManager;

use crate::costs::SessionCost;
use crate::export_status::ExportStatusMap;

/// Default cap on parallel image generations.
pub const DEFAULT_IMAGE_PERMITS: usize = 6;

/// Default cap on parallel video generations.
pub const DEFAULT_VIDEO_PERMITS: usize = 8;

/// Shared engine state and collaborators.
pub struct EngineContext {
    pub store: Arc<StateStore>,
    pub backend: Arc<dyn GenerationBackend>,
    pub llm: Arc<dyn LlmClient>,
    pub muxer: Arc<dyn MediaMuxer>,
    pub pricing: Arc<PricingTable>,
    pub session_costs: SessionCost,
    pub export_status: ExportStatusMap,
    pub image_permits: Arc<Semaphore>,
    pub video_permits: Arc<Semaphore>,
    pub http: reqwest::Client,
}

impl EngineContext {
    pub fn new(
        store: Arc<StateStore>,
        backend: Arc<dyn GenerationBackend>,
        llm: Arc<dyn LlmClient>,
        muxer: Arc<dyn MediaMuxer>,
    ) -> Self {
        Self {
            store,
            backend,
            llm,
            muxer,
            pricing: Arc::new(PricingTable::new()),
            session_costs: SessionCost::new(),
            export_status: ExportStatusMap::new(),
            image_permits: Arc::new(Semaphore::new(DEFAULT_IMAGE_PERMITS)),
            video_permits: Arc::new(Semaphore::new(DEFAULT_VIDEO_PERMITS)),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_permits(mut self, image: usize, video: usize) -> Self {
        self.image_permits = Arc::new(Semaphore::new(image));
        self.video_permits = Arc::new(Semaphore::new(video));
        self
    }

    pub fn paths(&self) -> &PathManager {
        self.store.paths()
    }
}
