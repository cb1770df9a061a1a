//! Application state.

use std::sync::Arc;

use muvi_engine::EngineContext;
use muvi_gen::{FalBackend, FalLlmClient};
use muvi_media::FfmpegMuxer;
use muvi_state::StateStore;
use muvi_storage::PathManager;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub ctx: Arc<EngineContext>,
}

impl AppState {
    /// Build the full stack from config and environment. Credentials are
    /// checked here so a misconfigured deployment fails at startup, not
    /// on the first render.
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let paths = PathManager::new(config.workspace_root.clone())?;
        let store = Arc::new(StateStore::new(paths)?);

        let backend = Arc::new(FalBackend::from_env()?);
        let llm = Arc::new(FalLlmClient::from_env()?);
        let muxer = Arc::new(FfmpegMuxer::new());

        let ctx = EngineContext::new(store, backend, llm, muxer)
            .with_permits(config.image_permits, config.video_permits);

        Ok(Self {
            config,
            ctx: Arc::new(ctx),
        })
    }
}
