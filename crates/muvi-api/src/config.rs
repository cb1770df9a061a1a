//! API configuration.

use std::path::PathBuf;

use muvi_storage::Settings;

/// Server configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Root for global temp and legacy projects.
    pub workspace_root: PathBuf,
    /// Parallel image generations.
    pub image_permits: usize,
    /// Parallel video generations.
    pub video_permits: usize,
    /// Optional live price sheet URL, refreshed at startup.
    pub price_sheet_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workspace_root: PathBuf::from("workspace"),
            image_permits: muvi_engine::DEFAULT_IMAGE_PERMITS,
            video_permits: muvi_engine::DEFAULT_VIDEO_PERMITS,
            price_sheet_url: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let settings = Settings::from_env();
        Self {
            host: std::env::var("MUVI_HOST").unwrap_or(defaults.host),
            port: std::env::var("MUVI_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            workspace_root: settings.workspace_root,
            image_permits: std::env::var("MUVI_IMAGE_PERMITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.image_permits),
            video_permits: std::env::var("MUVI_VIDEO_PERMITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.video_permits),
            price_sheet_url: std::env::var("MUVI_PRICE_SHEET_URL").ok(),
        }
    }
}
