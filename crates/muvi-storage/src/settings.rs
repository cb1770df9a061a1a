//! Workspace settings.

use std::path::PathBuf;

/// User-level settings the storage layer needs.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for global temp/cache and legacy project folders.
    pub workspace_root: PathBuf,
    /// Default parent folder offered for new project locations.
    pub default_projects_root: PathBuf,
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// `MUVI_WORKSPACE` overrides the workspace root; the default is
    /// `./workspace` relative to the working directory.
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("MUVI_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("workspace"));
        let default_projects_root = std::env::var("MUVI_PROJECTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| workspace_root.join("projects"));
        Self {
            workspace_root,
            default_projects_root,
        }
    }
}
