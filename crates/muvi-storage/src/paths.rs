//! Project folder resolution and URL mapping.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use muvi_models::{sanitize_filename, FileResolver, ProjectState};

use crate::error::{StorageError, StorageResult};

/// Subfolders every project folder carries.
const PROJECT_SUBDIRS: &[&str] = &["renders", "audio", "video", "exports", "llm", "temp"];

/// Resolves filesystem locations for projects and maps paths to `/files/`
/// URLs and back.
#[derive(Debug, Clone)]
pub struct PathManager {
    workspace_root: PathBuf,
}

impl PathManager {
    /// Create a manager rooted at the global workspace. The workspace holds
    /// global temp/cache plus legacy project folders; current projects live
    /// wherever their `project_location` points.
    pub fn new(workspace_root: impl Into<PathBuf>) -> StorageResult<Self> {
        let workspace_root = workspace_root.into();
        std::fs::create_dir_all(workspace_root.join("projects"))?;
        std::fs::create_dir_all(workspace_root.join("temp"))?;
        Ok(Self { workspace_root })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Global temp directory.
    pub fn temp_dir(&self) -> PathBuf {
        self.workspace_root.join("temp")
    }

    /// The project's root folder.
    ///
    /// `project_location` wins; projects predating user-chosen locations
    /// fall back to `<workspace>/projects/<title>_v<created_version>`.
    /// Created on first call.
    pub fn project_folder(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        let folder = match &state.project.project_location {
            Some(location) => PathBuf::from(location),
            None => {
                let name = format!(
                    "{}_v{}",
                    sanitize_filename(&state.project.title, 30),
                    state.project.created_version
                );
                let folder = self.workspace_root.join("projects").join(name);
                warn!(
                    project_id = %state.project.id,
                    "project has no project_location, using legacy path {}",
                    folder.display()
                );
                folder
            }
        };
        std::fs::create_dir_all(&folder)?;
        Ok(folder)
    }

    fn project_subdir(&self, state: &ProjectState, name: &str) -> StorageResult<PathBuf> {
        let dir = self.project_folder(state)?.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn renders_dir(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        self.project_subdir(state, "renders")
    }

    pub fn audio_dir(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        self.project_subdir(state, "audio")
    }

    pub fn video_dir(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        self.project_subdir(state, "video")
    }

    pub fn exports_dir(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        self.project_subdir(state, "exports")
    }

    pub fn llm_dir(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        self.project_subdir(state, "llm")
    }

    pub fn project_temp_dir(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        self.project_subdir(state, "temp")
    }

    /// Path to the canonical state document.
    pub fn state_file(&self, state: &ProjectState) -> StorageResult<PathBuf> {
        Ok(self.project_folder(state)?.join("project.json"))
    }

    /// A unique temp file path in the global temp dir (not created).
    pub fn temp_file(&self, prefix: &str, suffix: &str) -> PathBuf {
        let name = format!("{}_{}{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..8], suffix);
        self.temp_dir().join(name)
    }

    /// Convert a filesystem path to a stable URL.
    ///
    /// Paths under the workspace become `/files/<rel>`; paths elsewhere
    /// (project folders) are encoded by name under `/files/` and found
    /// again through the project-folder search in `from_url`. External
    /// URLs pass through.
    pub fn to_url(&self, path: &Path) -> String {
        let as_str = path.to_string_lossy();
        if as_str.starts_with("http://") || as_str.starts_with("https://") {
            return as_str.into_owned();
        }
        match path.strip_prefix(&self.workspace_root) {
            Ok(rel) => format!("/files/{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => format!(
                "/files/{}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        }
    }

    /// Convert a `/files/...` (or legacy `/renders/...`) URL back to a
    /// filesystem path.
    ///
    /// With a state, URLs that do not resolve directly are searched for in
    /// the project folder (renders/, video/, audio/, then the root).
    /// External URLs are an error.
    pub fn from_url(&self, url: &str, state: Option<&ProjectState>) -> StorageResult<PathBuf> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(StorageError::ExternalUrl(url.to_string()));
        }

        if let Some(rel) = url.strip_prefix("/files/") {
            let direct = self.workspace_root.join(rel);
            if direct.exists() {
                return Ok(direct);
            }
            if let Some(state) = state {
                if let Some(found) = self.find_in_project(rel, state) {
                    return Ok(found);
                }
            }
            return Ok(direct);
        }

        if let Some(rel) = url.strip_prefix("/renders/") {
            // Legacy scheme: try the raw relative path, then the workspace
            // renders dir, then the project folder.
            let direct = self.workspace_root.join(rel);
            if direct.exists() {
                return Ok(direct);
            }
            let renders = self.workspace_root.join("renders").join(rel);
            if renders.exists() {
                return Ok(renders);
            }
            if let Some(state) = state {
                if let Some(found) = self.find_in_project(rel, state) {
                    return Ok(found);
                }
            }
            return Ok(direct);
        }

        Err(StorageError::InvalidUrl(url.to_string()))
    }

    /// Like `from_url` but demands the file exists.
    pub fn from_url_existing(&self, url: &str, state: Option<&ProjectState>) -> StorageResult<PathBuf> {
        let path = self.from_url(url, state)?;
        if path.exists() {
            Ok(path)
        } else {
            Err(StorageError::FileNotFound(path))
        }
    }

    fn find_in_project(&self, rel: &str, state: &ProjectState) -> Option<PathBuf> {
        let folder = self.project_folder(state).ok()?;
        let exact = folder.join(rel);
        if exact.exists() {
            return Some(exact);
        }
        let filename = Path::new(rel).file_name()?;
        for subdir in ["renders", "video", "audio", ""] {
            let candidate = if subdir.is_empty() {
                folder.join(filename)
            } else {
                folder.join(subdir).join(filename)
            };
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// Remove files older than `max_age_hours` from the global temp dir.
    /// Returns how many were removed.
    pub fn cleanup_temp(&self, max_age_hours: u64) -> StorageResult<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(max_age_hours * 3600);
        let mut removed = 0;

        for entry in std::fs::read_dir(self.temp_dir())? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    warn!("failed to stat temp file {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified < cutoff {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("failed to remove temp file {}: {}", path.display(), e);
                } else {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("cleaned up {} temp files", removed);
        }
        Ok(removed)
    }

    /// Empty a project's temp folder (after export).
    pub fn cleanup_project_temp(&self, state: &ProjectState) -> StorageResult<usize> {
        let dir = self.project_temp_dir(state)?;
        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Make sure all project subfolders exist.
    pub fn ensure_project_structure(&self, state: &ProjectState) -> StorageResult<()> {
        for sub in PROJECT_SUBDIRS {
            self.project_subdir(state, sub)?;
        }
        Ok(())
    }
}

impl FileResolver for PathManager {
    fn resolve(&self, url: &str, state: &ProjectState) -> Option<PathBuf> {
        self.from_url_existing(url, Some(state)).ok()
    }

    fn project_folder(&self, state: &ProjectState) -> Option<PathBuf> {
        PathManager::project_folder(self, state).ok()
    }
}
