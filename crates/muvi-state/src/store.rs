//! The state store: one canonical `project.json` per project.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use muvi_models::{
    validate_state, ProjectId, ProjectState, RenderStatus, ValidationReport, STATE_VERSION,
};
use muvi_storage::{names, PathManager};

use crate::error::{StateError, StateResult};
use crate::locks::{ProjectGuard, ProjectLocks};

/// Options for a save.
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Run invariant validation before writing.
    pub validate: bool,
    /// Fail the save on validation errors instead of warning.
    pub strict: bool,
    /// Allow saving a state created by a different version, migrating it
    /// to the current one.
    pub force: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            strict: false,
            force: false,
        }
    }
}

impl SaveOptions {
    /// Options used inside reload-mutate-save cycles: the state was just
    /// loaded, so version migration is expected.
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }
}

/// Loads, saves and validates project state documents.
pub struct StateStore {
    paths: PathManager,
    locks: ProjectLocks,
    /// id -> project folder, persisted as a pointer file in the workspace.
    index: Mutex<HashMap<ProjectId, PathBuf>>,
    http: reqwest::Client,
}

impl StateStore {
    pub fn new(paths: PathManager) -> StateResult<Self> {
        let index_path = Self::index_path(&paths);
        let index = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str::<HashMap<ProjectId, PathBuf>>(&raw).unwrap_or_else(|e| {
                warn!("project index unreadable, rebuilding: {}", e);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        Ok(Self {
            paths,
            locks: ProjectLocks::new(),
            index: Mutex::new(index),
            http: reqwest::Client::new(),
        })
    }

    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    fn index_path(paths: &PathManager) -> PathBuf {
        paths.workspace_root().join("projects_index.json")
    }

    fn persist_index(&self) -> StateResult<()> {
        let index = self.index.lock().expect("project index poisoned");
        let body = serde_json::to_string_pretty(&*index)?;
        std::fs::write(Self::index_path(&self.paths), body)?;
        Ok(())
    }

    fn index_lookup(&self, project_id: ProjectId) -> Option<PathBuf> {
        self.index
            .lock()
            .expect("project index poisoned")
            .get(&project_id)
            .cloned()
    }

    fn index_insert(&self, project_id: ProjectId, folder: PathBuf) -> StateResult<()> {
        self.index
            .lock()
            .expect("project index poisoned")
            .insert(project_id, folder);
        self.persist_index()
    }

    /// Folders of every indexed project, for filename-based lookups that
    /// have no project context (static file serving).
    pub fn project_folders(&self) -> Vec<PathBuf> {
        self.index
            .lock()
            .expect("project index poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// All known project ids (indexed plus legacy folders).
    pub fn list_ids(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self
            .index
            .lock()
            .expect("project index poisoned")
            .keys()
            .copied()
            .collect();
        for (id, _) in self.scan_legacy_folders() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Acquire the project's mutation lock.
    pub async fn lock(&self, project_id: ProjectId) -> ProjectGuard {
        self.locks.acquire(project_id).await
    }

    /// Acquire without waiting; `None` means another task is mutating.
    pub fn try_lock(&self, project_id: ProjectId) -> Option<ProjectGuard> {
        self.locks.try_acquire(project_id)
    }

    /// Register a freshly created project and write its first document.
    pub async fn create(&self, state: &mut ProjectState) -> StateResult<()> {
        let _guard = self.lock(state.project.id).await;
        self.paths.ensure_project_structure(state)?;
        self.save_unlocked(state, SaveOptions::default()).await?;
        Ok(())
    }

    /// Load a project under its lock, running recovery and migration.
    pub async fn load(&self, project_id: ProjectId) -> StateResult<ProjectState> {
        let _guard = self.lock(project_id).await;
        self.load_unlocked(project_id).await
    }

    /// Load without acquiring the lock. The caller must hold the project
    /// guard.
    pub async fn load_unlocked(&self, project_id: ProjectId) -> StateResult<ProjectState> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(folder) = self.index_lookup(project_id) {
            candidates.push(folder.join("project.json"));
        }
        for (id, file) in self.scan_legacy_folders() {
            if id == project_id && !candidates.contains(&file) {
                candidates.push(file);
            }
        }

        // Prefer the copy with the newest updated_at when a legacy stub
        // and a project_location copy both survive.
        let mut best: Option<ProjectState> = None;
        for file in candidates {
            match self.read_document(&file) {
                Ok(state) => {
                    let newer = best
                        .as_ref()
                        .map(|b| state.project.updated_at > b.project.updated_at)
                        .unwrap_or(true);
                    if newer {
                        best = Some(state);
                    }
                }
                Err(e) => warn!("skipping unreadable state at {}: {}", file.display(), e),
            }
        }

        let mut state = best.ok_or(StateError::NotFound(project_id))?;

        let recovered = self.recover_orphaned_renders(&mut state)?;
        let migrated = self.migrate_external_to_local(&mut state).await;
        if recovered > 0 || migrated > 0 {
            debug!(
                "load fixed up state: {} renders recovered, {} URLs localized",
                recovered, migrated
            );
            self.save_unlocked(&mut state, SaveOptions::forced()).await?;
        }

        Ok(state)
    }

    fn read_document(&self, file: &Path) -> StateResult<ProjectState> {
        if !file.exists() {
            return Err(StateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                file.display().to_string(),
            )));
        }
        let raw = std::fs::read_to_string(file)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn scan_legacy_folders(&self) -> Vec<(ProjectId, PathBuf)> {
        let projects_dir = self.paths.workspace_root().join("projects");
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir(&projects_dir) else {
            return found;
        };
        for entry in entries.flatten() {
            let file = entry.path().join("project.json");
            if !file.is_file() {
                continue;
            }
            // Only the id is needed here; skip full deserialization.
            if let Ok(raw) = std::fs::read_to_string(&file) {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                    if let Some(id) = value
                        .pointer("/project/id")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse::<ProjectId>().ok())
                    {
                        found.push((id, file));
                    }
                }
            }
        }
        found
    }

    /// Save under the project lock.
    pub async fn save(&self, state: &mut ProjectState, options: SaveOptions) -> StateResult<()> {
        let _guard = self.lock(state.project.id).await;
        self.save_unlocked(state, options).await
    }

    /// Save without acquiring the lock. The caller must hold the project
    /// guard.
    pub async fn save_unlocked(
        &self,
        state: &mut ProjectState,
        options: SaveOptions,
    ) -> StateResult<()> {
        if state.project.created_version != STATE_VERSION && !options.force {
            return Err(StateError::VersionMismatch {
                id: state.project.id,
                found: state.project.created_version.clone(),
                current: STATE_VERSION.to_string(),
            });
        }
        state.project.created_version = STATE_VERSION.to_string();
        state.project.updated_at = Utc::now();

        if options.validate {
            let report = self.validate(state, options.strict)?;
            for error in &report.errors {
                warn!(project_id = %state.project.id, "validation: {}", error);
            }
        }

        let file = self.paths.state_file(state)?;
        write_atomic(&file, &serde_json::to_vec_pretty(&*state)?)?;

        let folder = self.paths.project_folder(state)?;
        self.index_insert(state.project.id, folder)?;
        debug!(project_id = %state.project.id, "saved {}", file.display());
        Ok(())
    }

    /// Validate against the model invariants; `strict` turns errors into
    /// a failure.
    pub fn validate(&self, state: &ProjectState, strict: bool) -> StateResult<ValidationReport> {
        let report = validate_state(state, Some(&self.paths));
        if strict && !report.ok() {
            return Err(StateError::Validation(report.errors.join("; ")));
        }
        Ok(report)
    }

    /// Delete a project: its folder and its index entry.
    pub async fn delete(&self, project_id: ProjectId) -> StateResult<()> {
        let _guard = self.lock(project_id).await;
        let state = self.load_unlocked(project_id).await?;
        let folder = self.paths.project_folder(&state)?;
        std::fs::remove_dir_all(&folder)?;
        self.index
            .lock()
            .expect("project index poisoned")
            .remove(&project_id);
        self.persist_index()?;
        info!(project_id = %project_id, "deleted project at {}", folder.display());
        Ok(())
    }

    /// Reconcile shot renders with the files actually on disk.
    ///
    /// Two directions: a done render whose file vanished is cleared back
    /// to `none`; a shot with no recorded image whose expected file exists
    /// gets the render filled in. Returns how many shots changed.
    pub fn recover_orphaned_renders(&self, state: &mut ProjectState) -> StateResult<usize> {
        let renders_dir = self.paths.renders_dir(state)?;
        let mut changed = 0;

        // Resolution needs an immutable borrow of the whole state, so
        // collect the updates first.
        let mut to_clear = Vec::new();
        let mut to_fill = Vec::new();

        for (idx, shot) in state.storyboard.shots.iter().enumerate() {
            match (shot.render.status, shot.render.image_url.as_deref()) {
                (RenderStatus::Done, Some(url)) => {
                    if self.paths.from_url_existing(url, Some(state)).is_err() {
                        to_clear.push(idx);
                    }
                }
                (RenderStatus::Done, None) => to_clear.push(idx),
                _ => {
                    if let Some(found) = newest_render_on_disk(&renders_dir, &shot.shot_id) {
                        to_fill.push((idx, found));
                    }
                }
            }
        }

        for idx in to_clear {
            let shot_id = state.storyboard.shots[idx].shot_id.clone();
            warn!("render file for {} is gone, clearing state", shot_id);
            state.storyboard.shots[idx].render.clear();
            changed += 1;
        }
        for (idx, file) in to_fill {
            let url = self.paths.to_url(&file);
            debug!(
                "recovered orphaned render for {} from {}",
                state.storyboard.shots[idx].shot_id,
                file.display()
            );
            state.storyboard.shots[idx]
                .render
                .complete(url, "recovered".to_string(), Vec::new());
            changed += 1;
        }

        Ok(changed)
    }

    /// Download externally hosted artifacts referenced by state into the
    /// project folder and swap the references to local URLs. Failures are
    /// tolerated per URL. Returns how many references were localized.
    pub async fn migrate_external_to_local(&self, state: &mut ProjectState) -> usize {
        let Ok(renders_dir) = self.paths.renders_dir(state) else {
            return 0;
        };

        // Collect (current URL, target file) pairs from every subtree that
        // can hold an external reference.
        let mut wanted: Vec<(String, PathBuf)> = Vec::new();
        for shot in &state.storyboard.shots {
            if let Some(url) = shot.render.image_url.as_deref() {
                if is_external(url) {
                    wanted.push((
                        url.to_string(),
                        renders_dir.join(names::shot_render(&shot.shot_id)),
                    ));
                }
            }
        }
        for (cast_id, refs) in &state.cast_matrix.character_refs {
            for (variant, slot) in [('a', refs.ref_a.as_deref()), ('b', refs.ref_b.as_deref())] {
                if let Some(url) = slot {
                    if is_external(url) {
                        wanted.push((url.to_string(), renders_dir.join(names::cast_ref(cast_id, variant))));
                    }
                }
            }
        }
        for scene in &state.cast_matrix.scenes {
            for (idx, url) in scene.decor_refs.iter().enumerate() {
                if is_external(url) {
                    wanted.push((
                        url.to_string(),
                        renders_dir.join(names::scene_decor(&scene.scene_id, idx > 0)),
                    ));
                }
            }
            if let Some(url) = scene.wardrobe_ref.as_deref() {
                if is_external(url) {
                    wanted.push((url.to_string(), renders_dir.join(names::scene_wardrobe(&scene.scene_id))));
                }
            }
        }

        let mut replacements: HashMap<String, String> = HashMap::new();
        for (url, target) in wanted {
            if replacements.contains_key(&url) {
                continue;
            }
            match self.download(&url, &target).await {
                Ok(()) => {
                    replacements.insert(url, self.paths.to_url(&target));
                }
                Err(e) => warn!("keeping external URL, download failed: {} ({})", url, e),
            }
        }

        if replacements.is_empty() {
            return 0;
        }

        let mut migrated = 0;
        for shot in &mut state.storyboard.shots {
            if let Some(url) = shot.render.image_url.as_mut() {
                if let Some(local) = replacements.get(url.as_str()) {
                    *url = local.clone();
                    migrated += 1;
                }
            }
        }
        for refs in state.cast_matrix.character_refs.values_mut() {
            for slot in [&mut refs.ref_a, &mut refs.ref_b] {
                if let Some(url) = slot.as_mut() {
                    if let Some(local) = replacements.get(url.as_str()) {
                        *url = local.clone();
                        migrated += 1;
                    }
                }
            }
        }
        for scene in &mut state.cast_matrix.scenes {
            for url in &mut scene.decor_refs {
                if let Some(local) = replacements.get(url.as_str()) {
                    *url = local.clone();
                    migrated += 1;
                }
            }
            if let Some(url) = scene.wardrobe_ref.as_mut() {
                if let Some(local) = replacements.get(url.as_str()) {
                    *url = local.clone();
                    migrated += 1;
                }
            }
        }

        info!("localized {} external references", migrated);
        migrated
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), String> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        tokio::fs::write(target, &bytes).await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn is_external(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// The most recent still on disk for a shot (renders carry unique
/// per-run suffixes).
fn newest_render_on_disk(renders_dir: &Path, shot_id: &muvi_models::ShotId) -> Option<PathBuf> {
    let entries = std::fs::read_dir(renders_dir).ok()?;
    entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|name| names::is_shot_render(name, shot_id))
                .unwrap_or(false)
        })
        .max_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
        .map(|e| e.path())
}

/// Write via a temp file in the same directory, then rename.
fn write_atomic(file: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = file.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muvi_models::{Project, Sequence, SequenceId, Shot, ShotId, StructureType};
    use tempfile::TempDir;

    fn new_store() -> (TempDir, StateStore) {
        let tmp = TempDir::new().unwrap();
        let paths = PathManager::new(tmp.path()).unwrap();
        let store = StateStore::new(paths).unwrap();
        (tmp, store)
    }

    fn new_state(tmp: &TempDir, title: &str) -> ProjectState {
        let mut state = ProjectState::new(Project::new(title, STATE_VERSION));
        state.project.project_location = Some(
            tmp.path()
                .join("chosen")
                .join(title)
                .to_string_lossy()
                .into_owned(),
        );
        state
    }

    fn shot_in(seq: usize, idx: usize, start: f64, end: f64) -> Shot {
        let sequence_id = SequenceId::from_index(seq);
        Shot {
            shot_id: ShotId::for_sequence(&sequence_id, idx),
            sequence_id,
            start,
            end,
            structure_type: StructureType::Verse,
            energy: 0.5,
            cast: vec![],
            wardrobe: Default::default(),
            intent: String::new(),
            camera_language: String::new(),
            environment: String::new(),
            symbolic_elements: vec![],
            prompt_base: String::new(),
            render: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_load_round_trip() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Roundtrip");
        store.create(&mut state).await.unwrap();

        let loaded = store.load(state.project.id).await.unwrap();
        assert_eq!(loaded.project.title, "Roundtrip");
        assert_eq!(loaded.project.id, state.project.id);
    }

    #[tokio::test]
    async fn test_load_unknown_project() {
        let (_tmp, store) = new_store();
        let err = store.load(ProjectId::new()).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_version_gate() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Old");
        state.project.created_version = "0.1.0".to_string();

        let err = store
            .save(&mut state, SaveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::VersionMismatch { .. }));

        store.save(&mut state, SaveOptions::forced()).await.unwrap();
        assert_eq!(state.project.created_version, STATE_VERSION);
    }

    #[tokio::test]
    async fn test_save_refreshes_updated_at() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Stamp");
        let before = state.project.updated_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.save(&mut state, SaveOptions::default()).await.unwrap();
        assert!(state.project.updated_at > before);
    }

    #[tokio::test]
    async fn test_newest_copy_wins() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Twin");
        store.create(&mut state).await.unwrap();

        // Plant an older legacy stub for the same project id.
        let legacy_dir = tmp.path().join("projects").join("Twin_v0.1.0");
        std::fs::create_dir_all(&legacy_dir).unwrap();
        let mut stale = state.clone();
        stale.project.title = "Twin (stale)".to_string();
        stale.project.updated_at = Utc::now() - chrono::Duration::hours(2);
        std::fs::write(
            legacy_dir.join("project.json"),
            serde_json::to_vec_pretty(&stale).unwrap(),
        )
        .unwrap();

        let loaded = store.load(state.project.id).await.unwrap();
        assert_eq!(loaded.project.title, "Twin");
    }

    #[tokio::test]
    async fn test_recover_orphaned_render_from_disk() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Recover");
        state.storyboard.sequences.push(Sequence {
            sequence_id: SequenceId::from_index(0),
            label: "One".into(),
            start: 0.0,
            end: 4.0,
            structure_type: StructureType::Intro,
            energy: 0.2,
            cast: vec![],
            description: String::new(),
            arc_start: String::new(),
            arc_end: String::new(),
            lyrics_reference: String::new(),
            start_frame_prompt: String::new(),
            end_frame_prompt: String::new(),
        });
        state.storyboard.shots.push(shot_in(0, 0, 0.0, 4.0));
        store.create(&mut state).await.unwrap();

        // A render landed on disk but never made it into state.
        let renders = store.paths().renders_dir(&state).unwrap();
        std::fs::write(renders.join("seq_01_sh01.png"), b"png").unwrap();

        let loaded = store.load(state.project.id).await.unwrap();
        let render = &loaded.storyboard.shots[0].render;
        assert_eq!(render.status, RenderStatus::Done);
        assert!(render.image_url.is_some());
    }

    #[tokio::test]
    async fn test_clear_done_render_with_missing_file() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Vanished");
        state.storyboard.sequences.push(Sequence {
            sequence_id: SequenceId::from_index(0),
            label: "One".into(),
            start: 0.0,
            end: 4.0,
            structure_type: StructureType::Intro,
            energy: 0.2,
            cast: vec![],
            description: String::new(),
            arc_start: String::new(),
            arc_end: String::new(),
            lyrics_reference: String::new(),
            start_frame_prompt: String::new(),
            end_frame_prompt: String::new(),
        });
        let mut shot = shot_in(0, 0, 0.0, 4.0);
        shot.render.complete(
            "/files/projects/Vanished/renders/gone.png".into(),
            "nanobanana".into(),
            vec![],
        );
        state.storyboard.shots.push(shot);
        store.create(&mut state).await.unwrap();

        let loaded = store.load(state.project.id).await.unwrap();
        assert_eq!(loaded.storyboard.shots[0].render.status, RenderStatus::None);
        assert!(loaded.storyboard.shots[0].render.image_url.is_none());
    }

    #[tokio::test]
    async fn test_migrate_external_to_local() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"image-bytes".to_vec()))
            .mount(&server)
            .await;

        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Localize");
        state.cast_matrix.character_refs.insert(
            "lead_1".into(),
            muvi_models::CharacterRefs {
                ref_a: Some(format!("{}/gen/a.png", server.uri())),
                ref_b: None,
            },
        );

        let migrated = store.migrate_external_to_local(&mut state).await;
        assert_eq!(migrated, 1);

        let refs = state
            .cast_matrix
            .character_refs
            .get(&muvi_models::CastId::new("lead_1"))
            .unwrap();
        let local = refs.ref_a.as_deref().unwrap();
        assert!(local.starts_with("/files/"), "got {local}");
        let resolved = store.paths().from_url_existing(local, Some(&state)).unwrap();
        assert_eq!(std::fs::read(resolved).unwrap(), b"image-bytes");
    }

    #[tokio::test]
    async fn test_delete_removes_folder_and_index() {
        let (tmp, store) = new_store();
        let mut state = new_state(&tmp, "Doomed");
        store.create(&mut state).await.unwrap();
        let folder = store.paths().project_folder(&state).unwrap();
        assert!(folder.exists());

        store.delete(state.project.id).await.unwrap();
        assert!(!folder.exists());
        assert!(!store.list_ids().contains(&state.project.id));
    }
}
