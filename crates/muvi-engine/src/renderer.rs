//! Shot rendering: prompt assembly, reference selection, dispatch and
//! atomic result persistence.
//!
//! Renders run concurrently across shots and projects. Nothing is
//! persisted until the terminal outcome; the final write is a
//! reload-mutate-save under the project lock so parallel renders never
//! lose each other's updates.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};

use muvi_models::{CastId, ProjectId, ProjectState, Shot, ShotId, StylePreset};
use muvi_gen::{retry, RetryPolicy};
use muvi_state::SaveOptions;
use muvi_storage::names;

use crate::context::EngineContext;
use crate::costs::record_cost;
use crate::debug_log;
use crate::download::download_to;
use crate::error::{EngineError, EngineResult};
use crate::thumbs;
use crate::uploads::upload_local_ref;

/// Fixed negative suffix on every shot prompt.
const RENDER_NEGATIVES: &str = "no text, no watermark, no subtitles, no logo";

/// Camera-language markers that switch reference selection to the
/// close-up ref.
const CLOSEUP_MARKERS: &[&str] = &["close-up", "closeup", "portrait", "head shot", "face", "eyes"];

/// At most this many cast identities ride along per shot render.
const MAX_CAST_REFS_PER_SHOT: usize = 2;

/// Whether a shot reads as a close-up.
pub fn is_closeup(camera_language: &str) -> bool {
    let lowered = camera_language.to_lowercase();
    CLOSEUP_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn energy_tokens(energy: f64) -> &'static str {
    if energy <= 0.3 {
        "quiet, slow"
    } else if energy <= 0.7 {
        "steady, medium intensity"
    } else {
        "high intensity, dramatic"
    }
}

/// Build the full generation prompt for a shot.
pub fn assemble_prompt(state: &ProjectState, shot: &Shot, negative_extra: Option<&str>) -> String {
    let preset = StylePreset::resolve(&state.project.style_preset);
    let mut parts: Vec<String> = vec![
        preset.tokens.to_string(),
        state.project.aspect.prompt_token().to_string(),
        energy_tokens(shot.energy).to_string(),
    ];
    for field in [&shot.prompt_base, &shot.camera_language, &shot.environment] {
        if !field.is_empty() {
            parts.push(field.clone());
        }
    }
    if !shot.symbolic_elements.is_empty() {
        parts.push(shot.symbolic_elements.join(", "));
    }

    // Wardrobe wins over the member's standing prompt_extra.
    for cast_id in shot.cast.iter().take(MAX_CAST_REFS_PER_SHOT) {
        let Some(member) = state.cast_member(cast_id) else {
            continue;
        };
        if let Some(outfit) = shot.wardrobe.get(cast_id) {
            parts.push(format!("{}: {}", member.name, outfit));
        } else if !member.prompt_extra.is_empty() {
            parts.push(format!("{}: {}", member.name, member.prompt_extra));
        }
    }

    parts.push(RENDER_NEGATIVES.to_string());
    if let Some(extra) = negative_extra.filter(|e| !e.trim().is_empty()) {
        parts.push(format!("no {}", extra.trim().trim_start_matches("no ")));
    }
    parts.join(", ")
}

/// Pick the reference images for a shot: cast identities (close-up aware)
/// plus the sequence's decor and wardrobe preview.
///
/// The style lock never appears here; it anchors cast-ref generation
/// only.
pub fn select_refs(state: &ProjectState, shot: &Shot) -> Vec<String> {
    let closeup = is_closeup(&shot.camera_language);
    let mut refs = Vec::new();

    for cast_id in shot.cast.iter().take(MAX_CAST_REFS_PER_SHOT) {
        let Some(char_refs) = state.cast_matrix.refs_for(cast_id) else {
            continue;
        };
        let preferred = if closeup {
            char_refs.ref_b.as_ref()
        } else {
            char_refs.ref_a.as_ref()
        };
        if let Some(url) = preferred.or(char_refs.ref_a.as_ref()) {
            refs.push(url.clone());
        }
    }

    if let Some(scene) = state.cast_matrix.scene_for_sequence(&shot.sequence_id) {
        if let Some(decor) = scene.primary_decor() {
            refs.push(decor.to_string());
        }
        if let Some(wardrobe_ref) = &scene.wardrobe_ref {
            refs.push(wardrobe_ref.clone());
        }
    }

    refs
}

/// Drives shot renders end to end.
pub struct RenderOrchestrator<'a> {
    ctx: &'a EngineContext,
}

impl<'a> RenderOrchestrator<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Render one shot. Returns the new local image URL.
    pub async fn render_shot(
        &self,
        project_id: ProjectId,
        shot_id: &ShotId,
        negative_prompt: Option<&str>,
    ) -> EngineResult<String> {
        let mut snapshot = self.ctx.store.load(project_id).await?;
        let shot = snapshot
            .storyboard
            .shot(shot_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("shot {}", shot_id)))?;

        let prompt = assemble_prompt(&snapshot, &shot, negative_prompt);
        let local_refs = select_refs(&snapshot, &shot);

        // Bound parallel generations; the permit spans upload through
        // generation.
        let _permit = self
            .ctx
            .image_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::busy("image generation semaphore closed"))?;

        let mut external_refs = Vec::with_capacity(local_refs.len());
        for local in &local_refs {
            let (external, _) = upload_local_ref(self.ctx, &mut snapshot, local).await?;
            external_refs.push(external);
        }

        let model = snapshot.project.image_model_choice;
        let aspect = snapshot.project.aspect;
        let started = Instant::now();
        let policy = RetryPolicy::new(format!("render {}", shot_id));
        let result = if external_refs.is_empty() {
            let p = prompt.clone();
            retry(&policy, || self.ctx.backend.text_to_image(model, &p, aspect)).await
        } else {
            let p = prompt.clone();
            let refs = external_refs.clone();
            retry(&policy, || self.ctx.backend.edit_image(model, &p, &refs, aspect)).await
        };

        let generated = match result {
            Ok(url) => url,
            Err(e) => {
                let message = e.to_string();
                self.finalize(project_id, &snapshot, shot_id, None, |shot_render| {
                    shot_render.fail(message.clone());
                })
                .await?;
                debug_log::record_failure(
                    self.ctx.paths(),
                    &snapshot,
                    "shot_render",
                    json!({ "shot_id": shot_id, "prompt": prompt }),
                    &message,
                );
                return Err(e.into());
            }
        };

        let renders = self.ctx.paths().renders_dir(&snapshot)?;
        let target = renders.join(names::shot_render_unique(shot_id));
        download_to(&self.ctx.http, &generated, &target).await?;
        thumbs::write_thumbnail(&target);
        let image_url = self.ctx.paths().to_url(&target);

        let cost = self.ctx.pricing.cost_of(if external_refs.is_empty() {
            model.t2i_endpoint()
        } else {
            model.edit_endpoint()
        });

        let completed_url = image_url.clone();
        let completed_model = model.as_str().to_string();
        let refs_used = external_refs.clone();
        let saved = self
            .finalize(
                project_id,
                &snapshot,
                shot_id,
                Some((model.as_str(), cost, "shot_render")),
                move |shot_render| {
                    shot_render.complete(
                        completed_url.clone(),
                        completed_model.clone(),
                        refs_used.clone(),
                    );
                },
            )
            .await?;

        debug_log::record_call(
            self.ctx.paths(),
            &saved,
            "shot_render",
            json!({ "shot_id": shot_id, "prompt": prompt, "refs": external_refs }),
            &json!({ "url": generated, "local": image_url }),
            started.elapsed().as_millis(),
            cost,
        );

        info!("rendered {} -> {}", shot_id, image_url);
        Ok(image_url)
    }

    /// Img2img over an existing render.
    pub async fn edit_shot(
        &self,
        project_id: ProjectId,
        shot_id: &ShotId,
        edit_prompt: &str,
        extra_cast: &[CastId],
        ref_image: Option<String>,
    ) -> EngineResult<String> {
        let mut snapshot = self.ctx.store.load(project_id).await?;
        let shot = snapshot
            .storyboard
            .shot(shot_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("shot {}", shot_id)))?;
        let current = shot.render.image_url.clone().ok_or_else(|| {
            EngineError::validation(format!("shot {} has no render to edit", shot_id))
        })?;

        let mut local_refs = vec![current];
        for cast_id in extra_cast {
            if let Some(url) = snapshot
                .cast_matrix
                .refs_for(cast_id)
                .and_then(|r| r.ref_a.clone())
            {
                local_refs.push(url);
            }
        }
        if let Some(extra) = ref_image {
            local_refs.push(extra);
        }

        let preset = StylePreset::resolve(&snapshot.project.style_preset);
        let prompt = format!("{}, {}, {}", preset.tokens, edit_prompt.trim(), RENDER_NEGATIVES);

        let _permit = self
            .ctx
            .image_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::busy("image generation semaphore closed"))?;

        let mut external_refs = Vec::with_capacity(local_refs.len());
        for local in &local_refs {
            let (external, _) = upload_local_ref(self.ctx, &mut snapshot, local).await?;
            external_refs.push(external);
        }

        let model = snapshot.project.image_model_choice;
        let aspect = snapshot.project.aspect;
        let started = Instant::now();
        let policy = RetryPolicy::new(format!("edit {}", shot_id));
        let p = prompt.clone();
        let refs = external_refs.clone();
        let generated = retry(&policy, || {
            self.ctx.backend.edit_image(model, &p, &refs, aspect)
        })
        .await?;

        let renders = self.ctx.paths().renders_dir(&snapshot)?;
        let target = renders.join(names::shot_render_unique(shot_id));
        download_to(&self.ctx.http, &generated, &target).await?;
        thumbs::write_thumbnail(&target);
        let image_url = self.ctx.paths().to_url(&target);

        let cost = self.ctx.pricing.cost_of(model.edit_endpoint());
        let completed_url = image_url.clone();
        let completed_model = model.as_str().to_string();
        let refs_used = external_refs.clone();
        let saved = self
            .finalize(
                project_id,
                &snapshot,
                shot_id,
                Some((model.as_str(), cost, "shot_edit")),
                move |shot_render| {
                    shot_render.complete(
                        completed_url.clone(),
                        completed_model.clone(),
                        refs_used.clone(),
                    );
                },
            )
            .await?;

        debug_log::record_call(
            self.ctx.paths(),
            &saved,
            "shot_edit",
            json!({ "shot_id": shot_id, "prompt": prompt, "refs": external_refs }),
            &json!({ "url": generated, "local": image_url }),
            started.elapsed().as_millis(),
            cost,
        );

        info!("edited {} -> {}", shot_id, image_url);
        Ok(image_url)
    }

    /// Upload every reference a coming batch will need.
    pub async fn prewarm(&self, project_id: ProjectId) -> EngineResult<usize> {
        let guard = self.ctx.store.lock(project_id).await;
        let mut state = self.ctx.store.load_unlocked(project_id).await?;
        let uploaded = crate::uploads::prewarm_upload_cache(self.ctx, &mut state).await?;
        if uploaded > 0 {
            self.ctx
                .store
                .save_unlocked(&mut state, SaveOptions::forced())
                .await?;
        }
        drop(guard);
        Ok(uploaded)
    }

    /// Reload-mutate-save under the project lock: apply `mutate` to the
    /// shot's render subtree, merge any upload-cache entries gathered on
    /// the snapshot, and (on success) record the call's cost. Returns the
    /// state as saved.
    async fn finalize<F>(
        &self,
        project_id: ProjectId,
        snapshot: &ProjectState,
        shot_id: &ShotId,
        cost: Option<(&str, f64, &str)>,
        mutate: F,
    ) -> EngineResult<ProjectState>
    where
        F: FnOnce(&mut muvi_models::ShotRender),
    {
        let _guard = self.ctx.store.lock(project_id).await;
        let mut fresh = self.ctx.store.load_unlocked(project_id).await?;

        for (local, external) in &snapshot.project.fal_upload_cache {
            fresh
                .project
                .fal_upload_cache
                .entry(local.clone())
                .or_insert_with(|| external.clone());
        }

        let shot = fresh
            .storyboard
            .shot_mut(shot_id)
            .ok_or_else(|| EngineError::not_found(format!("shot {} disappeared", shot_id)))?;
        mutate(&mut shot.render);

        if let Some((model, amount, note)) = cost {
            record_cost(&self.ctx.session_costs, &mut fresh, model, amount, note);
        }

        self.ctx
            .store
            .save_unlocked(&mut fresh, SaveOptions::forced())
            .await?;
        debug!("persisted render outcome for {}", shot_id);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{mock_context, project_in};
    use muvi_gen::{GenError, MockGenerationBackend, MockLlmClient};
    use muvi_media::MockMediaMuxer;
    use muvi_models::{
        CastMember, CharacterRefs, RenderStatus, Role, Scene, Sequence, SequenceId,
        StructureType,
    };
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([64, 0, 128]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    async fn image_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png()))
            .mount(&server)
            .await;
        server
    }

    fn seq(idx: usize, start: f64, end: f64) -> Sequence {
        Sequence {
            sequence_id: SequenceId::from_index(idx),
            label: format!("S{}", idx + 1),
            start,
            end,
            structure_type: StructureType::Verse,
            energy: 0.5,
            cast: vec![],
            description: String::new(),
            arc_start: String::new(),
            arc_end: String::new(),
            lyrics_reference: String::new(),
            start_frame_prompt: String::new(),
            end_frame_prompt: String::new(),
        }
    }

    fn shot(seq_idx: usize, idx: usize, start: f64, end: f64) -> Shot {
        let sequence_id = SequenceId::from_index(seq_idx);
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

    fn cast_with_refs(state: &mut ProjectState, id: &str, name: &str, a: Option<&str>, b: Option<&str>) {
        state
            .cast
            .push(CastMember::new(id.into(), name, Role::Lead));
        state.cast_matrix.character_refs.insert(
            id.into(),
            CharacterRefs {
                ref_a: a.map(str::to_string),
                ref_b: b.map(str::to_string),
            },
        );
    }

    #[test]
    fn test_closeup_selects_ref_b() {
        let tmp = TempDir::new().unwrap();
        let mut state = project_in(&tmp, "Closeup");
        cast_with_refs(&mut state, "lead_1", "Ava", Some("/files/a.png"), Some("/files/b.png"));

        let mut s = shot(0, 0, 0.0, 3.0);
        s.cast = vec!["lead_1".into()];
        s.camera_language = "tight close-up on hands".to_string();

        let refs = select_refs(&state, &s);
        assert_eq!(refs, vec!["/files/b.png".to_string()]);
    }

    #[test]
    fn test_closeup_falls_back_to_ref_a() {
        let tmp = TempDir::new().unwrap();
        let mut state = project_in(&tmp, "Fallback");
        cast_with_refs(&mut state, "lead_1", "Ava", Some("/files/a.png"), None);

        let mut s = shot(0, 0, 0.0, 3.0);
        s.cast = vec!["lead_1".into()];
        s.camera_language = "portrait framing, eyes to lens".to_string();

        let refs = select_refs(&state, &s);
        assert_eq!(refs, vec!["/files/a.png".to_string()]);
    }

    #[test]
    fn test_wide_shot_selects_ref_a() {
        let tmp = TempDir::new().unwrap();
        let mut state = project_in(&tmp, "Wide");
        cast_with_refs(&mut state, "lead_1", "Ava", Some("/files/a.png"), Some("/files/b.png"));

        let mut s = shot(0, 0, 0.0, 3.0);
        s.cast = vec!["lead_1".into()];
        s.camera_language = "slow dolly wide".to_string();

        assert_eq!(select_refs(&state, &s), vec!["/files/a.png".to_string()]);
    }

    #[test]
    fn test_scene_refs_included_and_style_lock_excluded() {
        let tmp = TempDir::new().unwrap();
        let mut state = project_in(&tmp, "SceneRefs");
        state.project.style_locked = true;
        state.project.style_lock_image = Some("/files/style_lock.png".to_string());
        cast_with_refs(&mut state, "lead_1", "Ava", Some("/files/a.png"), None);

        let mut scene = Scene::new("scene_01".into(), "seq_01".into(), "Rooftop", "rooftop");
        scene.decor_refs = vec!["/files/decor.png".to_string()];
        scene.wardrobe_ref = Some("/files/wardrobe.png".to_string());
        state.cast_matrix.scenes.push(scene);

        let mut s = shot(0, 0, 0.0, 3.0);
        s.cast = vec!["lead_1".into()];

        let refs = select_refs(&state, &s);
        assert_eq!(
            refs,
            vec![
                "/files/a.png".to_string(),
                "/files/decor.png".to_string(),
                "/files/wardrobe.png".to_string()
            ]
        );
        assert!(!refs.iter().any(|r| r.contains("style_lock")));
    }

    #[test]
    fn test_wardrobe_beats_prompt_extra() {
        let tmp = TempDir::new().unwrap();
        let mut state = project_in(&tmp, "Wardrobe");
        let mut ava = CastMember::new("lead_1".into(), "Ava", Role::Lead);
        ava.prompt_extra = "black suit".to_string();
        state.cast.push(ava);

        let mut s = shot(0, 0, 0.0, 3.0);
        s.cast = vec!["lead_1".into()];
        s.wardrobe.insert("lead_1".into(), "red coat".to_string());

        let prompt = assemble_prompt(&state, &s, None);
        assert!(prompt.contains("red coat"));
        assert!(!prompt.contains("black suit"));

        // Without the wardrobe entry the standing extra applies.
        s.wardrobe.clear();
        let prompt = assemble_prompt(&state, &s, None);
        assert!(prompt.contains("black suit"));
    }

    #[test]
    fn test_prompt_carries_energy_and_negatives() {
        let tmp = TempDir::new().unwrap();
        let state = project_in(&tmp, "Prompt");

        let mut s = shot(0, 0, 0.0, 3.0);
        s.energy = 0.9;
        s.prompt_base = "she runs through rain".to_string();
        s.symbolic_elements = vec!["broken umbrella".to_string(), "sodium lights".to_string()];
        let prompt = assemble_prompt(&state, &s, Some("crowds"));

        assert!(prompt.contains("high intensity, dramatic"));
        assert!(prompt.contains("she runs through rain"));
        assert!(prompt.contains("broken umbrella"));
        assert!(prompt.contains(RENDER_NEGATIVES));
        assert!(prompt.ends_with("no crowds"));

        s.energy = 0.2;
        assert!(assemble_prompt(&state, &s, None).contains("quiet, slow"));
    }

    #[tokio::test]
    async fn test_render_shot_end_to_end() {
        let server = image_server().await;
        let tmp = TempDir::new().unwrap();

        let mut backend = MockGenerationBackend::new();
        let gen_url = format!("{}/gen.png", server.uri());
        backend
            .expect_text_to_image()
            .times(1)
            .returning(move |_, _, _| Ok(gen_url.clone()));
        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());

        let mut state = project_in(&tmp, "Render");
        state.storyboard.sequences.push(seq(0, 0.0, 10.0));
        state.storyboard.shots.push(shot(0, 0, 0.0, 5.0));
        ctx.store.create(&mut state).await.unwrap();
        let project_id = state.project.id;
        let shot_id: ShotId = "seq_01_sh01".into();

        let url = RenderOrchestrator::new(&ctx)
            .render_shot(project_id, &shot_id, None)
            .await
            .unwrap();

        let loaded = ctx.store.load(project_id).await.unwrap();
        let render = &loaded.storyboard.shots[0].render;
        assert_eq!(render.status, RenderStatus::Done);
        assert_eq!(render.image_url.as_deref(), Some(url.as_str()));
        assert_eq!(render.model.as_deref(), Some("nanobanana"));
        assert!(loaded.costs.total > 0.0);
        assert_eq!(
            loaded.costs.calls.last().unwrap().note.as_deref(),
            Some("shot_render")
        );

        // The artifact and its thumbnail are on disk.
        let file = ctx
            .paths()
            .from_url_existing(&url, Some(&loaded))
            .unwrap();
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_render_uses_editor_when_refs_exist_without_style_lock() {
        let server = image_server().await;
        let tmp = TempDir::new().unwrap();

        let mut backend = MockGenerationBackend::new();
        backend.expect_head_ok().returning(|_| true);
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/ref.png".to_string()));
        let gen_url = format!("{}/gen.png", server.uri());
        backend
            .expect_edit_image()
            .times(1)
            .withf(|_, _, image_urls, _| {
                // Boundary: the style lock URL must never reach the editor.
                !image_urls.iter().any(|u| u.contains("style_lock"))
            })
            .returning(move |_, _, _, _| Ok(gen_url.clone()));
        backend.expect_text_to_image().never();

        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Editor");
        state.storyboard.sequences.push(seq(0, 0.0, 10.0));
        let mut s = shot(0, 0, 0.0, 5.0);
        s.cast = vec!["lead_1".into()];
        state.storyboard.shots.push(s);

        let renders = ctx.paths().renders_dir(&state).unwrap();
        std::fs::write(renders.join("lead_1_ref_a.png"), tiny_png()).unwrap();
        std::fs::write(renders.join("style_lock_anchor.png"), tiny_png()).unwrap();
        cast_with_refs(&mut state, "lead_1", "Ava", Some("/files/lead_1_ref_a.png"), None);
        state.project.style_locked = true;
        state.project.style_lock_image = Some("/files/style_lock_anchor.png".to_string());
        ctx.store.create(&mut state).await.unwrap();

        RenderOrchestrator::new(&ctx)
            .render_shot(state.project.id, &"seq_01_sh01".into(), None)
            .await
            .unwrap();

        let loaded = ctx.store.load(state.project.id).await.unwrap();
        let render = &loaded.storyboard.shots[0].render;
        assert_eq!(render.ref_images_used, vec!["https://storage.fal.ai/ref.png"]);
    }

    #[tokio::test]
    async fn test_backend_4xx_marks_error_and_keeps_no_image() {
        let tmp = TempDir::new().unwrap();
        let mut backend = MockGenerationBackend::new();
        backend.expect_text_to_image().times(1).returning(|_, _, _| {
            Err(GenError::Http {
                status: 422,
                body: "bad prompt".into(),
            })
        });
        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());

        let mut state = project_in(&tmp, "Fail");
        state.storyboard.sequences.push(seq(0, 0.0, 10.0));
        state.storyboard.shots.push(shot(0, 0, 0.0, 5.0));
        ctx.store.create(&mut state).await.unwrap();

        let err = RenderOrchestrator::new(&ctx)
            .render_shot(state.project.id, &"seq_01_sh01".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));

        let loaded = ctx.store.load(state.project.id).await.unwrap();
        let render = &loaded.storyboard.shots[0].render;
        assert_eq!(render.status, RenderStatus::Error);
        assert!(render.image_url.is_none());
        assert!(render.error.as_deref().unwrap().contains("422"));
        // No cost recorded for a failed call.
        assert_eq!(loaded.costs.total, 0.0);
    }

    #[tokio::test]
    async fn test_parallel_renders_lose_no_updates() {
        let server = image_server().await;
        let tmp = TempDir::new().unwrap();

        let mut backend = MockGenerationBackend::new();
        let gen_url = format!("{}/gen.png", server.uri());
        backend
            .expect_text_to_image()
            .times(3)
            .returning(move |_, _, _| Ok(gen_url.clone()));
        let ctx = Arc::new(mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new()));

        let mut state = project_in(&tmp, "Parallel");
        state.storyboard.sequences.push(seq(0, 0.0, 15.0));
        for i in 0..3 {
            state
                .storyboard
                .shots
                .push(shot(0, i, i as f64 * 5.0, (i + 1) as f64 * 5.0));
        }
        ctx.store.create(&mut state).await.unwrap();
        let project_id = state.project.id;

        let mut handles = Vec::new();
        for i in 0..3 {
            let ctx = Arc::clone(&ctx);
            let shot_id = ShotId::for_sequence(&SequenceId::from_index(0), i);
            handles.push(tokio::spawn(async move {
                RenderOrchestrator::new(&ctx)
                    .render_shot(project_id, &shot_id, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = ctx.store.load(project_id).await.unwrap();
        let done = loaded
            .storyboard
            .shots
            .iter()
            .filter(|s| s.render.status == RenderStatus::Done)
            .count();
        assert_eq!(done, 3, "every parallel render must survive the saves");
    }

    #[tokio::test]
    async fn test_cancelled_render_leaves_state_untouched() {
        use async_trait::async_trait;
        use muvi_gen::{GeneratedVideo, GenerationBackend, Transcription};
        use std::path::Path;

        // A backend whose generation never resolves; the render task gets
        // aborted mid-call.
        struct HangingBackend;

        #[async_trait]
        impl GenerationBackend for HangingBackend {
            async fn text_to_image(
                &self,
                _model: muvi_models::ImageModel,
                _prompt: &str,
                _aspect: muvi_models::Aspect,
            ) -> muvi_gen::GenResult<String> {
                std::future::pending().await
            }
            async fn edit_image(
                &self,
                _model: muvi_models::ImageModel,
                _prompt: &str,
                _image_urls: &[String],
                _aspect: muvi_models::Aspect,
            ) -> muvi_gen::GenResult<String> {
                std::future::pending().await
            }
            async fn image_to_video(
                &self,
                _model: muvi_models::VideoModel,
                _image_url: &str,
                _motion_prompt: &str,
                _duration_sec: f64,
                _aspect: muvi_models::Aspect,
            ) -> muvi_gen::GenResult<GeneratedVideo> {
                std::future::pending().await
            }
            async fn understand_audio(
                &self,
                _audio_url: &str,
                _prompt: &str,
            ) -> muvi_gen::GenResult<serde_json::Value> {
                std::future::pending().await
            }
            async fn transcribe(&self, _audio_url: &str) -> muvi_gen::GenResult<Transcription> {
                std::future::pending().await
            }
            async fn upload_file(&self, _path: &Path) -> muvi_gen::GenResult<String> {
                std::future::pending().await
            }
            async fn head_ok(&self, _url: &str) -> bool {
                true
            }
        }

        let tmp = TempDir::new().unwrap();
        let paths = muvi_storage::PathManager::new(tmp.path()).unwrap();
        let store = Arc::new(muvi_state::StateStore::new(paths).unwrap());
        let ctx = Arc::new(EngineContext::new(
            store,
            Arc::new(HangingBackend),
            Arc::new(MockLlmClient::new()),
            Arc::new(MockMediaMuxer::new()),
        ));

        let mut state = project_in(&tmp, "Cancelled");
        state.storyboard.sequences.push(seq(0, 0.0, 10.0));
        state.storyboard.shots.push(shot(0, 0, 0.0, 5.0));
        ctx.store.create(&mut state).await.unwrap();
        let project_id = state.project.id;

        let handle = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move {
                RenderOrchestrator::new(&ctx)
                    .render_shot(project_id, &"seq_01_sh01".into(), None)
                    .await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();
        let _ = handle.await;

        // No partial write: the shot is exactly as created, and the
        // semaphore permit came back.
        let loaded = ctx.store.load(project_id).await.unwrap();
        assert_eq!(loaded.storyboard.shots[0].render.status, RenderStatus::None);
        assert_eq!(
            ctx.image_permits.available_permits(),
            crate::context::DEFAULT_IMAGE_PERMITS
        );
    }
}
