//! The identity and reference graph.
//!
//! Cast members, canonical character refs (full-body and close-up), scene
//! decor plates and wardrobe previews. Everything a shot render consumes
//! is produced here.

use std::path::Path;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use muvi_models::{
    CastId, CastMember, ProjectState, Role, Scene, SceneId, StylePreset, MAX_REFERENCE_IMAGES,
};
use muvi_models::cast::ReferenceImage;
use muvi_gen::{retry, RetryPolicy};
use muvi_storage::names;

use crate::context::EngineContext;
use crate::costs::record_cost;
use crate::debug_log;
use crate::download::download_to;
use crate::error::{EngineError, EngineResult};
use crate::thumbs;
use crate::uploads::upload_local_ref;

/// Negative tokens appended to every canonical-ref prompt.
const REF_NEGATIVES: &str =
    "no props, no text, no frame, no watermark, no logo, clean neutral background";

/// Instruction appended when the style lock rides along as a reference.
const STYLE_LOCK_NOTE: &str =
    "The last reference image defines visual style only; it must not influence identity, \
     face or body.";

/// Which canonical ref to (re)generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefVariant {
    A,
    B,
}

impl RefVariant {
    fn letter(&self) -> char {
        match self {
            RefVariant::A => 'a',
            RefVariant::B => 'b',
        }
    }

    fn pose_tokens(&self) -> &'static str {
        match self {
            RefVariant::A => "full body, standing, neutral pose, facing camera, even lighting",
            RefVariant::B => "portrait close-up, head and shoulders, facing camera, even lighting",
        }
    }

    fn cost_note(&self) -> &'static str {
        match self {
            RefVariant::A => "ref_a",
            RefVariant::B => "ref_b",
        }
    }
}

/// Builds and maintains the reference graph.
pub struct ReferenceGraph<'a> {
    ctx: &'a EngineContext,
}

impl<'a> ReferenceGraph<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Add a cast member from an uploaded photo. The photo is copied into
    /// the project and uploaded to the backend so later edits can
    /// reference it without re-uploading.
    pub async fn add_cast(
        &self,
        state: &mut ProjectState,
        name: &str,
        role: Role,
        photo: &Path,
    ) -> EngineResult<CastId> {
        if !photo.exists() {
            return Err(EngineError::not_found(format!("photo {}", photo.display())));
        }

        // Next free index for the role; counting would collide after a
        // delete.
        let index = state
            .cast
            .iter()
            .filter(|m| m.role == role)
            .filter_map(|m| {
                m.cast_id
                    .as_str()
                    .rsplit_once('_')
                    .and_then(|(_, n)| n.parse::<usize>().ok())
            })
            .max()
            .unwrap_or(0)
            + 1;
        let cast_id = CastId::for_role(role.as_str(), index);

        let renders = self.ctx.paths().renders_dir(state)?;
        let target = renders.join(format!("{}_source.png", cast_id));
        tokio::fs::copy(photo, &target).await?;
        let url_local = self.ctx.paths().to_url(&target);

        let url_external = match self.ctx.backend.upload_file(&target).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("source upload for {} failed, will retry on use: {}", cast_id, e);
                None
            }
        };
        if let Some(external) = &url_external {
            state
                .project
                .fal_upload_cache
                .insert(url_local.clone(), external.clone());
        }

        let mut member = CastMember::new(cast_id.clone(), name, role);
        member.reference_images.push(ReferenceImage {
            url_local,
            url_external,
            role: "source".to_string(),
        });
        state.cast.push(member);

        info!("added cast {} ({})", cast_id, name);
        Ok(cast_id)
    }

    /// Attach one more reference photo to an existing member.
    pub async fn add_cast_reference(
        &self,
        state: &mut ProjectState,
        cast_id: &CastId,
        photo: &Path,
    ) -> EngineResult<()> {
        let count = state
            .cast_member(cast_id)
            .ok_or_else(|| EngineError::not_found(format!("cast {}", cast_id)))?
            .reference_images
            .len();
        if count >= MAX_REFERENCE_IMAGES {
            return Err(EngineError::validation(format!(
                "cast {} already has {} reference images",
                cast_id, MAX_REFERENCE_IMAGES
            )));
        }

        let renders = self.ctx.paths().renders_dir(state)?;
        let target = renders.join(format!("{}_source_{}.png", cast_id, count + 1));
        tokio::fs::copy(photo, &target).await?;
        let url_local = self.ctx.paths().to_url(&target);

        let member = state
            .cast_member_mut(cast_id)
            .expect("checked above");
        member.reference_images.push(ReferenceImage {
            url_local,
            url_external: None,
            role: "extra".to_string(),
        });
        Ok(())
    }

    /// Generate both canonical refs for a member.
    ///
    /// The first completed ref_a in a project becomes the style lock
    /// anchor for every later cast-ref generation.
    pub async fn generate_canonical_refs(
        &self,
        state: &mut ProjectState,
        cast_id: &CastId,
    ) -> EngineResult<()> {
        self.generate_ref(state, cast_id, RefVariant::A).await?;
        self.generate_ref(state, cast_id, RefVariant::B).await?;
        Ok(())
    }

    /// Generate (or regenerate) one canonical ref.
    pub async fn generate_ref(
        &self,
        state: &mut ProjectState,
        cast_id: &CastId,
        variant: RefVariant,
    ) -> EngineResult<()> {
        let member = state
            .cast_member(cast_id)
            .ok_or_else(|| EngineError::not_found(format!("cast {}", cast_id)))?
            .clone();
        let source = member.primary_reference().ok_or_else(|| {
            EngineError::validation(format!("cast {} has no uploaded reference image", cast_id))
        })?;

        let preset = StylePreset::resolve(&state.project.style_preset);
        let mut prompt_parts = vec![preset.tokens.to_string()];
        if !member.prompt_extra.is_empty() {
            prompt_parts.push(member.prompt_extra.clone());
        }
        prompt_parts.push(variant.pose_tokens().to_string());
        prompt_parts.push(REF_NEGATIVES.to_string());

        // Identity source first, style lock second.
        let source_url = source.url_local.clone();
        let (identity_url, _) = upload_local_ref(self.ctx, state, &source_url).await?;
        let mut image_urls = vec![identity_url];
        if let Some(lock) = state.project.style_lock_image.clone() {
            let (lock_url, _) = upload_local_ref(self.ctx, state, &lock).await?;
            image_urls.push(lock_url);
            prompt_parts.push(STYLE_LOCK_NOTE.to_string());
        }
        let prompt = prompt_parts.join(", ");

        let model = state.project.image_model_choice;
        let aspect = state.project.aspect;
        let policy = RetryPolicy::new(format!("cast ref {}", variant.letter()));
        let started = Instant::now();
        let urls = image_urls.clone();
        let result = retry(&policy, || {
            self.ctx.backend.edit_image(model, &prompt, &urls, aspect)
        })
        .await;

        let generated = match result {
            Ok(url) => url,
            Err(e) => {
                debug_log::record_failure(
                    self.ctx.paths(),
                    state,
                    "cast_ref",
                    json!({ "cast_id": cast_id, "variant": variant.letter().to_string() }),
                    &e.to_string(),
                );
                return Err(e.into());
            }
        };

        let renders = self.ctx.paths().renders_dir(state)?;
        let target = renders.join(names::cast_ref(cast_id, variant.letter()));
        download_to(&self.ctx.http, &generated, &target).await?;
        thumbs::write_thumbnail(&target);
        let local_url = self.ctx.paths().to_url(&target);

        let cost = self.ctx.pricing.cost_of(model.edit_endpoint());
        record_cost(
            &self.ctx.session_costs,
            state,
            model.as_str(),
            cost,
            variant.cost_note(),
        );
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "cast_ref",
            json!({ "cast_id": cast_id, "variant": variant.letter().to_string(), "prompt": prompt }),
            &json!({ "url": generated }),
            started.elapsed().as_millis(),
            cost,
        );

        let refs = state
            .cast_matrix
            .character_refs
            .entry(cast_id.clone())
            .or_default();
        match variant {
            RefVariant::A => refs.ref_a = Some(local_url.clone()),
            RefVariant::B => refs.ref_b = Some(local_url.clone()),
        }

        // First finished full-body ref anchors the project's look.
        if variant == RefVariant::A && !state.project.style_locked {
            state.project.style_locked = true;
            state.project.style_lock_image = Some(local_url);
            info!("style locked to {}'s ref_a", cast_id);
        }

        Ok(())
    }

    /// One LLM call producing exactly one decor-only scene per sequence.
    pub async fn autogen_scenes(&self, state: &mut ProjectState) -> EngineResult<usize> {
        if state.storyboard.sequences.is_empty() {
            return Err(EngineError::validation("build sequences before scenes"));
        }

        let preset = StylePreset::resolve(&state.project.style_preset);
        let sequence_lines: Vec<String> = state
            .storyboard
            .sequences
            .iter()
            .map(|s| {
                format!(
                    "- {} \"{}\" ({}, {:.1}-{:.1}s): {}",
                    s.sequence_id, s.label, s.structure_type, s.start, s.end, s.description
                )
            })
            .collect();

        let system = "You are a production designer. You answer with a single JSON object and \
                      nothing else.";
        let prompt = format!(
            "Design one location plate per sequence for a music video.\n\
             \n\
             VISUAL STYLE: {} -- {}\n\
             SEQUENCES:\n{}\n\
             \n\
             For every sequence, in order, produce one scene. Scenes are empty decor plates: \
             describe the space, light and atmosphere. NO people, NO characters, NO figures.\n\
             \n\
             Return JSON: {{\"scenes\": [{{\"title\": string, \"prompt\": string, \
             \"decor_alt_prompt\": string or null, \"wardrobe\": string or null}}]}}",
            preset.label,
            preset.notes,
            sequence_lines.join("\n"),
        );

        let started = Instant::now();
        let policy = RetryPolicy::new("scene autogen");
        let llm_pref = state.project.llm_preference.clone();
        let response = retry(&policy, || {
            self.ctx.llm.complete_json(&llm_pref, system, &prompt)
        })
        .await?;

        let cost = self.ctx.pricing.cost_of("fal-ai/any-llm");
        record_cost(&self.ctx.session_costs, state, "fal-ai/any-llm", cost, "scenes_autogen");
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "scenes_autogen",
            json!({ "prompt": prompt }),
            &response,
            started.elapsed().as_millis(),
            cost,
        );

        let raw = response
            .get("scenes")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::validation("LLM response has no scenes array"))?;

        let mut scenes = Vec::new();
        for (idx, sequence) in state.storyboard.sequences.iter().enumerate() {
            let value = raw.get(idx);
            let title = value
                .and_then(|v| v.get("title"))
                .and_then(Value::as_str)
                .unwrap_or(&sequence.label)
                .to_string();
            let prompt = value
                .and_then(|v| v.get("prompt"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("empty location for {}", sequence.label));
            let mut scene = Scene::new(
                SceneId::from_index(idx),
                sequence.sequence_id.clone(),
                title,
                prompt,
            );
            scene.decor_alt_prompt = value
                .and_then(|v| v.get("decor_alt_prompt"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string);
            scene.wardrobe = value
                .and_then(|v| v.get("wardrobe"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string);
            scenes.push(scene);
        }

        let count = scenes.len();
        state.cast_matrix.scenes = scenes;
        info!("autogenerated {} scenes", count);
        Ok(count)
    }

    /// Render a scene's decor plate(s) and, when styled, its wardrobe
    /// preview. Locks block their half of the work.
    pub async fn render_scene(
        &self,
        state: &mut ProjectState,
        scene_id: &SceneId,
    ) -> EngineResult<()> {
        let scene = state
            .cast_matrix
            .scenes
            .iter()
            .find(|s| &s.scene_id == scene_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("scene {}", scene_id)))?;

        if !scene.decor_locked {
            let url = self
                .render_decor_plate(state, &scene, &scene.prompt, false)
                .await?;
            if let Some(s) = state.cast_matrix.scene_mut(scene_id) {
                s.decor_refs = vec![url];
                s.decor_alt = None;
            }

            if let Some(alt_prompt) = &scene.decor_alt_prompt {
                let alt_url = self
                    .render_decor_plate(state, &scene, alt_prompt, true)
                    .await?;
                if let Some(s) = state.cast_matrix.scene_mut(scene_id) {
                    s.decor_alt = Some(alt_url.clone());
                    s.decor_refs.push(alt_url);
                }
            }
        } else {
            debug!("scene {} decor is locked, skipping", scene_id);
        }

        if scene.wardrobe.is_some() {
            if !scene.wardrobe_locked {
                self.generate_wardrobe_ref(state, scene_id).await?;
            } else {
                debug!("scene {} wardrobe is locked, skipping", scene_id);
            }
        }

        Ok(())
    }

    async fn render_decor_plate(
        &self,
        state: &mut ProjectState,
        scene: &Scene,
        decor_prompt: &str,
        alt: bool,
    ) -> EngineResult<String> {
        let preset = StylePreset::resolve(&state.project.style_preset);
        let prompt = format!(
            "{}, wide establishing shot of {}, empty location, no people, no characters, \
             no text, no watermark",
            preset.tokens, decor_prompt
        );

        let model = state.project.image_model_choice;
        let aspect = state.project.aspect;
        let policy = RetryPolicy::new("scene decor");
        let started = Instant::now();
        let generated = retry(&policy, || {
            self.ctx.backend.text_to_image(model, &prompt, aspect)
        })
        .await?;

        let renders = self.ctx.paths().renders_dir(state)?;
        let target = renders.join(names::scene_decor(&scene.scene_id, alt));
        download_to(&self.ctx.http, &generated, &target).await?;
        thumbs::write_thumbnail(&target);

        let cost = self.ctx.pricing.cost_of(model.t2i_endpoint());
        record_cost(&self.ctx.session_costs, state, model.as_str(), cost, "scene_decor");
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "scene_decor",
            json!({ "scene_id": scene.scene_id, "alt": alt, "prompt": prompt }),
            &json!({ "url": generated }),
            started.elapsed().as_millis(),
            cost,
        );

        Ok(self.ctx.paths().to_url(&target))
    }

    /// Compose lead ref_a + decor + wardrobe text into one preview image:
    /// the character, in costume, in the space.
    pub async fn generate_wardrobe_ref(
        &self,
        state: &mut ProjectState,
        scene_id: &SceneId,
    ) -> EngineResult<()> {
        let scene = state
            .cast_matrix
            .scenes
            .iter()
            .find(|s| &s.scene_id == scene_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("scene {}", scene_id)))?;
        let wardrobe = scene
            .wardrobe
            .clone()
            .ok_or_else(|| EngineError::validation(format!("scene {} has no wardrobe", scene_id)))?;
        let decor = scene.primary_decor().map(str::to_string).ok_or_else(|| {
            EngineError::validation(format!("render scene {} decor before wardrobe", scene_id))
        })?;

        // The lead's full-body ref is the identity source.
        let lead = sorted_primary_lead(state).ok_or_else(|| {
            EngineError::validation("wardrobe preview needs a lead with canonical refs")
        })?;
        let ref_a = state
            .cast_matrix
            .refs_for(&lead)
            .and_then(|r| r.ref_a.clone())
            .ok_or_else(|| {
                EngineError::validation(format!("cast {} has no ref_a yet", lead))
            })?;

        let (identity_url, _) = upload_local_ref(self.ctx, state, &ref_a).await?;
        let (decor_url, _) = upload_local_ref(self.ctx, state, &decor).await?;

        let preset = StylePreset::resolve(&state.project.style_preset);
        let prompt = format!(
            "{}, the person from the first reference image standing in the location from the \
             second reference image, wearing {}, full body, natural pose, no text, no watermark",
            preset.tokens, wardrobe
        );

        let model = state.project.image_model_choice;
        let aspect = state.project.aspect;
        let image_urls = vec![identity_url, decor_url];
        let policy = RetryPolicy::new("wardrobe preview");
        let started = Instant::now();
        let urls = image_urls.clone();
        let generated = retry(&policy, || {
            self.ctx.backend.edit_image(model, &prompt, &urls, aspect)
        })
        .await?;

        let renders = self.ctx.paths().renders_dir(state)?;
        let target = renders.join(names::scene_wardrobe(scene_id));
        download_to(&self.ctx.http, &generated, &target).await?;
        thumbs::write_thumbnail(&target);

        let cost = self.ctx.pricing.cost_of(model.edit_endpoint());
        record_cost(&self.ctx.session_costs, state, model.as_str(), cost, "wardrobe_ref");
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "wardrobe_ref",
            json!({ "scene_id": scene_id, "prompt": prompt }),
            &json!({ "url": generated }),
            started.elapsed().as_millis(),
            cost,
        );

        if let Some(s) = state.cast_matrix.scene_mut(scene_id) {
            s.wardrobe_ref = Some(self.ctx.paths().to_url(&target));
        }
        Ok(())
    }
}

/// The primary lead's id, by the presence sort.
fn sorted_primary_lead(state: &ProjectState) -> Option<CastId> {
    muvi_models::sort_cast_for_presence(&state.cast)
        .first()
        .filter(|(m, _)| m.role == Role::Lead)
        .map(|(m, _)| m.cast_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{mock_context, project_in};
    use muvi_gen::{MockGenerationBackend, MockLlmClient};
    use muvi_media::MockMediaMuxer;
    use muvi_models::{Sequence, SequenceId, StructureType};
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn image_server() -> MockServer {
        let server = MockServer::start().await;
        let png = tiny_png();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
            .mount(&server)
            .await;
        server
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
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
            description: "night rooftop".into(),
            arc_start: String::new(),
            arc_end: String::new(),
            lyrics_reference: String::new(),
            start_frame_prompt: String::new(),
            end_frame_prompt: String::new(),
        }
    }

    #[tokio::test]
    async fn test_add_cast_assigns_role_indexed_id() {
        let tmp = TempDir::new().unwrap();
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/src.png".to_string()));
        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Cast");

        let photo = tmp.path().join("upload.png");
        std::fs::write(&photo, tiny_png()).unwrap();

        let graph = ReferenceGraph::new(&ctx);
        let first = graph
            .add_cast(&mut state, "Ava", Role::Lead, &photo)
            .await
            .unwrap();
        let second = graph
            .add_cast(&mut state, "Ben", Role::Lead, &photo)
            .await
            .unwrap();
        let third = graph
            .add_cast(&mut state, "Cal", Role::Extra, &photo)
            .await
            .unwrap();

        assert_eq!(first.as_str(), "lead_1");
        assert_eq!(second.as_str(), "lead_2");
        assert_eq!(third.as_str(), "extra_1");
        // Source landed locally and in the upload cache.
        let member = state.cast_member(&first).unwrap();
        assert_eq!(member.reference_images.len(), 1);
        assert!(state
            .project
            .fal_upload_cache
            .contains_key(&member.reference_images[0].url_local));
    }

    #[tokio::test]
    async fn test_reference_image_cap() {
        let tmp = TempDir::new().unwrap();
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/src.png".to_string()));
        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Cap");
        let photo = tmp.path().join("upload.png");
        std::fs::write(&photo, tiny_png()).unwrap();

        let graph = ReferenceGraph::new(&ctx);
        let id = graph
            .add_cast(&mut state, "Ava", Role::Lead, &photo)
            .await
            .unwrap();
        graph.add_cast_reference(&mut state, &id, &photo).await.unwrap();
        graph.add_cast_reference(&mut state, &id, &photo).await.unwrap();
        let err = graph
            .add_cast_reference(&mut state, &id, &photo)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_canonical_refs_set_style_lock_once() {
        let server = image_server().await;
        let tmp = TempDir::new().unwrap();

        let mut backend = MockGenerationBackend::new();
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/src.png".to_string()));
        backend.expect_head_ok().returning(|_| true);
        let result_url = format!("{}/gen.png", server.uri());
        backend
            .expect_edit_image()
            .returning(move |_, _, _, _| Ok(result_url.clone()));

        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Lock");
        let photo = tmp.path().join("upload.png");
        std::fs::write(&photo, tiny_png()).unwrap();

        let graph = ReferenceGraph::new(&ctx);
        let id = graph
            .add_cast(&mut state, "Ava", Role::Lead, &photo)
            .await
            .unwrap();
        assert!(!state.project.style_locked);

        graph.generate_canonical_refs(&mut state, &id).await.unwrap();

        let refs = state.cast_matrix.refs_for(&id).unwrap();
        assert!(refs.is_complete());
        assert!(state.project.style_locked);
        // Anchor is ref_a of the first cast generated.
        assert_eq!(state.project.style_lock_image, refs.ref_a);
        // Costs were tagged per variant.
        let notes: Vec<&str> = state
            .costs
            .calls
            .iter()
            .filter_map(|c| c.note.as_deref())
            .collect();
        assert!(notes.contains(&"ref_a"));
        assert!(notes.contains(&"ref_b"));

        // A second generation keeps the original anchor.
        let lock_before = state.project.style_lock_image.clone();
        graph.generate_ref(&mut state, &id, RefVariant::A).await.unwrap();
        assert_eq!(state.project.style_lock_image, lock_before);
    }

    #[tokio::test]
    async fn test_autogen_scenes_one_per_sequence() {
        let tmp = TempDir::new().unwrap();
        let mut llm = MockLlmClient::new();
        llm.expect_complete_json().returning(|_, _, _| {
            Ok(json!({
                "scenes": [
                    {"title": "Rooftop", "prompt": "rain-wet rooftop", "wardrobe": "silver jacket"},
                    {"title": "Alley", "prompt": "narrow neon alley", "decor_alt_prompt": "same alley, dawn"}
                ]
            }))
        });
        let ctx = mock_context(&tmp, MockGenerationBackend::new(), llm, MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Scenes");
        state.storyboard.sequences.push(seq(0, 0.0, 20.0));
        state.storyboard.sequences.push(seq(1, 20.0, 45.0));

        let graph = ReferenceGraph::new(&ctx);
        let count = graph.autogen_scenes(&mut state).await.unwrap();
        assert_eq!(count, 2);

        let scenes = &state.cast_matrix.scenes;
        assert_eq!(scenes[0].sequence_id.as_str(), "seq_01");
        assert_eq!(scenes[0].wardrobe.as_deref(), Some("silver jacket"));
        assert_eq!(scenes[1].decor_alt_prompt.as_deref(), Some("same alley, dawn"));
    }

    #[tokio::test]
    async fn test_render_scene_respects_decor_lock() {
        let tmp = TempDir::new().unwrap();
        let mut backend = MockGenerationBackend::new();
        backend.expect_text_to_image().never();
        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Locked");
        state.storyboard.sequences.push(seq(0, 0.0, 20.0));
        let mut scene = Scene::new("scene_01".into(), "seq_01".into(), "Rooftop", "rooftop");
        scene.decor_locked = true;
        state.cast_matrix.scenes.push(scene);

        ReferenceGraph::new(&ctx)
            .render_scene(&mut state, &"scene_01".into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_render_scene_with_alt_and_wardrobe() {
        let server = image_server().await;
        let tmp = TempDir::new().unwrap();

        let mut backend = MockGenerationBackend::new();
        let gen_url = format!("{}/gen.png", server.uri());
        let gen_url_2 = gen_url.clone();
        backend
            .expect_text_to_image()
            .times(2)
            .returning(move |_, _, _| Ok(gen_url.clone()));
        backend
            .expect_edit_image()
            .times(1)
            .returning(move |_, _, _, _| Ok(gen_url_2.clone()));
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/up.png".to_string()));
        backend.expect_head_ok().returning(|_| true);

        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), MockMediaMuxer::new());
        let mut state = project_in(&tmp, "Full");
        state.storyboard.sequences.push(seq(0, 0.0, 20.0));

        // A lead with a finished ref_a for the wardrobe composition.
        let mut ava = CastMember::new("lead_1".into(), "Ava", Role::Lead);
        ava.impact = 0.9;
        state.cast.push(ava);
        let renders = ctx.paths().renders_dir(&state).unwrap();
        std::fs::write(renders.join("lead_1_ref_a.png"), tiny_png()).unwrap();
        state.cast_matrix.character_refs.insert(
            "lead_1".into(),
            muvi_models::CharacterRefs {
                ref_a: Some("/files/lead_1_ref_a.png".to_string()),
                ref_b: None,
            },
        );

        let mut scene = Scene::new("scene_01".into(), "seq_01".into(), "Rooftop", "rooftop");
        scene.decor_alt_prompt = Some("rooftop at dawn".to_string());
        scene.wardrobe = Some("silver jacket".to_string());
        state.cast_matrix.scenes.push(scene);

        ReferenceGraph::new(&ctx)
            .render_scene(&mut state, &"scene_01".into())
            .await
            .unwrap();

        let scene = &state.cast_matrix.scenes[0];
        assert_eq!(scene.decor_refs.len(), 2);
        assert!(scene.decor_alt.is_some());
        assert!(scene.wardrobe_ref.is_some());
    }
}
