//! Per-shot video generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use muvi_models::{ProjectId, ProjectState, Shot, ShotId, ShotVideo, VideoModel};
use muvi_gen::{retry, RetryPolicy};
use muvi_state::SaveOptions;
use muvi_storage::names;

use crate::context::EngineContext;
use crate::costs::record_cost;
use crate::debug_log;
use crate::download::download_to;
use crate::error::{EngineError, EngineResult};
use crate::uploads::upload_local_ref;

/// Motion prompt used when a shot gives the model nothing to work with.
const DEFAULT_MOTION_PROMPT: &str = "Natural cinematic motion, smooth camera movement";

/// Outcome of a batch generation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub errors: HashMap<String, String>,
}

/// Build the motion prompt for a shot: camera move, energy-derived
/// motion, environment, and the first symbolic elements.
pub fn motion_prompt(shot: &Shot) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !shot.camera_language.is_empty() {
        parts.push(shot.camera_language.clone());
    }
    parts.push(
        if shot.energy > 0.6 {
            "dynamic motion"
        } else {
            "subtle motion"
        }
        .to_string(),
    );
    if !shot.environment.is_empty() {
        parts.push(shot.environment.clone());
    }
    for element in shot.symbolic_elements.iter().take(2) {
        parts.push(element.clone());
    }

    // Only the energy token present means the shot gave us nothing real.
    if parts.len() == 1 {
        DEFAULT_MOTION_PROMPT.to_string()
    } else {
        parts.join(", ")
    }
}

/// Generates img2vid clips for rendered shots.
pub struct VideoGenerator<'a> {
    ctx: &'a EngineContext,
}

impl<'a> VideoGenerator<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Generate a clip for one shot. The shot must have a rendered image.
    pub async fn generate_for_shot(
        &self,
        project_id: ProjectId,
        shot_id: &ShotId,
        model_override: Option<VideoModel>,
    ) -> EngineResult<ShotVideo> {
        let mut snapshot = self.ctx.store.load(project_id).await?;
        let shot = snapshot
            .storyboard
            .shot(shot_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("shot {}", shot_id)))?;
        let image_url = shot.render.image_url.clone().ok_or_else(|| {
            EngineError::validation(format!("shot {} has no rendered image", shot_id))
        })?;

        let model = model_override.unwrap_or(snapshot.project.video_model_choice);
        // Storyboard timing is the target; the model may not honor it
        // exactly, so both figures are stored for the exporter.
        let target_duration = shot.duration();
        let gen_duration = model.clamp_duration(target_duration);
        let prompt = motion_prompt(&shot);

        let _permit = self
            .ctx
            .video_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::busy("video generation semaphore closed"))?;

        let (external_image, _) = upload_local_ref(self.ctx, &mut snapshot, &image_url).await?;

        let aspect = snapshot.project.aspect;
        let started = Instant::now();
        let policy = RetryPolicy::new(format!("video {}", shot_id));
        let p = prompt.clone();
        let img = external_image.clone();
        let generated = retry(&policy, || {
            self.ctx
                .backend
                .image_to_video(model, &img, &p, gen_duration, aspect)
        })
        .await?;

        let video_dir = self.ctx.paths().video_dir(&snapshot)?;
        let target = video_dir.join(names::shot_video(shot_id));
        download_to(&self.ctx.http, &generated.video_url, &target).await?;

        // Trust the file over the backend's claim where possible.
        let actual_duration = match self.ctx.muxer.clip_duration(&target).await {
            Ok(d) if d > 0.0 => d,
            _ => generated.duration.unwrap_or(gen_duration),
        };

        let video = ShotVideo {
            video_url: self.ctx.paths().to_url(&target),
            local_path: Some(target.to_string_lossy().into_owned()),
            duration: actual_duration,
            target_duration,
            model: model.as_str().to_string(),
            has_audio: generated.has_audio,
            generated_at: Utc::now(),
            motion_prompt: prompt.clone(),
        };

        let cost = self.ctx.pricing.cost_of(model.as_str());
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
            let fresh_shot = fresh
                .storyboard
                .shot_mut(shot_id)
                .ok_or_else(|| EngineError::not_found(format!("shot {} disappeared", shot_id)))?;
            fresh_shot.render.video = Some(video.clone());
            record_cost(&self.ctx.session_costs, &mut fresh, model.as_str(), cost, "shot_video");
            self.ctx
                .store
                .save_unlocked(&mut fresh, SaveOptions::forced())
                .await?;
        }

        debug_log::record_call(
            self.ctx.paths(),
            &snapshot,
            "shot_video",
            json!({
                "shot_id": shot_id,
                "model": model.as_str(),
                "motion_prompt": prompt,
                "gen_duration": gen_duration,
            }),
            &json!({ "url": generated.video_url, "duration": actual_duration }),
            started.elapsed().as_millis(),
            cost,
        );

        info!(
            "generated video for {}: {:.1}s against target {:.1}s",
            shot_id, actual_duration, target_duration
        );
        Ok(video)
    }

}

/// Generate clips for many shots concurrently under the video semaphore.
/// Skips shots without an image or with an existing video. Free function
/// so each spawned task can own the context.
pub async fn generate_batch(
    ctx: Arc<EngineContext>,
    project_id: ProjectId,
    shot_ids: Option<Vec<ShotId>>,
    model_override: Option<VideoModel>,
) -> EngineResult<BatchReport> {
    let state = ctx.store.load(project_id).await?;

    let mut report = BatchReport::default();
    let mut eligible: Vec<ShotId> = Vec::new();
    for shot in &state.storyboard.shots {
        if let Some(filter) = &shot_ids {
            if !filter.contains(&shot.shot_id) {
                continue;
            }
        }
        report.total += 1;
        let has_image = shot.render.image_url.is_some();
        let has_video = shot.render.video.is_some();
        if has_image && !has_video {
            eligible.push(shot.shot_id.clone());
        } else {
            report.skipped += 1;
        }
    }

    let mut handles = Vec::new();
    for shot_id in eligible {
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::spawn(async move {
            let result = VideoGenerator::new(&ctx)
                .generate_for_shot(project_id, &shot_id, model_override)
                .await;
            (shot_id, result)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((_, Ok(_))) => report.success += 1,
            Ok((shot_id, Err(e))) => {
                warn!("video generation failed for {}: {}", shot_id, e);
                report.failed += 1;
                report.errors.insert(shot_id.to_string(), e.to_string());
            }
            Err(e) => {
                report.failed += 1;
                report.errors.insert("task".to_string(), e.to_string());
            }
        }
    }

    info!(
        "video batch for {}: {} ok, {} failed, {} skipped of {}",
        project_id, report.success, report.failed, report.skipped, report.total
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{mock_context, project_in};
    use muvi_gen::{GeneratedVideo, MockGenerationBackend, MockLlmClient};
    use muvi_media::MockMediaMuxer;
    use muvi_models::{RenderStatus, Sequence, SequenceId, StructureType};
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

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

    #[test]
    fn test_motion_prompt_composition() {
        let mut s = shot(0, 0, 0.0, 3.2);
        s.camera_language = "slow push-in".to_string();
        s.energy = 0.8;
        s.environment = "rain-wet rooftop".to_string();
        s.symbolic_elements = vec!["umbrella".into(), "neon sign".into(), "third".into()];

        let prompt = motion_prompt(&s);
        assert!(prompt.starts_with("slow push-in"));
        assert!(prompt.contains("dynamic motion"));
        assert!(prompt.contains("umbrella"));
        assert!(prompt.contains("neon sign"));
        assert!(!prompt.contains("third"));
    }

    #[test]
    fn test_motion_prompt_default() {
        let s = shot(0, 0, 0.0, 3.0);
        assert_eq!(motion_prompt(&s), DEFAULT_MOTION_PROMPT);
    }

    #[test]
    fn test_motion_prompt_energy_threshold() {
        let mut s = shot(0, 0, 0.0, 3.0);
        s.environment = "studio".to_string();
        s.energy = 0.5;
        assert!(motion_prompt(&s).contains("subtle motion"));
        s.energy = 0.61;
        assert!(motion_prompt(&s).contains("dynamic motion"));
    }

    async fn prepared_state(
        tmp: &TempDir,
        ctx: &EngineContext,
        shot_count: usize,
        with_image: bool,
    ) -> ProjectState {
        let mut state = project_in(tmp, "Video");
        state.storyboard.sequences.push(seq(0, 0.0, 20.0));
        let renders = ctx.paths().renders_dir(&state).unwrap();
        for i in 0..shot_count {
            let mut s = shot(0, i, i as f64 * 3.2, (i + 1) as f64 * 3.2);
            if with_image {
                let file = renders.join(format!("{}_src.png", s.shot_id));
                std::fs::write(&file, b"png").unwrap();
                s.render.status = RenderStatus::Done;
                s.render.image_url = Some(ctx.paths().to_url(&file));
            }
            state.storyboard.shots.push(s);
        }
        ctx.store.create(&mut state).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_generate_for_shot_stores_both_durations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/img.png".to_string()));
        backend.expect_head_ok().returning(|_| true);
        let video_url = format!("{}/clip.mp4", server.uri());
        backend
            .expect_image_to_video()
            .times(1)
            .withf(|model, _, _, duration, _| {
                // Target 3.2s must be clamped into veo's [4, 8].
                *model == VideoModel::Veo3Fast && (*duration - 4.0).abs() < 1e-9
            })
            .returning(move |_, _, _, _, _| {
                Ok(GeneratedVideo {
                    video_url: video_url.clone(),
                    duration: Some(4.0),
                    has_audio: false,
                })
            });

        let mut muxer = MockMediaMuxer::new();
        muxer.expect_clip_duration().returning(|_| Ok(5.0));

        let ctx = mock_context(&tmp, backend, MockLlmClient::new(), muxer);
        let state = prepared_state(&tmp, &ctx, 1, true).await;

        let video = VideoGenerator::new(&ctx)
            .generate_for_shot(state.project.id, &"seq_01_sh01".into(), None)
            .await
            .unwrap();

        // Probed duration wins over the backend's claim.
        assert_eq!(video.duration, 5.0);
        assert!((video.target_duration - 3.2).abs() < 1e-9);
        assert_eq!(video.model, "veo3-fast");

        let loaded = ctx.store.load(state.project.id).await.unwrap();
        let stored = loaded.storyboard.shots[0].render.video.as_ref().unwrap();
        assert_eq!(stored.duration, 5.0);
        assert!(stored.video_url.starts_with("/files/"));
        assert_eq!(
            loaded.costs.calls.last().unwrap().note.as_deref(),
            Some("shot_video")
        );
    }

    #[tokio::test]
    async fn test_generate_requires_rendered_image() {
        let tmp = TempDir::new().unwrap();
        let ctx = mock_context(
            &tmp,
            MockGenerationBackend::new(),
            MockLlmClient::new(),
            MockMediaMuxer::new(),
        );
        let state = prepared_state(&tmp, &ctx, 1, false).await;

        let err = VideoGenerator::new(&ctx)
            .generate_for_shot(state.project.id, &"seq_01_sh01".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_filters_and_reports() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_upload_file()
            .returning(|_| Ok("https://storage.fal.ai/img.png".to_string()));
        backend.expect_head_ok().returning(|_| true);
        let video_url = format!("{}/clip.mp4", server.uri());
        backend
            .expect_image_to_video()
            .times(2)
            .returning(move |_, _, _, _, _| {
                Ok(GeneratedVideo {
                    video_url: video_url.clone(),
                    duration: Some(5.0),
                    has_audio: false,
                })
            });
        let mut muxer = MockMediaMuxer::new();
        muxer.expect_clip_duration().returning(|_| Ok(5.0));

        let ctx = Arc::new(mock_context(&tmp, backend, MockLlmClient::new(), muxer));
        // Three shots: two rendered, one bare.
        let mut state = project_in(&tmp, "Video");
        state.storyboard.sequences.push(seq(0, 0.0, 20.0));
        let renders = ctx.paths().renders_dir(&state).unwrap();
        for i in 0..3 {
            let mut s = shot(0, i, i as f64 * 3.0, (i + 1) as f64 * 3.0);
            if i < 2 {
                let file = renders.join(format!("{}_src.png", s.shot_id));
                std::fs::write(&file, b"png").unwrap();
                s.render.status = RenderStatus::Done;
                s.render.image_url = Some(ctx.paths().to_url(&file));
            }
            state.storyboard.shots.push(s);
        }
        ctx.store.create(&mut state).await.unwrap();

        let report = generate_batch(Arc::clone(&ctx), state.project.id, None, None)
            .await
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.success, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
    }
}
