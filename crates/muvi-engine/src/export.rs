//! Final assembly: rendered shots against the audio track.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use muvi_models::{sanitize_filename, ExportMode, ProjectId, ProjectState};

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::export_status::ExportPhase;
use crate::video::generate_batch;

/// Slack before a long clip is trimmed instead of used as-is.
const TRIM_TOLERANCE_SECS: f64 = 0.1;

/// Export parameters.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub mode: ExportMode,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Reserved for crossfade transitions; current assembly uses hard
    /// cuts.
    pub fade_duration: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            mode: ExportMode::Stills,
            fps: 24,
            width: 1920,
            height: 1080,
            fade_duration: 0.0,
        }
    }
}

/// What an export produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub video_url: String,
    pub shots_exported: usize,
    pub duration_sec: f64,
    pub scene_transitions: usize,
    pub skipped_shots: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_model: Option<String>,
}

/// Run an export, publishing progress through the context's status map.
pub async fn export(
    ctx: &Arc<EngineContext>,
    project_id: ProjectId,
    options: ExportOptions,
) -> EngineResult<ExportResult> {
    let result = run_export(ctx, project_id, &options).await;
    if let Err(e) = &result {
        ctx.export_status
            .update(project_id, ExportPhase::Error, 0, 0, e.to_string());
    }
    result
}

async fn run_export(
    ctx: &Arc<EngineContext>,
    project_id: ProjectId,
    options: &ExportOptions,
) -> EngineResult<ExportResult> {
    ctx.export_status
        .update(project_id, ExportPhase::Running, 0, 0, "preparing export");

    let mut generation_time = None;
    if options.mode == ExportMode::Img2vid {
        // Any shot still missing its clip gets one first.
        let started = Instant::now();
        let report = generate_batch(Arc::clone(ctx), project_id, None, None).await?;
        if report.success > 0 {
            generation_time = Some(started.elapsed().as_secs_f64());
        }
        if report.failed > 0 {
            warn!(
                "continuing export with {} shots whose video generation failed",
                report.failed
            );
        }
    }

    let state = ctx.store.load(project_id).await?;
    let audio_path = resolve_audio(ctx, &state)?;

    // Renderable shots in timeline order; everything else is reported as
    // skipped.
    let mut shots: Vec<_> = state
        .storyboard
        .shots
        .iter()
        .filter(|s| s.render.image_url.is_some() && s.duration() > 0.0)
        .collect();
    shots.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut skipped: Vec<String> = state
        .storyboard
        .shots
        .iter()
        .filter(|s| s.render.image_url.is_none() || s.duration() <= 0.0)
        .map(|s| s.shot_id.to_string())
        .collect();

    if shots.is_empty() {
        return Err(EngineError::validation("no rendered shots to export"));
    }

    let temp_dir = ctx.paths().video_dir(&state)?.join("temp");
    tokio::fs::create_dir_all(&temp_dir).await?;

    let total = shots.len();
    let mut clips: Vec<PathBuf> = Vec::with_capacity(total);
    let mut video_model = None;

    for (idx, shot) in shots.iter().enumerate() {
        ctx.export_status.update(
            project_id,
            ExportPhase::Running,
            idx + 1,
            total,
            format!("building clip {}/{}", idx + 1, total),
        );

        let clip = match options.mode {
            ExportMode::Stills => {
                build_still_clip(ctx, &state, shot, options, &temp_dir, idx).await
            }
            ExportMode::Img2vid => {
                build_video_clip(ctx, &state, shot, &temp_dir, idx, &mut video_model).await
            }
        };

        match clip {
            Ok(path) => clips.push(path),
            Err(e) => {
                warn!("skipping {} in export: {}", shot.shot_id, e);
                skipped.push(shot.shot_id.to_string());
            }
        }
    }

    if clips.is_empty() {
        return Err(EngineError::validation("every clip failed to build"));
    }

    let suffix = match options.mode {
        ExportMode::Stills => "export",
        ExportMode::Img2vid => "img2vid_export",
    };
    let output = ctx.paths().video_dir(&state)?.join(format!(
        "{}_{}.mp4",
        sanitize_filename(&state.project.title, 60),
        suffix
    ));

    ctx.export_status.update(
        project_id,
        ExportPhase::Running,
        total,
        total,
        "concatenating against audio",
    );
    ctx.muxer.concat(&clips, &audio_path, &output).await?;

    let duration_sec = ctx.muxer.clip_duration(&output).await.unwrap_or(0.0);

    // Intermediates go once the final file exists.
    if let Err(e) = tokio::fs::remove_dir_all(&temp_dir).await {
        warn!("temp cleanup after export failed: {}", e);
    }
    if let Err(e) = ctx.paths().cleanup_project_temp(&state) {
        warn!("project scratch cleanup failed: {}", e);
    }

    let shots_exported = clips.len();
    let result = ExportResult {
        video_url: ctx.paths().to_url(&output),
        shots_exported,
        duration_sec,
        scene_transitions: shots_exported.saturating_sub(1),
        skipped_shots: skipped,
        generation_time,
        video_model,
    };

    ctx.export_status.update(
        project_id,
        ExportPhase::Done,
        total,
        total,
        format!("exported {} shots", shots_exported),
    );
    info!(
        "export finished for {}: {} shots, {:.1}s",
        project_id, shots_exported, duration_sec
    );
    Ok(result)
}

/// The project's source audio file.
fn resolve_audio(ctx: &EngineContext, state: &ProjectState) -> EngineResult<PathBuf> {
    let audio_dir = ctx.paths().audio_dir(state)?;
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&audio_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();
    entries
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::validation("project has no audio file to export against"))
}

/// Stills mode: hold the rendered image for the shot's storyboard length.
async fn build_still_clip(
    ctx: &EngineContext,
    state: &ProjectState,
    shot: &muvi_models::Shot,
    options: &ExportOptions,
    temp_dir: &std::path::Path,
    idx: usize,
) -> EngineResult<PathBuf> {
    let url = shot.render.image_url.as_deref().expect("filtered above");
    let image = ctx.paths().from_url_existing(url, Some(state))?;
    let clip = temp_dir.join(format!("clip_{:03}.mp4", idx));
    ctx.muxer
        .image_to_clip(
            &image,
            shot.duration(),
            options.width,
            options.height,
            options.fps,
            &clip,
        )
        .await?;
    Ok(clip)
}

/// Img2vid mode: reconcile the generated clip's real length with the
/// storyboard's. Longer clips are trimmed (stream copy, natural motion
/// preserved); shorter ones are retimed; trim failures fall back to
/// retiming.
async fn build_video_clip(
    ctx: &EngineContext,
    state: &ProjectState,
    shot: &muvi_models::Shot,
    temp_dir: &std::path::Path,
    idx: usize,
    video_model: &mut Option<String>,
) -> EngineResult<PathBuf> {
    let video = shot
        .render
        .video
        .as_ref()
        .ok_or_else(|| EngineError::validation(format!("shot {} has no video", shot.shot_id)))?;
    let source = ctx
        .paths()
        .from_url_existing(&video.video_url, Some(state))?;
    video_model.get_or_insert_with(|| video.model.clone());

    let actual = video.duration;
    let target = video.target_duration;
    let clip = temp_dir.join(format!("clip_{:03}.mp4", idx));

    if actual > target + TRIM_TOLERANCE_SECS {
        match ctx.muxer.trim(&source, target, &clip).await {
            Ok(()) => return Ok(clip),
            Err(e) => {
                warn!("trim failed for {}, retiming instead: {}", shot.shot_id, e);
                ctx.muxer
                    .speed_adjust(&source, actual / target, &clip)
                    .await?;
                return Ok(clip);
            }
        }
    }

    if actual < target {
        ctx.muxer
            .speed_adjust(&source, actual / target, &clip)
            .await?;
        return Ok(clip);
    }

    // Close enough: play as generated.
    tokio::fs::copy(&source, &clip).await?;
    Ok(clip)
}
