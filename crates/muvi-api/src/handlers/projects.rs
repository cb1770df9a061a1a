//! Project lifecycle handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use muvi_models::{
    Aspect, ImageModel, ProjectId, ProjectState, RenderStatus, StylePreset, VideoModel,
    STATE_VERSION,
};
use muvi_state::SaveOptions;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    #[serde(default)]
    pub style_preset: Option<String>,
    #[serde(default)]
    pub aspect: Option<Aspect>,
    #[serde(default)]
    pub llm: Option<String>,
    #[serde(default)]
    pub image_model: Option<ImageModel>,
    #[serde(default)]
    pub video_model: Option<VideoModel>,
    #[serde(default)]
    pub use_whisper: bool,
    #[serde(default)]
    pub project_location: Option<String>,
}

/// Create a project and write its first state document.
pub async fn create_project(
    State(app): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<Json<ProjectState>> {
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    if let Some(preset) = &request.style_preset {
        if !StylePreset::is_known(preset) {
            tracing::warn!("unknown style preset '{}', falling back to cinematic", preset);
        }
    }

    let mut state = ProjectState::new(muvi_models::Project::new(
        request.title.trim(),
        STATE_VERSION,
    ));
    if let Some(preset) = request.style_preset {
        state.project.style_preset = StylePreset::resolve(&preset).key.to_string();
    }
    if let Some(aspect) = request.aspect {
        state.project.aspect = aspect;
    }
    if let Some(llm) = request.llm {
        state.project.llm_preference = llm;
    }
    if let Some(image_model) = request.image_model {
        state.project.set_image_model(image_model);
    }
    if let Some(video_model) = request.video_model {
        state.project.video_model_choice = video_model;
    }
    state.project.use_whisper = request.use_whisper;
    state.project.project_location = request.project_location;

    app.ctx.store.create(&mut state).await?;
    Ok(Json(state))
}

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub title: String,
    pub style_preset: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub sequences: usize,
    pub shots: usize,
    pub shots_rendered: usize,
}

/// List every known project.
pub async fn list_projects(State(app): State<AppState>) -> ApiResult<Json<Vec<ProjectSummary>>> {
    let mut summaries = Vec::new();
    for id in app.ctx.store.list_ids() {
        match app.ctx.store.load(id).await {
            Ok(state) => summaries.push(summarize(&state)),
            Err(e) => tracing::warn!("skipping unloadable project {}: {}", id, e),
        }
    }
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(Json(summaries))
}

fn summarize(state: &ProjectState) -> ProjectSummary {
    ProjectSummary {
        id: state.project.id,
        title: state.project.title.clone(),
        style_preset: state.project.style_preset.clone(),
        updated_at: state.project.updated_at,
        sequences: state.storyboard.sequences.len(),
        shots: state.storyboard.shots.len(),
        shots_rendered: state
            .storyboard
            .shots
            .iter()
            .filter(|s| s.render.status == RenderStatus::Done)
            .count(),
    }
}

/// Load a project (recovery and migration run on the way).
pub async fn get_project(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<ProjectState>> {
    Ok(Json(app.ctx.store.load(project_id).await?))
}

/// Delete a project and its folder.
pub async fn delete_project(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<serde_json::Value>> {
    app.ctx.store.delete(project_id).await?;
    Ok(Json(serde_json::json!({ "deleted": project_id })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub title: Option<String>,
    pub style_preset: Option<String>,
    pub aspect: Option<Aspect>,
    pub video_model: Option<VideoModel>,
    pub use_whisper: Option<bool>,
    pub image_model: Option<ImageModel>,
}

/// Partial settings update. Changing the image model re-locks the render
/// endpoints.
pub async fn update_settings(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    Json(request): Json<UpdateSettingsRequest>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;

    if let Some(title) = request.title {
        if title.trim().is_empty() {
            return Err(ApiError::bad_request("title must not be empty"));
        }
        state.project.title = title.trim().to_string();
    }
    if let Some(preset) = request.style_preset {
        state.project.style_preset = StylePreset::resolve(&preset).key.to_string();
    }
    if let Some(aspect) = request.aspect {
        state.project.aspect = aspect;
    }
    if let Some(video_model) = request.video_model {
        state.project.video_model_choice = video_model;
    }
    if let Some(use_whisper) = request.use_whisper {
        state.project.use_whisper = use_whisper;
    }
    if let Some(image_model) = request.image_model {
        state.project.set_image_model(image_model);
    }

    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

#[derive(Debug, Serialize)]
pub struct ProjectStats {
    pub summary: ProjectSummary,
    pub cast: usize,
    pub cast_with_refs: usize,
    pub scenes: usize,
    pub scenes_rendered: usize,
    pub shots_with_video: usize,
    pub cost_total: f64,
}

/// Progress counts for the UI dashboard.
pub async fn project_stats(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<ProjectStats>> {
    let state = app.ctx.store.load(project_id).await?;
    Ok(Json(ProjectStats {
        summary: summarize(&state),
        cast: state.cast.len(),
        cast_with_refs: state
            .cast_matrix
            .character_refs
            .values()
            .filter(|r| r.is_complete())
            .count(),
        scenes: state.cast_matrix.scenes.len(),
        scenes_rendered: state
            .cast_matrix
            .scenes
            .iter()
            .filter(|s| !s.decor_refs.is_empty())
            .count(),
        shots_with_video: state
            .storyboard
            .shots
            .iter()
            .filter(|s| s.render.video.is_some())
            .count(),
        cost_total: state.costs.total,
    }))
}
