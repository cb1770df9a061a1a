//! Video generation handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use muvi_engine::{generate_batch, BatchReport, VideoGenerator};
use muvi_models::{ProjectId, ShotId, ShotVideo, VideoModel};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateVideoRequest {
    #[serde(default)]
    pub video_model: Option<VideoModel>,
}

/// Generate a clip for one shot.
pub async fn generate_shot_video(
    State(app): State<AppState>,
    Path((project_id, shot_id)): Path<(ProjectId, ShotId)>,
    body: Option<Json<GenerateVideoRequest>>,
) -> ApiResult<Json<ShotVideo>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let video = VideoGenerator::new(&app.ctx)
        .generate_for_shot(project_id, &shot_id, request.video_model)
        .await?;
    Ok(Json(video))
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateBatchRequest {
    #[serde(default)]
    pub shot_ids: Option<Vec<ShotId>>,
    #[serde(default)]
    pub video_model: Option<VideoModel>,
}

/// Generate clips for every eligible shot.
pub async fn generate_video_batch(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    body: Option<Json<GenerateBatchRequest>>,
) -> ApiResult<Json<BatchReport>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let report = generate_batch(
        Arc::clone(&app.ctx),
        project_id,
        request.shot_ids,
        request.video_model,
    )
    .await?;
    Ok(Json(report))
}
