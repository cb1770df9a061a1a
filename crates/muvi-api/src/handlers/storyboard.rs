//! Storyboard handlers: sequences, shots, scenes.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use muvi_engine::{repair, tighten, ReferenceGraph, RepairReport, StoryboardPlanner};
use muvi_models::{ProjectId, ProjectState, SceneId, SequenceId};
use muvi_state::SaveOptions;

use crate::error::ApiResult;
use crate::state::AppState;

/// Build the sequence timeline (one LLM call).
pub async fn build_sequences(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    StoryboardPlanner::new(&app.ctx)
        .build_sequences(&mut state)
        .await?;
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Repair the timeline against the audio duration.
pub async fn repair_sequences(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<RepairReport>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    let report = repair(&mut state)?;
    if report.changed() {
        app.ctx
            .store
            .save_unlocked(&mut state, SaveOptions::forced())
            .await?;
    }
    drop(guard);
    Ok(Json(report))
}

/// Expand every sequence into shots.
pub async fn expand_all_shots(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    StoryboardPlanner::new(&app.ctx)
        .expand_all(&mut state)
        .await?;
    tighten(&mut state);
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Expand a single sequence into shots.
pub async fn expand_sequence(
    State(app): State<AppState>,
    Path((project_id, sequence_id)): Path<(ProjectId, SequenceId)>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    StoryboardPlanner::new(&app.ctx)
        .expand_sequence(&mut state, &sequence_id)
        .await?;
    tighten(&mut state);
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Close sub-threshold gaps between adjacent shots.
pub async fn tighten_shots(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<serde_json::Value>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    let adjusted = tighten(&mut state);
    if adjusted > 0 {
        app.ctx
            .store
            .save_unlocked(&mut state, SaveOptions::forced())
            .await?;
    }
    drop(guard);
    Ok(Json(json!({ "adjusted": adjusted })))
}

/// Produce one decor-only scene per sequence.
pub async fn autogen_scenes(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    ReferenceGraph::new(&app.ctx)
        .autogen_scenes(&mut state)
        .await?;
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Render a scene's decor plates and wardrobe preview.
pub async fn render_scene(
    State(app): State<AppState>,
    Path((project_id, scene_id)): Path<(ProjectId, SceneId)>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    ReferenceGraph::new(&app.ctx)
        .render_scene(&mut state, &scene_id)
        .await?;
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}
