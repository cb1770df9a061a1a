//! API routes.

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::admin::{cleanup_temp, health, session_costs};
use crate::handlers::audio::{patch_bpm, patch_lyrics, upload_audio};
use crate::handlers::cast::{add_cast, delete_cast, generate_canonical_refs, rerender_ref};
use crate::handlers::export::{export_status, export_video};
use crate::handlers::files::serve_file;
use crate::handlers::projects::{
    create_project, delete_project, get_project, list_projects, project_stats, update_settings,
};
use crate::handlers::render::{edit_shot, prewarm, render_shot};
use crate::handlers::storyboard::{
    autogen_scenes, build_sequences, expand_all_shots, expand_sequence, render_scene,
    repair_sequences, tighten_shots,
};
use crate::handlers::video::{generate_shot_video, generate_video_batch};
use crate::state::AppState;

/// Build the full router.
pub fn create_router(state: AppState) -> Router {
    let project_routes = Router::new()
        .route("/projects", post(create_project))
        .route("/projects", get(list_projects))
        .route("/projects/:project_id", get(get_project))
        .route("/projects/:project_id", delete(delete_project))
        .route("/projects/:project_id/settings", patch(update_settings))
        .route("/projects/:project_id/stats", get(project_stats));

    let audio_routes = Router::new()
        .route("/projects/:project_id/audio", post(upload_audio))
        .route("/projects/:project_id/audio/bpm", patch(patch_bpm))
        .route("/projects/:project_id/audio/lyrics", patch(patch_lyrics));

    let cast_routes = Router::new()
        .route("/projects/:project_id/cast", post(add_cast))
        .route("/projects/:project_id/cast/:cast_id", delete(delete_cast))
        .route(
            "/projects/:project_id/cast/:cast_id/canonical-refs",
            post(generate_canonical_refs),
        )
        .route(
            "/projects/:project_id/cast/:cast_id/refs/:variant",
            post(rerender_ref),
        );

    let storyboard_routes = Router::new()
        .route("/projects/:project_id/sequences", post(build_sequences))
        .route(
            "/projects/:project_id/sequences/repair",
            post(repair_sequences),
        )
        .route(
            "/projects/:project_id/sequences/:sequence_id/shots",
            post(expand_sequence),
        )
        .route("/projects/:project_id/shots/expand", post(expand_all_shots))
        .route("/projects/:project_id/shots/tighten", post(tighten_shots))
        .route("/projects/:project_id/scenes/autogen", post(autogen_scenes))
        .route(
            "/projects/:project_id/scenes/:scene_id/render",
            post(render_scene),
        );

    let render_routes = Router::new()
        .route(
            "/projects/:project_id/shots/:shot_id/render",
            post(render_shot),
        )
        .route("/projects/:project_id/shots/:shot_id/edit", post(edit_shot))
        .route("/projects/:project_id/render/prewarm", post(prewarm))
        .route(
            "/projects/:project_id/shots/:shot_id/video",
            post(generate_shot_video),
        )
        .route("/projects/:project_id/videos", post(generate_video_batch));

    let export_routes = Router::new()
        .route("/projects/:project_id/export", post(export_video))
        .route("/projects/:project_id/export/status", get(export_status));

    let admin_routes = Router::new()
        .route("/session/costs", get(session_costs))
        .route("/maintenance/cleanup-temp", post(cleanup_temp));

    let api_routes = Router::new()
        .merge(project_routes)
        .merge(audio_routes)
        .merge(cast_routes)
        .merge(storyboard_routes)
        .merge(render_routes)
        .merge(export_routes)
        .merge(admin_routes);

    Router::new()
        .nest("/api", api_routes)
        .route("/files/*path", get(serve_file))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
