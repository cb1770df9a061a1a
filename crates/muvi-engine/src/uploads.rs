//! Upload caching for reference images.
//!
//! External editors need externally reachable URLs. Every local artifact
//! is uploaded at most once per project; the mapping lives in project
//! state so it survives restarts, but entries are soft and revalidated
//! with a HEAD before reuse.

use tracing::{debug, info, warn};

use muvi_models::ProjectState;

use crate::context::EngineContext;
use crate::error::EngineResult;

/// Resolve a state URL to an externally reachable URL, uploading if
/// needed. Returns the external URL and whether the cache was mutated
/// (the caller is responsible for persisting state).
pub async fn upload_local_ref(
    ctx: &EngineContext,
    state: &mut ProjectState,
    url: &str,
) -> EngineResult<(String, bool)> {
    // External references pass through untouched.
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok((url.to_string(), false));
    }

    // Cached entry: trust it only after a HEAD.
    if let Some(cached) = state.project.fal_upload_cache.get(url).cloned() {
        if ctx.backend.head_ok(&cached).await {
            return Ok((cached, false));
        }
        warn!("cached upload for {} is stale, re-uploading", url);
        state.project.fal_upload_cache.remove(url);
    }

    let file = ctx.paths().from_url_existing(url, Some(state))?;
    let external = ctx.backend.upload_file(&file).await?;
    debug!("uploaded {} -> {}", url, external);
    state
        .project
        .fal_upload_cache
        .insert(url.to_string(), external.clone());
    Ok((external, true))
}

/// Upload every reference the render batch will need: canonical cast
/// refs, scene decors and wardrobe previews. Returns how many uploads
/// actually happened (cached entries are revalidated on use, not here).
pub async fn prewarm_upload_cache(
    ctx: &EngineContext,
    state: &mut ProjectState,
) -> EngineResult<usize> {
    let mut urls: Vec<String> = Vec::new();
    for refs in state.cast_matrix.character_refs.values() {
        urls.extend(refs.ref_a.iter().cloned());
        urls.extend(refs.ref_b.iter().cloned());
    }
    for scene in &state.cast_matrix.scenes {
        urls.extend(scene.decor_refs.iter().cloned());
        urls.extend(scene.wardrobe_ref.iter().cloned());
    }

    let mut uploaded = 0;
    for url in urls {
        if url.starts_with("http") || state.project.fal_upload_cache.contains_key(&url) {
            continue;
        }
        match upload_local_ref(ctx, state, &url).await {
            Ok((_, true)) => uploaded += 1,
            Ok(_) => {}
            Err(e) => warn!("prewarm upload failed for {}: {}", url, e),
        }
    }

    if uploaded > 0 {
        info!("prewarmed {} uploads", uploaded);
    }
    Ok(uploaded)
}
