//! The generation backend seam.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use muvi_models::{Aspect, ImageModel, VideoModel};

use crate::error::GenResult;

/// Result of an image-to-video call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedVideo {
    pub video_url: String,
    /// Duration as reported by the backend, when it reports one.
    pub duration: Option<f64>,
    pub has_audio: bool,
}

/// Result of a transcription call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
}

/// Everything the orchestrator needs from the external generation
/// services. One implementation speaks the FAL wire protocol; tests use
/// the generated mock.
///
/// Implementations surface 4xx and 5xx distinctly (via the error's
/// transience) so the retry layer can classify.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Text-to-image. Returns the generated image URL.
    async fn text_to_image(
        &self,
        model: ImageModel,
        prompt: &str,
        aspect: Aspect,
    ) -> GenResult<String>;

    /// Img2img edit over reference images. Returns the generated image URL.
    /// Implementations truncate `image_urls` to the model's reference cap.
    async fn edit_image(
        &self,
        model: ImageModel,
        prompt: &str,
        image_urls: &[String],
        aspect: Aspect,
    ) -> GenResult<String>;

    /// Image-to-video with a motion prompt. `duration_sec` must already be
    /// clamped into the model's supported range.
    async fn image_to_video(
        &self,
        model: VideoModel,
        image_url: &str,
        motion_prompt: &str,
        duration_sec: f64,
        aspect: Aspect,
    ) -> GenResult<GeneratedVideo>;

    /// Audio understanding: free-form JSON describing the track. The blob
    /// may arrive markdown-fenced; callers parse defensively.
    async fn understand_audio(&self, audio_url: &str, prompt: &str) -> GenResult<serde_json::Value>;

    /// Whisper-style transcription.
    async fn transcribe(&self, audio_url: &str) -> GenResult<Transcription>;

    /// Upload a local file, returning a long-lived external URL.
    async fn upload_file(&self, path: &Path) -> GenResult<String>;

    /// Cheap reachability check for a previously uploaded URL.
    async fn head_ok(&self, url: &str) -> bool;
}

/// LLM completion seam, separate from the media backends because projects
/// choose the LLM independently of the image family.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a completion that must return a JSON document. Implementations
    /// strip markdown fences before parsing.
    async fn complete_json(
        &self,
        model_preference: &str,
        system: &str,
        prompt: &str,
    ) -> GenResult<serde_json::Value>;
}

/// Strip markdown code fences from an LLM response and parse the JSON
/// inside.
pub fn parse_fenced_json(text: &str) -> GenResult<serde_json::Value> {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }
    let trimmed = trimmed.trim();

    serde_json::from_str(trimmed)
        .map_err(|e| crate::error::GenError::BadLlmJson(format!("{e}: {}", truncate(trimmed, 200))))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
