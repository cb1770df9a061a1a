//! FAL generation backend.
//!
//! Speaks the synchronous `fal.run` surface: one POST per generation with
//! a model-specific payload, one multipart POST for uploads. Payload
//! shapes differ per model family and are kept together here so the rest
//! of the pipeline never sees wire formats.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use muvi_models::{Aspect, ImageModel, VideoModel};

use crate::backend::{GeneratedVideo, GenerationBackend, Transcription};
use crate::error::{GenError, GenResult};

/// Endpoint for the audio-understanding model.
const AUDIO_UNDERSTANDING_ENDPOINT: &str = "fal-ai/audio-understanding";

/// Endpoint for whisper transcription.
const WHISPER_ENDPOINT: &str = "fal-ai/whisper";

/// Hard timeout for generation calls.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard timeout for uploads and HEAD checks.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// FAL API client.
pub struct FalBackend {
    api_key: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    images: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

impl FalBackend {
    /// Construct from the environment. Fails fast when `FAL_API_KEY` is
    /// missing so operations that need the backend never get to call time
    /// without credentials.
    pub fn from_env() -> GenResult<Self> {
        let api_key =
            std::env::var("FAL_API_KEY").map_err(|_| GenError::MissingCredential("FAL_API_KEY"))?;
        Ok(Self::new(api_key, "https://fal.run"))
    }

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> GenResult<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.api_key))
            .timeout(GENERATION_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenError::Timeout(GENERATION_TIMEOUT.as_secs())
                } else {
                    GenError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    fn parse_image_response(value: Value) -> GenResult<String> {
        let parsed: ImagesResponse = serde_json::from_value(value)
            .map_err(|e| GenError::bad_response(format!("image response: {e}")))?;
        parsed
            .images
            .into_iter()
            .next()
            .map(|i| i.url)
            .ok_or_else(|| GenError::bad_response("image response contained no images"))
    }

    /// Text-to-image payload for one family.
    fn t2i_payload(model: ImageModel, prompt: &str, aspect: Aspect) -> Value {
        let (width, height) = aspect.dimensions();
        match model {
            ImageModel::Nanobanana => json!({
                "prompt": prompt,
                "aspect_ratio": aspect.ratio(),
                "num_images": 1,
                "output_format": "png",
            }),
            ImageModel::Seedream45 => json!({
                "prompt": prompt,
                "image_size": {"width": width, "height": height},
                "num_images": 1,
            }),
            ImageModel::Flux2 => json!({
                "prompt": prompt,
                "image_size": aspect.image_size(),
                "num_inference_steps": 28,
                "guidance_scale": 3.5,
            }),
        }
    }

    /// Img2img payload for one family; references already truncated.
    fn edit_payload(model: ImageModel, prompt: &str, image_urls: &[String], aspect: Aspect) -> Value {
        let (width, height) = aspect.dimensions();
        match model {
            ImageModel::Nanobanana => json!({
                "prompt": prompt,
                "image_urls": image_urls,
                "aspect_ratio": aspect.ratio(),
                "output_format": "png",
            }),
            ImageModel::Seedream45 => json!({
                "prompt": prompt,
                "image_urls": image_urls,
                "image_size": {"width": width, "height": height},
            }),
            ImageModel::Flux2 => json!({
                "prompt": prompt,
                "image_urls": image_urls,
                "image_size": aspect.image_size(),
            }),
        }
    }

    /// Image-to-video payload; every model encodes duration differently.
    fn video_payload(
        model: VideoModel,
        image_url: &str,
        motion_prompt: &str,
        duration_sec: f64,
        aspect: Aspect,
    ) -> Value {
        match model {
            // Veo takes an enum of whole seconds.
            VideoModel::Veo3Fast => {
                let duration = if duration_sec <= 4.0 {
                    "4s"
                } else if duration_sec <= 6.0 {
                    "6s"
                } else {
                    "8s"
                };
                json!({
                    "prompt": motion_prompt,
                    "image_url": image_url,
                    "duration": duration,
                    "generate_audio": false,
                    "aspect_ratio": aspect.ratio(),
                })
            }
            VideoModel::Kling25 => {
                let duration = if duration_sec <= 5.0 { "5" } else { "10" };
                json!({
                    "prompt": motion_prompt,
                    "image_url": image_url,
                    "duration": duration,
                })
            }
            // Wan picks resolution by aspect.
            VideoModel::Wan25 => {
                let duration = if duration_sec <= 5.0 {
                    "5"
                } else if duration_sec <= 10.0 {
                    "10"
                } else {
                    "15"
                };
                let resolution = match aspect {
                    Aspect::Horizontal => "1080p",
                    Aspect::Vertical | Aspect::Square => "720p",
                };
                json!({
                    "prompt": motion_prompt,
                    "image_url": image_url,
                    "duration": duration,
                    "resolution": resolution,
                })
            }
            // LTX counts frames at a fixed 25 fps.
            VideoModel::Ltx2Fast => {
                let frames = (25.0 * duration_sec).round() as u32;
                json!({
                    "prompt": motion_prompt,
                    "image_url": image_url,
                    "num_frames": frames,
                    "frame_rate": 25,
                })
            }
        }
    }

    fn parse_video_response(model: VideoModel, value: Value) -> GenResult<GeneratedVideo> {
        let video_url = value
            .pointer("/video/url")
            .and_then(Value::as_str)
            .or_else(|| value.get("video_url").and_then(Value::as_str))
            .ok_or_else(|| GenError::bad_response("video response missing video url"))?
            .to_string();

        let duration = value
            .pointer("/video/duration")
            .or_else(|| value.get("duration"))
            .and_then(Value::as_f64);

        Ok(GeneratedVideo {
            video_url,
            duration,
            has_audio: model.supports_audio(),
        })
    }
}

#[async_trait]
impl GenerationBackend for FalBackend {
    async fn text_to_image(
        &self,
        model: ImageModel,
        prompt: &str,
        aspect: Aspect,
    ) -> GenResult<String> {
        let payload = Self::t2i_payload(model, prompt, aspect);
        let value = self.post(model.t2i_endpoint(), &payload).await?;
        Self::parse_image_response(value)
    }

    async fn edit_image(
        &self,
        model: ImageModel,
        prompt: &str,
        image_urls: &[String],
        aspect: Aspect,
    ) -> GenResult<String> {
        let capped: Vec<String> = image_urls
            .iter()
            .take(model.max_edit_refs())
            .cloned()
            .collect();
        let payload = Self::edit_payload(model, prompt, &capped, aspect);
        let value = self.post(model.edit_endpoint(), &payload).await?;
        Self::parse_image_response(value)
    }

    async fn image_to_video(
        &self,
        model: VideoModel,
        image_url: &str,
        motion_prompt: &str,
        duration_sec: f64,
        aspect: Aspect,
    ) -> GenResult<GeneratedVideo> {
        let payload = Self::video_payload(model, image_url, motion_prompt, duration_sec, aspect);
        let value = self.post(model.endpoint(), &payload).await?;
        Self::parse_video_response(model, value)
    }

    async fn understand_audio(&self, audio_url: &str, prompt: &str) -> GenResult<Value> {
        let payload = json!({
            "audio_url": audio_url,
            "prompt": prompt,
        });
        self.post(AUDIO_UNDERSTANDING_ENDPOINT, &payload).await
    }

    async fn transcribe(&self, audio_url: &str) -> GenResult<Transcription> {
        let payload = json!({
            "audio_url": audio_url,
            "language": "en",
            "chunk_level": "segment",
            "version": "3",
        });
        let value = self.post(WHISPER_ENDPOINT, &payload).await?;
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| GenError::bad_response("transcription missing text"))?
            .to_string();
        Ok(Transcription { text })
    }

    async fn upload_file(&self, path: &Path) -> GenResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        info!("uploading {} ({} bytes)", filename, bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/storage/upload", self.base_url))
            .header("Authorization", format!("Key {}", self.api_key))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| GenError::bad_response(format!("upload response: {e}")))?;
        Ok(parsed.url)
    }

    async fn head_ok(&self, url: &str) -> bool {
        match self
            .client
            .head(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
