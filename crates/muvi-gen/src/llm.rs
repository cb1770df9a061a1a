//! LLM completion client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{parse_fenced_json, LlmClient};
use crate::error::{GenError, GenResult};

/// Routed LLM endpoint; the model is picked per call.
const ANY_LLM_ENDPOINT: &str = "fal-ai/any-llm";

const LLM_TIMEOUT: Duration = Duration::from_secs(180);

/// Model used when a project has no LLM preference.
pub const DEFAULT_LLM_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// LLM client over the routed completion endpoint.
pub struct FalLlmClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl FalLlmClient {
    /// Construct from the environment; fails fast without `FAL_API_KEY`.
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
}

#[async_trait]
impl LlmClient for FalLlmClient {
    async fn complete_json(
        &self,
        model_preference: &str,
        system: &str,
        prompt: &str,
    ) -> GenResult<Value> {
        let model = if model_preference.is_empty() {
            DEFAULT_LLM_MODEL
        } else {
            model_preference
        };
        debug!("LLM completion via {}", model);

        let payload = json!({
            "model": model,
            "system_prompt": system,
            "prompt": prompt,
        });

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, ANY_LLM_ENDPOINT))
            .header("Authorization", format!("Key {}", self.api_key))
            .timeout(LLM_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenError::Timeout(LLM_TIMEOUT.as_secs())
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

        let value: Value = response.json().await?;
        let output = value
            .get("output")
            .and_then(Value::as_str)
            .ok_or_else(|| GenError::bad_response("LLM response missing output"))?;

        parse_fenced_json(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_completion_unwraps_fenced_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/any-llm"))
            .and(body_partial_json(json!({"model": "openai/gpt-5"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": "```json\n{\"story_summary\": \"neon heist\"}\n```"
            })))
            .mount(&server)
            .await;

        let client = FalLlmClient::new("k", server.uri());
        let value = client
            .complete_json("openai/gpt-5", "you are a director", "plan it")
            .await
            .unwrap();
        assert_eq!(value["story_summary"], "neon heist");
    }

    #[tokio::test]
    async fn test_empty_preference_uses_default_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": DEFAULT_LLM_MODEL})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"output": "{\"ok\": true}"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = FalLlmClient::new("k", server.uri());
        client.complete_json("", "s", "p").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_json_output_is_permanent_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"output": "I cannot do that"})),
            )
            .mount(&server)
            .await;

        let client = FalLlmClient::new("k", server.uri());
        let err = client.complete_json("m", "s", "p").await.unwrap_err();
        assert!(matches!(err, GenError::BadLlmJson(_)));
        assert!(!err.is_transient());
    }
}
