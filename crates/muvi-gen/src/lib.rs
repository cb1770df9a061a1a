//! Generation backend clients for the muvi pipeline.
//!
//! The orchestrator consumes the [`GenerationBackend`] and [`LlmClient`]
//! traits; `FalBackend` and `FalLlmClient` are the production
//! implementations. Retry policy and pricing live here too so every
//! external call shares one set of rules.

mod backend;
mod error;
mod fal;
mod llm;
mod pricing;
mod retry;

pub use backend::{parse_fenced_json, GeneratedVideo, GenerationBackend, LlmClient, Transcription};
pub use error::{GenError, GenResult};
pub use fal::FalBackend;
pub use llm::{FalLlmClient, DEFAULT_LLM_MODEL};
pub use pricing::PricingTable;
pub use retry::{retry, RetryPolicy};

#[cfg(any(test, feature = "mocks"))]
pub use backend::{MockGenerationBackend, MockLlmClient};
