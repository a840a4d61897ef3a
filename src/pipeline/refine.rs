//! Refinement: one chunk → one model response.
//!
//! [`Generate`] is the seam between the refine loop and the model. The
//! production implementation, [`LlmGenerator`], wraps an edgequake-llm
//! provider; tests plug in scripted fakes.
//!
//! There are no retries. A failed or timed-out call drops the chunk and the
//! loop moves on to the next one after the usual pause.

use crate::config::RefineryConfig;
use crate::error::ChunkError;
use crate::pipeline::chunk::Chunk;
use crate::prompts::build_refine_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// System turn sent ahead of every chunk prompt.
pub const JSON_ONLY_SYSTEM: &str =
    "Respond with exactly one JSON object and nothing else. No markdown, no commentary.";

/// Raw text returned by one generation call, with token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Why a generation call produced nothing usable.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0}")]
    Failed(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("empty response")]
    Empty,
}

/// Sends one prompt to a model and returns its text.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerateError>;
}

/// [`Generate`] backed by an edgequake-llm provider.
pub struct LlmGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Option<Duration>,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &RefineryConfig) -> Self {
        let timeout = (config.api_timeout_secs > 0)
            .then(|| Duration::from_secs(config.api_timeout_secs));
        Self {
            provider,
            options: build_options(config),
            timeout,
        }
    }
}

#[async_trait]
impl Generate for LlmGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerateError> {
        let messages = vec![ChatMessage::system(JSON_ONLY_SYSTEM), ChatMessage::user(prompt)];
        let call = self.provider.chat(&messages, Some(&self.options));

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| GenerateError::Timeout(limit))?,
            None => call.await,
        };
        let response = result.map_err(|e| GenerateError::Failed(e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(GenerateError::Empty);
        }
        Ok(Generation {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Response format that asks the provider for a bare JSON object.
///
/// Gemini maps it to `responseMimeType: application/json`; OpenAI-compatible
/// providers send `response_format: {"type": "json_object"}`.
pub const JSON_RESPONSE_FORMAT: &str = "json_object";

/// Build `CompletionOptions` from the refinery config.
fn build_options(config: &RefineryConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        response_format: Some(JSON_RESPONSE_FORMAT.to_string()),
        ..Default::default()
    }
}

/// Build the prompt for `chunk` and send it through `generator`.
///
/// Every failure is returned as a [`ChunkError`] tagged with the chunk's
/// 1-based position; nothing here is fatal to the run.
pub async fn refine_chunk(
    generator: &dyn Generate,
    chunk: &Chunk,
    config: &RefineryConfig,
) -> Result<Generation, ChunkError> {
    let start = Instant::now();
    let prompt = build_refine_prompt(
        config.prompt_template.as_deref(),
        &config.source_label,
        &chunk.text,
    );

    match generator.generate(&prompt).await {
        Ok(generation) => {
            debug!(
                "Chunk {}: {} input tokens, {} output tokens, {:?}",
                chunk.number(),
                generation.input_tokens,
                generation.output_tokens,
                start.elapsed()
            );
            Ok(generation)
        }
        Err(GenerateError::Timeout(limit)) => {
            warn!("Chunk {}: generation timed out after {:?}", chunk.number(), limit);
            Err(ChunkError::Timeout {
                chunk: chunk.number(),
                secs: limit.as_secs(),
            })
        }
        Err(e) => {
            warn!("Chunk {}: generation failed: {}", chunk.number(), e);
            Err(ChunkError::GenerationFailed {
                chunk: chunk.number(),
                detail: e.to_string(),
            })
        }
    }
}
