//! The run orchestrator: extract → chunk → sequential refine loop → write.
//!
//! A [`Refinery`] owns one run. It moves through
//! [`RunState::Idle`] → `Extracted` → `Chunked` → `Refining` and ends in
//! either `Finalized` (records written) or `Aborted` (fatal error, nothing
//! written). Terminal states are final; a new run needs a new `Refinery`.
//!
//! Per-chunk failures never abort the loop. They are logged, collected as
//! [`ChunkError`]s, and the chunk contributes no record. The pacer runs
//! after every chunk, whatever happened to it.

use crate::config::RefineryConfig;
use crate::error::{ChunkError, RefineryError};
use crate::output::{write_records, RefinedRecord, RefineryOutput, RefineryStats};
use crate::pacing::Pace;
use crate::pipeline::chunk::{Chunk, RecursiveCharacterSplitter};
use crate::pipeline::decode::decode_fields;
use crate::pipeline::extract::{PdfiumExtractor, RawDocument, TextExtractor};
use crate::pipeline::input;
use crate::pipeline::refine::{refine_chunk, Generate, LlmGenerator};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Provider used when neither the config nor the environment names one.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Model used with [`DEFAULT_PROVIDER`] when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracted,
    Chunked,
    Refining,
    Finalized,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finalized | RunState::Aborted)
    }
}

/// One refinery run and the collaborators it drives.
pub struct Refinery {
    config: RefineryConfig,
    extractor: Arc<dyn TextExtractor>,
    generator: Arc<dyn Generate>,
    pacer: Arc<dyn Pace>,
    state: RunState,
}

impl Refinery {
    /// Assemble a run from explicit collaborators.
    ///
    /// No credential check happens here; the caller owns the generator.
    pub fn new(
        config: RefineryConfig,
        extractor: Arc<dyn TextExtractor>,
        generator: Arc<dyn Generate>,
        pacer: Arc<dyn Pace>,
    ) -> Self {
        Self {
            config,
            extractor,
            generator,
            pacer,
            state: RunState::Idle,
        }
    }

    /// Assemble a run with the pdfium extractor, an edgequake-llm generator
    /// and the configured pacing policy.
    ///
    /// Fails with [`RefineryError::MissingCredential`] before anything else
    /// runs when the provider's API key is not in the environment.
    pub fn from_config(config: RefineryConfig) -> Result<Self, RefineryError> {
        Self::from_config_with_env(config, |var| std::env::var(var).ok())
    }

    fn from_config_with_env(
        config: RefineryConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RefineryError> {
        config.validate()?;
        let provider = resolve_provider(&config, env)?;
        let generator = Arc::new(LlmGenerator::new(provider, &config));
        let extractor = Arc::new(PdfiumExtractor::new(config.password.clone()));
        let pacer = config.pacing.build();
        Ok(Self::new(config, extractor, generator, pacer))
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &RefineryConfig {
        &self.config
    }

    /// Execute the run and write the output file.
    ///
    /// # Errors
    /// Only fatal conditions are returned: unusable input, an empty
    /// document, no chunks, no records, or a failed write. Chunk-level
    /// failures are reported in [`RefineryOutput::failures`].
    pub async fn run(&mut self) -> Result<RefineryOutput, RefineryError> {
        if self.state != RunState::Idle {
            return Err(RefineryError::Internal(format!(
                "run already started (state: {:?})",
                self.state
            )));
        }
        let result = self.run_inner().await;
        if let Err(ref e) = result {
            warn!("Run aborted: {}", e);
            self.state = RunState::Aborted;
        }
        result
    }

    async fn run_inner(&mut self) -> Result<RefineryOutput, RefineryError> {
        let total_start = Instant::now();
        let mut stats = RefineryStats::default();
        info!("Starting refinery run: {}", self.config.input);

        // ── Step 1: Extract ──────────────────────────────────────────────
        let extract_start = Instant::now();
        let (pdf_path, document) = extract_document(&self.config, self.extractor.as_ref()).await?;
        stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;
        stats.total_pages = document.page_count;
        stats.document_chars = document.char_count();
        self.state = RunState::Extracted;

        // ── Step 2: Chunk ────────────────────────────────────────────────
        let chunk_start = Instant::now();
        let chunks = RecursiveCharacterSplitter::from_config(&self.config)?.split(&document.text);
        drop(document);
        stats.chunk_duration_ms = chunk_start.elapsed().as_millis() as u64;
        stats.total_chunks = chunks.len();
        info!("Split {} into {} chunks", pdf_path.display(), chunks.len());

        let selected = select_chunks(&self.config, chunks)?;
        stats.selected_chunks = selected.len();
        self.state = RunState::Chunked;

        // ── Step 3: Refine loop ──────────────────────────────────────────
        self.state = RunState::Refining;
        let refine_start = Instant::now();
        let (records, failures) = self.refine_all(&selected, &mut stats).await;
        stats.refine_duration_ms = refine_start.elapsed().as_millis() as u64;

        stats.refined_chunks = records.len();
        stats.parse_failures = failures.iter().filter(|f| f.is_parse_failure()).count();
        stats.generation_failures = failures.len() - stats.parse_failures;

        if records.is_empty() {
            return Err(RefineryError::NoRecords {
                attempted: selected.len(),
                first_error: failures
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no chunks were attempted".to_string()),
            });
        }

        // ── Step 4: Write ────────────────────────────────────────────────
        write_records(&self.config.output_path, &records).await?;
        self.state = RunState::Finalized;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Refinery complete: {}/{} chunks refined, {} records written to {} in {}ms",
            stats.refined_chunks,
            stats.selected_chunks,
            records.len(),
            self.config.output_path.display(),
            stats.total_duration_ms
        );

        Ok(RefineryOutput {
            records,
            failures,
            stats,
        })
    }

    async fn refine_all(
        &self,
        selected: &[Chunk],
        stats: &mut RefineryStats,
    ) -> (Vec<RefinedRecord>, Vec<ChunkError>) {
        let callback: ProgressCallback = self
            .config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let total = selected.len();
        let mut records = Vec::with_capacity(total);
        let mut failures = Vec::new();

        callback.on_run_start(stats.total_chunks, total);

        for (position, chunk) in selected.iter().enumerate() {
            info!("Refining chunk {} ({}/{})", chunk.number(), position + 1, total);
            callback.on_chunk_start(chunk.number(), total);

            let outcome = match refine_chunk(self.generator.as_ref(), chunk, &self.config).await {
                Ok(generation) => {
                    stats.total_input_tokens += generation.input_tokens;
                    stats.total_output_tokens += generation.output_tokens;
                    decode_fields(&generation.text).map_err(|e| {
                        warn!(
                            "Chunk {}: response is not a valid record: {}\nRaw response:\n{}",
                            chunk.number(),
                            e,
                            generation.text
                        );
                        ChunkError::ParseFailed {
                            chunk: chunk.number(),
                            detail: e.to_string(),
                            raw: generation.text.clone(),
                        }
                    })
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(fields) => {
                    let id = self.config.id_numbering.record_id(chunk.index, position);
                    debug!("Chunk {} → {} ({})", chunk.number(), id, fields.title);
                    callback.on_chunk_complete(chunk.number(), total, &fields.title);
                    records.push(fields.into_record(id));
                }
                Err(e) => {
                    callback.on_chunk_error(chunk.number(), total, &e.to_string());
                    if let ChunkError::ParseFailed { ref raw, .. } = e {
                        callback.on_chunk_raw_response(chunk.number(), raw);
                    }
                    failures.push(e);
                }
            }

            self.pacer.pause().await;
        }

        callback.on_run_complete(total, records.len());
        (records, failures)
    }
}

/// Chunks a run would send to the model, without calling it.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub total_pages: usize,
    pub document_chars: usize,
    pub total_chunks: usize,
    pub selected: Vec<Chunk>,
}

/// Extract and chunk the input, then apply the selection.
///
/// Needs neither a provider nor a credential.
pub async fn plan_chunks(config: &RefineryConfig) -> Result<ChunkPlan, RefineryError> {
    config.validate()?;
    let extractor = PdfiumExtractor::new(config.password.clone());
    let (_, document) = extract_document(config, &extractor).await?;
    let chunks = RecursiveCharacterSplitter::from_config(config)?.split(&document.text);
    let total_chunks = chunks.len();
    let selected = select_chunks(config, chunks)?;
    Ok(ChunkPlan {
        total_pages: document.page_count,
        document_chars: document.char_count(),
        total_chunks,
        selected,
    })
}

/// Run a complete refinery pass with the default collaborators.
pub async fn refine(config: RefineryConfig) -> Result<RefineryOutput, RefineryError> {
    Refinery::from_config(config)?.run().await
}

/// Synchronous wrapper around [`refine`].
///
/// Creates a temporary tokio runtime internally.
pub fn refine_sync(config: RefineryConfig) -> Result<RefineryOutput, RefineryError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RefineryError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(refine(config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn extract_document(
    config: &RefineryConfig,
    extractor: &dyn TextExtractor,
) -> Result<(PathBuf, RawDocument), RefineryError> {
    let resolved = input::resolve_input(&config.input, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();
    let document = extractor.extract(&pdf_path).await?;

    if document.is_empty() {
        return Err(RefineryError::EmptyDocument {
            path: pdf_path,
            pages: document.page_count,
        });
    }
    info!(
        "Loaded {} pages ({} chars) from {}",
        document.page_count,
        document.char_count(),
        pdf_path.display()
    );
    Ok((pdf_path, document))
}

fn select_chunks(config: &RefineryConfig, chunks: Vec<Chunk>) -> Result<Vec<Chunk>, RefineryError> {
    let total = chunks.len();
    if total == 0 {
        return Err(RefineryError::NoChunks {
            total: 0,
            selected: 0,
        });
    }

    let selection = config.effective_selection();
    let keep = selection.to_indices(total);
    if config.test_mode {
        info!("Test mode: processing the first {} of {} chunks", keep.len(), total);
    }
    if keep.is_empty() {
        return Err(RefineryError::NoChunks { total, selected: 0 });
    }

    let mut chunks: Vec<Option<Chunk>> = chunks.into_iter().map(Some).collect();
    Ok(keep
        .into_iter()
        .filter_map(|i| chunks.get_mut(i).and_then(Option::take))
        .collect())
}

/// API-key variable for a provider, or `None` when it needs none.
pub fn credential_var(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "xai" => Some("XAI_API_KEY"),
        _ => None,
    }
}

/// Fail with [`RefineryError::MissingCredential`] if the provider's key is
/// absent or blank according to `lookup`.
fn check_credential(
    provider: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), RefineryError> {
    match credential_var(provider) {
        Some(var) if lookup(var).is_none_or(|v| v.trim().is_empty()) => {
            Err(RefineryError::MissingCredential {
                var: var.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn default_model(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Some(DEFAULT_GEMINI_MODEL),
        "openai" => Some("gpt-4.1-mini"),
        "anthropic" => Some("claude-sonnet-4-20250514"),
        "mistral" => Some("mistral-small-latest"),
        _ => None,
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built `config.provider`, used as-is;
/// 2. `config.provider_name`, else `EDGEQUAKE_LLM_PROVIDER`, else `gemini`;
///    the model is `config.model`, else `EDGEQUAKE_MODEL`, else the
///    provider's default.
///
/// The credential check runs before the provider is constructed.
fn resolve_provider(
    config: &RefineryConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LLMProvider>, RefineryError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }
    let non_empty_env = |var: &str| env(var).filter(|v| !v.trim().is_empty());

    let name = config
        .provider_name
        .clone()
        .or_else(|| non_empty_env("EDGEQUAKE_LLM_PROVIDER"))
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
    check_credential(&name, &env)?;

    let model = config
        .model
        .clone()
        .or_else(|| non_empty_env("EDGEQUAKE_MODEL"))
        .or_else(|| default_model(&name).map(str::to_string))
        .ok_or_else(|| RefineryError::ProviderNotConfigured {
            provider: name.clone(),
            hint: "No default model for this provider; pass --model.".to_string(),
        })?;

    info!("Using provider {} with model {}", name, model);
    ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
        RefineryError::ProviderNotConfigured {
            provider: name.clone(),
            hint: format!("{e}"),
        }
    })
}
