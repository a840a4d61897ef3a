//! Configuration types for a refinery run.
//!
//! Every knob lives in [`RefineryConfig`], built via its
//! [`RefineryConfigBuilder`] and handed to the orchestrator at construction.
//! Nothing is read from module-level state: two runs with two configs can
//! coexist in one process.

use crate::error::RefineryError;
use crate::pacing::PacingPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default input document, relative to the working directory.
pub const DEFAULT_INPUT: &str = "B09514-eng.pdf";

/// Default output file, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = "processed_data.json";

/// Target chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 7500;

/// Characters shared between neighbouring chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 400;

/// Separator priority: paragraph, line, word, then hard cut.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Number of chunks processed when `test_mode` is on.
pub const TEST_MODE_CHUNKS: usize = 3;

/// Label written into each record's `source` field by the default prompt.
pub const DEFAULT_SOURCE_LABEL: &str = "WHO Guidelines for Malaria";

/// Configuration for a refinery run.
///
/// # Example
/// ```rust
/// use edgequake_refinery::RefineryConfig;
///
/// let config = RefineryConfig::builder()
///     .input("guidelines.pdf")
///     .output_path("records.json")
///     .test_mode(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 7500);
/// ```
#[derive(Clone)]
pub struct RefineryConfig {
    /// Local PDF path or HTTP/HTTPS URL. Default: `B09514-eng.pdf`.
    pub input: String,

    /// Where the JSON array of records is written. Default: `processed_data.json`.
    pub output_path: PathBuf,

    /// Soft chunk length target in characters. Default: 7500.
    ///
    /// Roughly 1 000–1 500 words, which keeps one chunk plus the prompt well
    /// inside every supported model's context while giving the model enough
    /// text to infer a meaningful category and title.
    pub chunk_size: usize,

    /// Characters repeated between adjacent chunks. Default: 400.
    pub chunk_overlap: usize,

    /// Separator priority list for the splitter. Default: `["\n\n", "\n", " ", ""]`.
    pub separators: Vec<String>,

    /// Process only the first [`TEST_MODE_CHUNKS`] chunks. Default: false.
    ///
    /// Overrides [`Self::chunks`] when set.
    pub test_mode: bool,

    /// Which chunks to send to the model. Default: all.
    pub chunks: ChunkSelection,

    /// How record IDs are numbered. Default: [`IdNumbering::Source`].
    pub id_numbering: IdNumbering,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic", "ollama").
    /// If None along with `provider`, defaults to "gemini".
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per chunk. Default: 8192.
    ///
    /// The `content` field echoes the whole corrected chunk, so the budget
    /// must cover a full 7 500-character rewrite plus metadata.
    pub max_tokens: usize,

    /// Pause applied after every chunk. Default: fixed 2 s delay.
    pub pacing: PacingPolicy,

    /// Value the default prompt asks the model to put in `source`.
    pub source_label: String,

    /// Custom instruction template. If None, uses the built-in one.
    pub prompt_template: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-generation-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Optional progress callback for per-chunk events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RefineryConfig {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT.to_string(),
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            test_mode: false,
            chunks: ChunkSelection::default(),
            id_numbering: IdNumbering::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            pacing: PacingPolicy::default(),
            source_label: DEFAULT_SOURCE_LABEL.to_string(),
            prompt_template: None,
            password: None,
            download_timeout_secs: 120,
            api_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RefineryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefineryConfig")
            .field("input", &self.input)
            .field("output_path", &self.output_path)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("separators", &self.separators)
            .field("test_mode", &self.test_mode)
            .field("chunks", &self.chunks)
            .field("id_numbering", &self.id_numbering)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("pacing", &self.pacing)
            .field("source_label", &self.source_label)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RefineryConfig {
    /// Create a new builder for `RefineryConfig`.
    pub fn builder() -> RefineryConfigBuilder {
        RefineryConfigBuilder {
            config: Self::default(),
        }
    }

    /// The selection actually applied: test mode wins over `chunks`.
    pub fn effective_selection(&self) -> ChunkSelection {
        if self.test_mode {
            ChunkSelection::First(TEST_MODE_CHUNKS)
        } else {
            self.chunks.clone()
        }
    }

    /// Validate the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), RefineryError> {
        if self.chunk_size == 0 {
            return Err(RefineryError::InvalidConfig(
                "chunk size must be ≥ 1".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RefineryError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.separators.is_empty() {
            return Err(RefineryError::InvalidConfig(
                "at least one separator is required".into(),
            ));
        }
        if self.input.trim().is_empty() {
            return Err(RefineryError::InvalidConfig("input path is empty".into()));
        }
        self.pacing.validate()
    }
}

/// Builder for [`RefineryConfig`].
#[derive(Debug)]
pub struct RefineryConfigBuilder {
    config: RefineryConfig,
}

impl RefineryConfigBuilder {
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.config.input = input.into();
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    pub fn test_mode(mut self, v: bool) -> Self {
        self.config.test_mode = v;
        self
    }

    pub fn chunks(mut self, selection: ChunkSelection) -> Self {
        self.config.chunks = selection;
        self
    }

    pub fn id_numbering(mut self, numbering: IdNumbering) -> Self {
        self.config.id_numbering = numbering;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn pacing(mut self, policy: PacingPolicy) -> Self {
        self.config.pacing = policy;
        self
    }

    pub fn source_label(mut self, label: impl Into<String>) -> Self {
        self.config.source_label = label.into();
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RefineryConfig, RefineryError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which chunks of the split document are refined.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkSelection {
    /// Every chunk (default).
    #[default]
    All,
    /// The first `n` chunks.
    First(usize),
    /// A contiguous range of chunks (1-indexed, inclusive).
    Range(usize, usize),
}

impl ChunkSelection {
    /// Expand the selection into sorted 0-indexed chunk positions.
    pub fn to_indices(&self, total_chunks: usize) -> Vec<usize> {
        match self {
            ChunkSelection::All => (0..total_chunks).collect(),
            ChunkSelection::First(n) => (0..(*n).min(total_chunks)).collect(),
            ChunkSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_chunks);
                (s..e).collect()
            }
        }
    }
}

/// How the `chunk_%04d` record ID is derived.
///
/// Numbering by source position keeps IDs stable across runs that process
/// different subsets of the same document; numbering by processed position
/// restarts at `chunk_0001` for every subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdNumbering {
    /// 1-based position in the full chunk sequence (default).
    #[default]
    Source,
    /// 1-based position in the processed subset.
    Processed,
}

impl IdNumbering {
    /// Format the record ID for a chunk.
    ///
    /// `source_index` and `processed_index` are both 0-based.
    pub fn record_id(&self, source_index: usize, processed_index: usize) -> String {
        let n = match self {
            IdNumbering::Source => source_index + 1,
            IdNumbering::Processed => processed_index + 1,
        };
        format!("chunk_{n:04}")
    }
}
