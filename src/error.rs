//! Error types for the edgequake-refinery library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RefineryError`]: **Fatal**: the run cannot proceed or produced
//!   nothing worth persisting (missing input, empty document, no records,
//!   output write failure). Returned as `Err(RefineryError)` from
//!   [`crate::refinery::Refinery::run`] and the `refine*` entry points.
//!
//! * [`ChunkError`]: **Non-fatal**: a single chunk failed (generation
//!   fault, timeout, undecodable response) but the loop moves on. Collected
//!   in [`crate::output::RefineryOutput::failures`] so callers can inspect
//!   partial success after the run.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-refinery library.
///
/// Chunk-level failures use [`ChunkError`] and never surface here.
#[derive(Debug, Error)]
pub enum RefineryError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The PDF opened fine but no page yielded any text (scanned images only).
    #[error("No text could be extracted from '{path}' ({pages} pages)")]
    EmptyDocument { path: PathBuf, pages: usize },

    // ── Empty-result errors ───────────────────────────────────────────────
    /// The splitter produced no chunks, or the chunk selection matched none.
    #[error("Chunking produced no usable chunks ({total} total, {selected} selected)")]
    NoChunks { total: usize, selected: usize },

    /// Every selected chunk failed; there is nothing to write.
    #[error("No records were produced from {attempted} chunks.\nFirst error: {first_error}")]
    NoRecords {
        attempted: usize,
        first_error: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file. The records existed
    /// in memory but nothing was persisted.
    #[error("Failed to write {records} records to '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        records: usize,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The API key for the selected provider is absent from the environment.
    #[error("Missing API credential: {var} is not set.\nAdd it to your .env file or export it.")]
    MissingCredential { var: String },

    /// The configured provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the working\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chunk.
///
/// `chunk` is always the 1-based position in the full chunk sequence.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The generation call returned an error (quota, safety block, network).
    #[error("Chunk {chunk}: generation failed: {detail}")]
    GenerationFailed { chunk: usize, detail: String },

    /// The generation call did not answer in time.
    #[error("Chunk {chunk}: generation timed out after {secs}s")]
    Timeout { chunk: usize, secs: u64 },

    /// The response was not a well-formed record.
    #[error("Chunk {chunk}: could not decode response: {detail}")]
    ParseFailed {
        chunk: usize,
        detail: String,
        raw: String,
    },
}

impl ChunkError {
    /// 1-based position of the failed chunk in the full sequence.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::GenerationFailed { chunk, .. }
            | ChunkError::Timeout { chunk, .. }
            | ChunkError::ParseFailed { chunk, .. } => *chunk,
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(self, ChunkError::ParseFailed { .. })
    }
}
