//! # edgequake-refinery
//!
//! Turn OCR-damaged PDF text into clean, structured JSON records with an LLM.
//!
//! Text comes out of scanned or badly-typeset PDFs with broken words
//! (`r ecommenda tion`) and no structure. This crate extracts the raw text,
//! cuts it into overlapping chunks, and asks a model to repair each chunk
//! and annotate it with a category, a title and keywords. Every chunk that
//! comes back as a well-formed record lands in one JSON array on disk.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Extract  page text via pdfium (spawn_blocking), page-break markers
//!  ├─ 3. Chunk    recursive character splitting, 7 500 chars / 400 overlap
//!  ├─ 4. Refine   one LLM call per chunk, strictly sequential, paced
//!  ├─ 5. Decode   strict five-field JSON object, id stamped as chunk_NNNN
//!  └─ 6. Output   pretty-printed JSON array, written once, atomically
//! ```
//!
//! A chunk whose call fails or whose response does not decode is skipped;
//! the run only fails as a whole when the input is unusable or nothing at
//! all could be refined.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_refinery::{refine, RefineryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini by default; GEMINI_API_KEY must be set.
//!     let config = RefineryConfig::builder()
//!         .input("B09514-eng.pdf")
//!         .output_path("processed_data.json")
//!         .test_mode(true)
//!         .build()?;
//!     let output = refine(config).await?;
//!     eprintln!("{} records, {} skipped",
//!         output.records.len(),
//!         output.failures.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `refinery` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-refinery = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pacing;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod refinery;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ChunkSelection, IdNumbering, RefineryConfig, RefineryConfigBuilder};
pub use error::{ChunkError, RefineryError};
pub use output::{RefinedFields, RefinedRecord, RefineryOutput, RefineryStats};
pub use pacing::{Pace, PacingPolicy};
pub use pipeline::chunk::{Chunk, RecursiveCharacterSplitter};
pub use pipeline::extract::{PdfiumExtractor, RawDocument, TextExtractor};
pub use pipeline::refine::{Generate, GenerateError, Generation, LlmGenerator};
pub use progress::{NoopProgressCallback, ProgressCallback, RefineProgressCallback};
pub use refinery::{plan_chunks, refine, refine_sync, ChunkPlan, Refinery, RunState};
