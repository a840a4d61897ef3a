//! Pipeline stages for PDF-to-records refinement.
//!
//! Each submodule implements exactly one transformation step and is
//! testable on its own. The orchestrator in [`crate::refinery`] strings
//! them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ chunk ──▶ refine ──▶ decode
//! (URL/path) (pdfium)  (splitter)  (LLM)    (strict JSON)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`extract`]: concatenate page text; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`chunk`]: recursive character splitting with overlap
//! 4. [`refine`]: one generation call per chunk; the only stage with
//!    network I/O besides URL download
//! 5. [`decode`]: turn the response into the five record fields or reject it

pub mod chunk;
pub mod decode;
pub mod extract;
pub mod input;
pub mod refine;
