//! Progress-callback trait for per-chunk refinery events.
//!
//! Inject an [`Arc<dyn RefineProgressCallback>`] via
//! [`crate::config::RefineryConfigBuilder::progress_callback`] to receive
//! events as the refine loop walks the selected chunks. The CLI uses this to
//! drive its progress bar; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use edgequake_refinery::{RefineProgressCallback, RefineryConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     refined: AtomicUsize,
//! }
//!
//! impl RefineProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk: usize, total: usize, title: &str) {
//!         self.refined.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chunk {chunk}/{total}: {title}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { refined: AtomicUsize::new(0) });
//!
//! let config = RefineryConfig::builder()
//!     .progress_callback(counter as Arc<dyn RefineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each chunk.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `chunk` arguments are 1-based positions in the
/// full chunk sequence; `total` is the number of selected chunks.
pub trait RefineProgressCallback: Send + Sync {
    /// Called once after chunking, before the first generation call.
    fn on_run_start(&self, total_chunks: usize, selected_chunks: usize) {
        let _ = (total_chunks, selected_chunks);
    }

    /// Called just before the generation request for a chunk is sent.
    fn on_chunk_start(&self, chunk: usize, total: usize) {
        let _ = (chunk, total);
    }

    /// Called when a chunk produced a record.
    fn on_chunk_complete(&self, chunk: usize, total: usize, title: &str) {
        let _ = (chunk, total, title);
    }

    /// Called when a chunk was skipped (generation or decode failure).
    fn on_chunk_error(&self, chunk: usize, total: usize, error: &str) {
        let _ = (chunk, total, error);
    }

    /// Called with the model's full response when it did not decode into a
    /// record, right after [`Self::on_chunk_error`].
    fn on_chunk_raw_response(&self, chunk: usize, raw: &str) {
        let _ = (chunk, raw);
    }

    /// Called once after every selected chunk has been attempted.
    fn on_run_complete(&self, selected_chunks: usize, records: usize) {
        let _ = (selected_chunks, records);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RefineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RefineryConfig`].
pub type ProgressCallback = Arc<dyn RefineProgressCallback>;
