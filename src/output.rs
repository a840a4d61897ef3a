//! Output types: refined records, run statistics, and the JSON writer.

use crate::error::{ChunkError, RefineryError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// The five fields the model is asked to return for one chunk.
///
/// Decoding is strict: a missing field, a wrongly-typed field, or any extra
/// key rejects the whole response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefinedFields {
    pub category: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub source: String,
}

impl RefinedFields {
    /// Attach the orchestrator-assigned ID.
    pub fn into_record(self, id: String) -> RefinedRecord {
        RefinedRecord {
            category: self.category,
            title: self.title,
            content: self.content,
            keywords: self.keywords,
            source: self.source,
            id,
        }
    }
}

/// One refined chunk, as written to the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinedRecord {
    pub category: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub source: String,
    /// `chunk_%04d`, never supplied by the model.
    pub id: String,
}

/// Statistics for a refinery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefineryStats {
    /// Pages in the source PDF.
    pub total_pages: usize,
    /// Characters in the extracted document.
    pub document_chars: usize,
    /// Chunks produced by the splitter.
    pub total_chunks: usize,
    /// Chunks selected for refinement.
    pub selected_chunks: usize,
    /// Chunks that produced a record.
    pub refined_chunks: usize,
    /// Chunks dropped because the generation call failed.
    pub generation_failures: usize,
    /// Chunks dropped because the response did not decode.
    pub parse_failures: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub extract_duration_ms: u64,
    pub chunk_duration_ms: u64,
    pub refine_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineryOutput {
    /// Records in processing order.
    pub records: Vec<RefinedRecord>,
    /// Chunks that were skipped, in processing order.
    pub failures: Vec<ChunkError>,
    pub stats: RefineryStats,
}

/// Serialize records as an indented JSON array.
///
/// Two-space indentation; non-ASCII text is written as-is.
pub fn records_to_json(records: &[RefinedRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}

/// Write records to `path`, replacing any existing file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_records(path: &Path, records: &[RefinedRecord]) -> Result<(), RefineryError> {
    let fail = |source: std::io::Error| RefineryError::OutputWriteFailed {
        path: path.to_path_buf(),
        records: records.len(),
        source,
    };

    let json = records_to_json(records).map_err(|e| fail(e.into()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(fail(e));
    }

    debug!("Wrote {} records ({} bytes) to {}", records.len(), json.len(), path.display());
    Ok(())
}
