//! Text extraction: PDF pages → one [`RawDocument`].
//!
//! The default backend is pdfium via `pdfium-render`. pdfium keeps
//! thread-local state and blocks, so extraction runs on the
//! `spawn_blocking` pool. The [`TextExtractor`] trait is the seam the
//! orchestrator talks to; tests substitute in-memory extractors.

use crate::error::RefineryError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Marker appended after the text of every page that yielded text.
pub const PAGE_BREAK: &str = "\n--- Page Break ---\n";

/// Concatenated page text for a whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Page texts, each followed by [`PAGE_BREAK`].
    pub text: String,
    /// Pages in the PDF.
    pub page_count: usize,
    /// Pages that contributed text.
    pub pages_with_text: usize,
}

impl RawDocument {
    /// Join page texts, skipping pages that produced no text at all.
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        let mut page_count = 0;
        let mut pages_with_text = 0;
        for page in pages {
            page_count += 1;
            let page = page.as_ref();
            if page.is_empty() {
                continue;
            }
            text.push_str(page);
            text.push_str(PAGE_BREAK);
            pages_with_text += 1;
        }
        Self {
            text,
            page_count,
            pages_with_text,
        }
    }

    /// Length in characters (not bytes).
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// True when no page yielded any non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.text
            .split(PAGE_BREAK)
            .all(|page| page.trim().is_empty())
    }
}

/// Produces the raw text of a document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract all page text from the PDF at `path`.
    async fn extract(&self, path: &Path) -> Result<RawDocument, RefineryError>;
}

/// pdfium-backed extractor.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    password: Option<String>,
}

impl PdfiumExtractor {
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl TextExtractor for PdfiumExtractor {
    async fn extract(&self, path: &Path) -> Result<RawDocument, RefineryError> {
        let path = path.to_path_buf();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || extract_blocking(&path, password.as_deref()))
            .await
            .map_err(|e| RefineryError::Internal(format!("Extraction task panicked: {}", e)))?
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, RefineryError> {
    if let Ok(lib) = std::env::var("PDFIUM_LIB_PATH") {
        if !lib.is_empty() {
            debug!("Binding pdfium from PDFIUM_LIB_PATH={}", lib);
            return Pdfium::bind_to_library(&lib)
                .map(Pdfium::new)
                .map_err(|e| RefineryError::PdfiumBindingFailed(format!("{lib}: {e:?}")));
        }
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| RefineryError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Blocking implementation of text extraction.
fn extract_blocking(pdf_path: &Path, password: Option<&str>) -> Result<RawDocument, RefineryError> {
    info!("Loading raw text from {}", pdf_path.display());
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                RefineryError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                RefineryError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            RefineryError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages().iter().enumerate().map(|(idx, page)| {
        match page.text() {
            Ok(text) => text.all(),
            Err(e) => {
                warn!("Page {}: text extraction failed: {:?}", idx + 1, e);
                String::new()
            }
        }
    });
    let raw = RawDocument::from_pages(pages);

    info!(
        "Extracted text from {} pages ({} with text, {} chars)",
        raw.page_count,
        raw.pages_with_text,
        raw.char_count()
    );
    Ok(raw)
}
