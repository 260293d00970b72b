//! Page-indexed text extraction via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; calling it from a Tokio
//! worker would stall the runtime for the length of a large book. The async
//! wrapper [`extract_pages`] moves the whole walk onto the blocking pool.
//!
//! Pages keep their 1-based source numbers. A page that fails to read, or
//! that is blank after cleanup, is left out, so the numbering of the result
//! may have gaps.

use crate::error::Pdf2AudioError;
use crate::pipeline::clean::clean_text;
use crate::progress::ExtractionProgress;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Text of one source page, cleaned and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number in the source document.
    pub number: usize,
    pub text: String,
}

/// Reads a document into pages. Implementations block; call through
/// [`extract_pages`] from async code.
pub trait TextExtractor: Send + Sync {
    fn extract(
        &self,
        path: &Path,
        progress: &dyn ExtractionProgress,
    ) -> Result<Vec<Page>, Pdf2AudioError>;
}

/// Run `extractor` on the blocking pool.
pub async fn extract_pages(
    extractor: Arc<dyn TextExtractor>,
    path: PathBuf,
    progress: Arc<dyn ExtractionProgress>,
) -> Result<Vec<Page>, Pdf2AudioError> {
    tokio::task::spawn_blocking(move || extractor.extract(&path, progress.as_ref()))
        .await
        .map_err(|e| Pdf2AudioError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Turn raw per-page text (index 0 = page 1, `None` = unreadable) into
/// cleaned pages, dropping the blank ones.
///
/// Fails with [`Pdf2AudioError::NoExtractableText`] if nothing is left.
pub fn collect_pages(
    path: &Path,
    raw: Vec<Option<String>>,
) -> Result<Vec<Page>, Pdf2AudioError> {
    let total_pages = raw.len();
    let pages: Vec<Page> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(idx, text)| {
            let text = clean_text(text.as_deref().unwrap_or(""));
            if text.is_empty() {
                debug!("Page {} has no text, skipping", idx + 1);
                None
            } else {
                Some(Page {
                    number: idx + 1,
                    text,
                })
            }
        })
        .collect();

    if pages.is_empty() {
        return Err(Pdf2AudioError::NoExtractableText {
            path: path.to_path_buf(),
            total_pages,
        });
    }
    Ok(pages)
}

/// Extractor backed by a dynamically bound pdfium library.
///
/// Binding order: `PDFIUM_LIB_PATH` (file or directory), then the working
/// directory, then the system library search path.
#[derive(Debug, Default, Clone)]
pub struct PdfiumExtractor {
    lib_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to this library (or directory containing it) before anything else.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lib_path = Some(path.into());
        self
    }

    fn bind(&self) -> Result<Pdfium, Pdf2AudioError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(p) = &self.lib_path {
            candidates.push(p.clone());
        }
        if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
            if !p.trim().is_empty() {
                candidates.push(PathBuf::from(p));
            }
        }
        candidates.push(PathBuf::from("./"));

        let mut last_err = String::from("no candidate library paths");
        for candidate in candidates {
            let lib = if candidate.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&candidate)
            } else {
                candidate
            };
            match Pdfium::bind_to_library(&lib) {
                Ok(bindings) => {
                    debug!("Bound pdfium at {}", lib.display());
                    return Ok(Pdfium::new(bindings));
                }
                Err(e) => last_err = format!("{}: {:?}", lib.display(), e),
            }
        }

        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| Pdf2AudioError::PdfiumBindingFailed(format!("{last_err}; system: {e:?}")))
    }
}

impl TextExtractor for PdfiumExtractor {
    fn extract(
        &self,
        path: &Path,
        progress: &dyn ExtractionProgress,
    ) -> Result<Vec<Page>, Pdf2AudioError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| Pdf2AudioError::CorruptPdf {
                path: path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);
        progress.on_extraction_start(total_pages);

        let mut raw = Vec::with_capacity(total_pages);
        for idx in 0..total_pages {
            let text = pages.get(idx as u16).and_then(|page| {
                let text = page.text()?.all();
                Ok(text)
            });
            let text = match text {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("Failed to read page {}: {:?}", idx + 1, e);
                    None
                }
            };
            let len = text.as_ref().map(|t| t.chars().count()).unwrap_or(0);
            progress.on_page_extracted(idx + 1, total_pages, len);
            raw.push(text);
        }

        collect_pages(path, raw)
    }
}
