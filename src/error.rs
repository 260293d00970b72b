//! Error types for the edgequake-pdf2audio library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2AudioError`] — **Fatal** for the operation that returned it: a
//!   service call cannot be answered, or a conversion job cannot continue
//!   (no mirror, broken download, nothing to read). A job that hits one of
//!   these ends in the `failed` state with the error's message attached.
//!
//! * [`SynthesisError`] — **Non-fatal** by default: one chunk of one page
//!   could not be spoken. Whether that aborts the page, the job, or nothing
//!   at all is decided by [`crate::config::ChunkFailurePolicy`].

use crate::job::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2audio library.
#[derive(Debug, Error)]
pub enum Pdf2AudioError {
    // ── Lookup errors ─────────────────────────────────────────────────────
    /// A job, page, chunk or search candidate does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The job exists but has not completed, so it has no audio to serve.
    #[error("Conversion {id} is not completed (status: {status})")]
    JobNotReady { id: String, status: JobStatus },

    /// The request was missing a required field or carried an empty value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── Search errors ─────────────────────────────────────────────────────
    /// The search provider itself failed (network, bad payload).
    #[error("Search failed: {0}")]
    SearchFailed(String),

    // ── Download errors ───────────────────────────────────────────────────
    /// None of the preferred mirrors is exposed by the candidate.
    #[error("No download links available (tried mirrors: {tried})")]
    NoMirrorAvailable { tried: String },

    /// The chosen mirror failed with a network, protocol or HTTP-status error.
    #[error("Download failed for '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The downloaded payload is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every page of the document was empty or unreadable.
    #[error("No text extracted from '{path}' ({total_pages} pages). Conversion aborted.")]
    NoExtractableText { path: PathBuf, total_pages: usize },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n\
  • Place libpdfium next to the working directory.\n\
  • Install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Synthesis errors ──────────────────────────────────────────────────
    /// A chunk failed and the configured policy does not tolerate it.
    #[error("Audio conversion failed on page {page}{}: {detail}", chunk_suffix(.chunk))]
    SynthesisFailed {
        page: usize,
        chunk: Option<usize>,
        detail: String,
    },

    /// Every page was empty or abandoned, so the audiobook would be empty.
    #[error("No audio was produced from {pages} pages{}", abandoned_suffix(.abandoned))]
    NoAudioProduced { pages: usize, abandoned: Vec<usize> },

    // ── Job lifecycle errors ──────────────────────────────────────────────
    /// A status change that the job state machine does not allow.
    #[error("Invalid job transition: {from} → {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The job was cancelled before reaching a terminal state.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read or write a document or audio artifact.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn chunk_suffix(chunk: &Option<usize>) -> String {
    match chunk {
        Some(c) => format!(" (chunk {c})"),
        None => String::new(),
    }
}

fn abandoned_suffix(pages: &[usize]) -> String {
    if pages.is_empty() {
        return String::new();
    }
    let list: Vec<String> = pages.iter().map(|p| p.to_string()).collect();
    format!(" (synthesis failed on pages {})", list.join(", "))
}

impl Pdf2AudioError {
    /// Shorthand for [`Pdf2AudioError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single chunk of synthesized speech.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum SynthesisError {
    /// Blank input; callers skip these silently.
    #[error("Nothing to synthesize: text is empty")]
    EmptyText,

    /// The engine did not answer within the configured bound.
    #[error("Speech synthesis timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The engine cannot run here (missing binary, missing API key).
    #[error("Voice engine '{engine}' is unavailable: {hint}")]
    EngineUnavailable { engine: String, hint: String },

    /// The engine ran and reported an error.
    #[error("Voice engine '{engine}' failed: {detail}")]
    Backend { engine: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_failed_display_with_chunk() {
        let e = Pdf2AudioError::SynthesisFailed {
            page: 4,
            chunk: Some(2),
            detail: "boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 4 (chunk 2)"), "got: {msg}");
    }

    #[test]
    fn synthesis_failed_display_without_chunk() {
        let e = Pdf2AudioError::SynthesisFailed {
            page: 7,
            chunk: None,
            detail: "no audio".into(),
        };
        assert_eq!(e.to_string(), "Audio conversion failed on page 7: no audio");
    }

    #[test]
    fn no_audio_lists_abandoned_pages() {
        let e = Pdf2AudioError::NoAudioProduced {
            pages: 3,
            abandoned: vec![2, 5],
        };
        assert_eq!(
            e.to_string(),
            "No audio was produced from 3 pages (synthesis failed on pages 2, 5)"
        );
        let e = Pdf2AudioError::NoAudioProduced {
            pages: 1,
            abandoned: vec![],
        };
        assert_eq!(e.to_string(), "No audio was produced from 1 pages");
    }

    #[test]
    fn job_not_ready_mentions_status() {
        let e = Pdf2AudioError::JobNotReady {
            id: "abc".into(),
            status: JobStatus::Converting,
        };
        assert!(e.to_string().contains("converting"));
    }

    #[test]
    fn engine_unavailable_display() {
        let e = SynthesisError::EngineUnavailable {
            engine: "openai".into(),
            hint: "OPENAI_API_KEY is not set".into(),
        };
        assert!(e.to_string().contains("openai"));
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn no_mirror_lists_tried_names() {
        let e = Pdf2AudioError::NoMirrorAvailable {
            tried: "Cloudflare, IPFS.io".into(),
        };
        assert!(e.to_string().contains("IPFS.io"));
    }
}
