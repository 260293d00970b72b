//! Pipeline stages for document-to-audio conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and swapped behind its trait without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ extract ──▶ clean ──▶ chunk ──▶ synth
//! (mirror)  (pdfium)    (rules)   (≤ cap)   (engine)
//! ```
//!
//! 1. [`fetch`]   — stream the document from the preferred mirror to disk
//! 2. [`extract`] — per-page text via pdfium; runs in `spawn_blocking`
//! 3. [`clean`]   — deterministic cleanup of extracted text
//! 4. [`chunk`]   — sentence-bounded pieces under the chunk cap
//! 5. [`synth`]   — speech synthesis; the only stage besides fetch with
//!    network or process I/O

pub mod chunk;
pub mod clean;
pub mod extract;
pub mod fetch;
pub mod synth;
