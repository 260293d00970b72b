//! # edgequake-pdf2audio
//!
//! Turn a book title, a search result, or a PDF link into a page-indexed,
//! streamable audiobook.
//!
//! ## Pipeline Overview
//!
//! ```text
//! title / candidate / URL
//!  │
//!  ├─ 1. Search    exact, then broad; rank candidates by similarity
//!  ├─ 2. Fetch     stream the PDF from the preferred mirror
//!  ├─ 3. Extract   per-page text via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Clean     line endings, invisible chars, hyphenation, whitespace
//!  ├─ 5. Chunk     sentence-bounded pieces under the chunk cap
//!  ├─ 6. Speak     gTTS-style cloud TTS / espeak-ng / OpenAI speech
//!  └─ 7. Store     {jobId}_page_{NNN}[_chunk_{NN}].{mp3|wav}
//! ```
//!
//! Every job lives in a [`JobRegistry`]; every change to it is published to
//! that job's observers through a [`ProgressBroadcaster`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2audio::{AudiobookService, ConversionRequest, PipelineConfig};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = AudiobookService::new(PipelineConfig::default())?;
//!     let id = service.start_conversion(ConversionRequest::title("Pride and Prejudice"))?;
//!
//!     let mut events = service.subscribe(id)?;
//!     while let Some(ev) = events.next().await {
//!         eprintln!("{:>3}% {}", ev.progress, ev.message);
//!     }
//!     for page in service.list_pages(id).await? {
//!         println!("page {} → {:?}", page.page, page.stream_url);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `pdf2audio` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | axum router for the HTTP surface, with SSE progress |
//!
//! Disable both when embedding only the library:
//! ```toml
//! edgequake-pdf2audio = { version = "0.1", default-features = false }
//! ```
//!
//! ## Voice Engines
//!
//! | Engine id | Backend | Format | Needs |
//! |-----------|---------|--------|-------|
//! | `gtts`    | Google Translate TTS endpoint | mp3 | network |
//! | `pyttsx3` | local `espeak-ng` | wav | espeak-ng on `PATH` |
//! | `openai`  | `/v1/audio/speech` | mp3 | `OPENAI_API_KEY` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod search;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ChunkFailurePolicy, PipelineConfig, PipelineConfigBuilder};
pub use convert::{ConversionPipeline, ConversionRequest, DocumentSource};
pub use error::{Pdf2AudioError, SynthesisError};
pub use job::{Job, JobId, JobRegistry, JobStatus};
pub use pipeline::synth::{Synthesizer, VoiceEngine};
pub use progress::{ProgressBroadcaster, ProgressEvent};
pub use search::{RankedCandidate, SearchCandidate, SearchResponse, SearchType};
pub use service::{AudioPayload, AudiobookService, PageListing};
pub use storage::{AudioFormat, ArtifactStore, PageArtifacts, PageAudio};
