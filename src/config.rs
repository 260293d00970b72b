//! Configuration types for title/PDF-to-audiobook conversion.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct shared as `Arc` by the service,
//! every worker, and the HTTP layer.

use crate::error::Pdf2AudioError;
use crate::pipeline::chunk::DEFAULT_MAX_CHUNK_SIZE;
use crate::pipeline::extract::TextExtractor;
use crate::pipeline::fetch::DEFAULT_MIRRORS;
use crate::pipeline::synth::Synthesizer;
use crate::search::provider::{SearchProvider, INTERNET_ARCHIVE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Smallest accepted chunk cap; below this most sentences would be emitted
/// as over-long single chunks anyway.
pub const MIN_CHUNK_SIZE: usize = 50;

/// Configuration for the conversion pipeline and the service around it.
///
/// # Example
/// ```rust
/// use edgequake_pdf2audio::{ChunkFailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .output_dir("audio")
///     .max_chunk_size(300)
///     .chunk_failure_policy(ChunkFailurePolicy::SkipPage)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_size, 300);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Where audio artifacts are written. Default: `output`.
    pub output_dir: PathBuf,

    /// Where source documents are cached as `{jobId}.pdf`. Default: `downloads`.
    pub download_dir: PathBuf,

    /// Chunk cap in characters. Must be ≥ 50. Default: 500.
    pub max_chunk_size: usize,

    /// Split pages into sentence-bounded chunks. Default: true.
    ///
    /// When off, each page is spoken as one file regardless of length.
    pub chunking: bool,

    /// Mirror names tried in order. Default: Cloudflare, IPFS.io, Infura,
    /// Internet Archive. Empty means "use the candidate's own order".
    pub mirror_preference: Vec<String>,

    /// Try the next resolvable mirror after a failed download. Default: false.
    pub mirror_fallback: bool,

    /// Whole-download bound in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-chunk synthesis bound in seconds. Default: 60.
    pub synthesis_timeout_secs: u64,

    /// Jobs allowed to run at once; the rest wait queued. Default: 2.
    pub max_concurrent_jobs: usize,

    /// Ranked results returned by search. Default: 15.
    pub search_top_n: usize,

    /// What a failed chunk does to its page and job. Default: [`ChunkFailurePolicy::SkipChunk`].
    pub chunk_failure_policy: ChunkFailurePolicy,

    /// Speak "Page N." before each page. Default: false.
    pub announce_page_numbers: bool,

    /// Keep `{jobId}.pdf` after a job completes. Default: true.
    pub retain_source_documents: bool,

    /// Pre-constructed synthesizer; overrides every job's engine.
    pub synthesizer: Option<Arc<dyn Synthesizer>>,

    /// Pre-constructed extractor; replaces the pdfium extractor.
    pub extractor: Option<Arc<dyn TextExtractor>>,

    /// Pre-constructed search provider; replaces Open Library.
    pub search_provider: Option<Arc<dyn SearchProvider>>,

    /// Per-job progress buffer. Default: 256.
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut mirror_preference: Vec<String> =
            DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect();
        mirror_preference.push(INTERNET_ARCHIVE.to_string());
        Self {
            output_dir: PathBuf::from("output"),
            download_dir: PathBuf::from("downloads"),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            chunking: true,
            mirror_preference,
            mirror_fallback: false,
            download_timeout_secs: 120,
            synthesis_timeout_secs: 60,
            max_concurrent_jobs: 2,
            search_top_n: 15,
            chunk_failure_policy: ChunkFailurePolicy::default(),
            announce_page_numbers: false,
            retain_source_documents: true,
            synthesizer: None,
            extractor: None,
            search_provider: None,
            event_capacity: 256,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("output_dir", &self.output_dir)
            .field("download_dir", &self.download_dir)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("chunking", &self.chunking)
            .field("mirror_preference", &self.mirror_preference)
            .field("mirror_fallback", &self.mirror_fallback)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("synthesis_timeout_secs", &self.synthesis_timeout_secs)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("search_top_n", &self.search_top_n)
            .field("chunk_failure_policy", &self.chunk_failure_policy)
            .field("announce_page_numbers", &self.announce_page_numbers)
            .field("retain_source_documents", &self.retain_source_documents)
            .field(
                "synthesizer",
                &self.synthesizer.as_ref().map(|s| s.name().to_string()),
            )
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn TextExtractor>"))
            .field(
                "search_provider",
                &self.search_provider.as_ref().map(|p| p.name().to_string()),
            )
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn max_chunk_size(mut self, chars: usize) -> Self {
        self.config.max_chunk_size = chars;
        self
    }

    pub fn chunking(mut self, v: bool) -> Self {
        self.config.chunking = v;
        self
    }

    pub fn mirror_preference<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.mirror_preference = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn mirror_fallback(mut self, v: bool) -> Self {
        self.config.mirror_fallback = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn synthesis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.synthesis_timeout_secs = secs;
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n;
        self
    }

    pub fn search_top_n(mut self, n: usize) -> Self {
        self.config.search_top_n = n;
        self
    }

    pub fn chunk_failure_policy(mut self, policy: ChunkFailurePolicy) -> Self {
        self.config.chunk_failure_policy = policy;
        self
    }

    pub fn announce_page_numbers(mut self, v: bool) -> Self {
        self.config.announce_page_numbers = v;
        self
    }

    pub fn retain_source_documents(mut self, v: bool) -> Self {
        self.config.retain_source_documents = v;
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.config.synthesizer = Some(synthesizer);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn search_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.config.search_provider = Some(provider);
        self
    }

    pub fn event_capacity(mut self, n: usize) -> Self {
        self.config.event_capacity = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2AudioError> {
        let c = &self.config;
        if c.max_chunk_size < MIN_CHUNK_SIZE {
            return Err(Pdf2AudioError::InvalidConfig(format!(
                "max_chunk_size must be ≥ {}, got {}",
                MIN_CHUNK_SIZE, c.max_chunk_size
            )));
        }
        if c.max_concurrent_jobs == 0 {
            return Err(Pdf2AudioError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        if c.search_top_n == 0 {
            return Err(Pdf2AudioError::InvalidConfig("search_top_n must be ≥ 1".into()));
        }
        if c.download_timeout_secs == 0 || c.synthesis_timeout_secs == 0 {
            return Err(Pdf2AudioError::InvalidConfig(
                "timeouts must be at least one second".into(),
            ));
        }
        if c.event_capacity == 0 {
            return Err(Pdf2AudioError::InvalidConfig("event_capacity must be ≥ 1".into()));
        }
        if c.mirror_preference.iter().any(|m| m.trim().is_empty()) {
            return Err(Pdf2AudioError::InvalidConfig(
                "mirror names must not be blank".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a chunk that fails to synthesize affects the rest of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkFailurePolicy {
    /// Any failed chunk fails the whole job.
    AbortJob,
    /// A failed chunk abandons the rest of its page; the job continues.
    SkipPage,
    /// Record the failed chunk and carry on. A page where no chunk
    /// succeeds still fails the job. (default)
    #[default]
    SkipChunk,
}

impl std::str::FromStr for ChunkFailurePolicy {
    type Err = Pdf2AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "abort-job" | "abort" => Ok(ChunkFailurePolicy::AbortJob),
            "skip-page" => Ok(ChunkFailurePolicy::SkipPage),
            "skip-chunk" => Ok(ChunkFailurePolicy::SkipChunk),
            other => Err(Pdf2AudioError::InvalidConfig(format!(
                "unknown chunk failure policy '{other}' (expected abort-job, skip-page or skip-chunk)"
            ))),
        }
    }
}
