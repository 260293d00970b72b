//! The conversion pipeline: one job, start to finish.
//!
//! ```text
//! resolve ──▶ fetch ──▶ extract ──▶ [clean ▸ chunk ▸ synthesize ▸ store] per page ──▶ finalize
//! (search)    (mirror)   (pdfium)
//! ```
//!
//! Stages run strictly one after another inside the job's task. Every state
//! or progress change is committed to the [`JobRegistry`] first and the
//! committed snapshot is then published, so observers never see a value the
//! registry would not return. Any stage error fails the job with that
//! error's message; nothing is retried.

use crate::config::{ChunkFailurePolicy, PipelineConfig};
use crate::error::{Pdf2AudioError, SynthesisError};
use crate::job::{Band, Job, JobId, JobRegistry, JobStatus, ProgressBands};
use crate::pipeline::chunk::{chunk_page, Chunk};
use crate::pipeline::clean::announce_page;
use crate::pipeline::extract::{extract_pages, Page, PdfiumExtractor, TextExtractor};
use crate::pipeline::fetch::MirroredFetcher;
use crate::pipeline::synth::{Synthesizer, VoiceEngine};
use crate::progress::{ExtractionProgress, ProgressBroadcaster, ProgressEvent};
use crate::search::provider::{search_with_fallback, OpenLibraryProvider, SearchProvider};
use crate::search::{rank_candidates, SearchCandidate};
use crate::storage::{
    chunk_artifact_name, page_artifact_name, ArtifactStore, ChunkArtifact, PageArtifacts,
    PageAudio,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the document for a job comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DocumentSource {
    /// Search by title and take the best-ranked candidate.
    Title(String),
    /// A candidate the caller already picked from search results.
    Candidate(SearchCandidate),
    /// A direct link to the document.
    Url(String),
}

/// Everything needed to start a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub source: DocumentSource,
    /// Language passed to search (`English`, `fr`, …).
    pub language: String,
    pub engine: VoiceEngine,
}

impl ConversionRequest {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            source: DocumentSource::Title(title.into()),
            language: "English".to_string(),
            engine: VoiceEngine::default(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            source: DocumentSource::Url(url.into()),
            language: "English".to_string(),
            engine: VoiceEngine::default(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_engine(mut self, engine: VoiceEngine) -> Self {
        self.engine = engine;
        self
    }

    /// What the job is called before the real title is known.
    pub fn display_title(&self) -> String {
        match &self.source {
            DocumentSource::Title(t) => t.trim().to_string(),
            DocumentSource::Candidate(c) => c.title.clone(),
            DocumentSource::Url(u) => u.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), Pdf2AudioError> {
        let empty = match &self.source {
            DocumentSource::Title(t) => t.trim().is_empty(),
            DocumentSource::Candidate(c) => c.mirrors.is_empty(),
            DocumentSource::Url(u) => u.trim().is_empty(),
        };
        if empty {
            return Err(Pdf2AudioError::InvalidInput(match &self.source {
                DocumentSource::Title(_) => "Title is required".to_string(),
                DocumentSource::Candidate(_) => "Candidate has no download links".to_string(),
                DocumentSource::Url(_) => "URL is required".to_string(),
            }));
        }
        if let DocumentSource::Url(u) = &self.source {
            if !(u.starts_with("http://") || u.starts_with("https://")) {
                return Err(Pdf2AudioError::InvalidInput(format!(
                    "URL must start with http:// or https://, got '{u}'"
                )));
            }
        }
        self.engine.validate()
    }

    fn bands(&self) -> ProgressBands {
        match self.source {
            DocumentSource::Url(_) => ProgressBands::direct_flow(),
            _ => ProgressBands::search_flow(),
        }
    }
}

/// Commits job changes to the registry and publishes the committed snapshot.
#[derive(Clone)]
struct JobReporter {
    id: JobId,
    registry: Arc<JobRegistry>,
    broadcaster: ProgressBroadcaster,
}

impl JobReporter {
    fn commit(&self, result: Result<Job, Pdf2AudioError>) -> Result<Job, Pdf2AudioError> {
        let job = result?;
        self.broadcaster.publish(self.id, ProgressEvent::from_job(&job));
        Ok(job)
    }

    fn transition(
        &self,
        status: JobStatus,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<Job, Pdf2AudioError> {
        let message = message.into();
        self.commit(self.registry.update(self.id, |job| {
            job.status = status;
            job.progress = progress;
            job.message = message;
        }))
    }

    fn report(
        &self,
        progress: u8,
        page: Option<usize>,
        message: impl Into<String>,
    ) -> Result<Job, Pdf2AudioError> {
        self.commit(self.registry.report(self.id, progress, page, message))
    }

    fn update<F: FnOnce(&mut Job)>(&self, f: F) -> Result<Job, Pdf2AudioError> {
        self.commit(self.registry.update(self.id, f))
    }
}

/// Feeds pdfium's per-page callbacks into the job's extraction band.
struct ExtractionReporter {
    reporter: JobReporter,
    band: Band,
}

impl ExtractionProgress for ExtractionReporter {
    fn on_extraction_start(&self, total_pages: usize) {
        let committed = self
            .reporter
            .commit(self.reporter.registry.set_total_pages(self.reporter.id, total_pages));
        if let Err(e) = committed {
            debug!("Job {}: extraction start not recorded: {}", self.reporter.id, e);
        }
    }

    fn on_page_extracted(&self, page_num: usize, total_pages: usize, _text_len: usize) {
        let progress = self.band.at(page_num, total_pages);
        let message = format!("Extracting text from page {page_num}/{total_pages}");
        if let Err(e) = self.reporter.report(progress, Some(page_num), message) {
            debug!("Job {}: extraction progress not recorded: {}", self.reporter.id, e);
        }
    }
}

/// Outcome of one page's synthesis.
enum PageOutcome {
    Done(PageAudio),
    /// Nothing to say.
    Skipped,
    /// Abandoned under `SkipPage` before any chunk was written.
    Abandoned { failed: Vec<usize> },
}

/// Runs conversion jobs against shared configuration, storage and job state.
pub struct ConversionPipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<JobRegistry>,
    broadcaster: ProgressBroadcaster,
    store: ArtifactStore,
    fetcher: MirroredFetcher,
    extractor: Arc<dyn TextExtractor>,
    provider: Arc<dyn SearchProvider>,
}

impl ConversionPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        registry: Arc<JobRegistry>,
        broadcaster: ProgressBroadcaster,
    ) -> Result<Self, Pdf2AudioError> {
        let store = ArtifactStore::new(&config.output_dir, &config.download_dir);
        let fetcher = MirroredFetcher::new(config.download_timeout_secs, config.mirror_fallback)?;
        let extractor = config
            .extractor
            .clone()
            .unwrap_or_else(|| Arc::new(PdfiumExtractor::new()));
        let provider = config
            .search_provider
            .clone()
            .unwrap_or_else(|| {
                Arc::new(OpenLibraryProvider::new(config.download_timeout_secs.min(30)))
            });
        Ok(Self {
            config,
            registry,
            broadcaster,
            store,
            fetcher,
            extractor,
            provider,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn SearchProvider> {
        &self.provider
    }

    fn reporter(&self, id: JobId) -> JobReporter {
        JobReporter {
            id,
            registry: Arc::clone(&self.registry),
            broadcaster: self.broadcaster.clone(),
        }
    }

    /// Run job `id` to a terminal state.
    ///
    /// Returns the completed job, or the error that failed it. In both cases
    /// the registry already holds the terminal state and observers have been
    /// sent the terminal event.
    pub async fn run(
        &self,
        id: JobId,
        request: ConversionRequest,
        cancel: CancellationToken,
    ) -> Result<Job, Pdf2AudioError> {
        let reporter = self.reporter(id);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Pdf2AudioError::Cancelled),
            r = self.execute(&reporter, &request) => r,
        };

        match result {
            Ok(job) => {
                info!("Job {} completed: {} pages", id, job.pages.len());
                Ok(job)
            }
            Err(e) => {
                if matches!(e, Pdf2AudioError::Cancelled) {
                    warn!("Job {} cancelled", id);
                } else {
                    error!("Job {} failed: {}", id, e);
                }
                if let Err(fail_err) = reporter.commit(self.registry.fail(id, e.to_string())) {
                    debug!("Job {}: failure not recorded: {}", id, fail_err);
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        reporter: &JobReporter,
        request: &ConversionRequest,
    ) -> Result<Job, Pdf2AudioError> {
        let id = reporter.id;
        let bands = request.bands();
        self.store.ensure_dirs().await?;

        reporter.transition(JobStatus::Running, 0, "Starting conversion")?;

        // ── Stage 1: Locate and download the document ────────────────────
        let dest = self.store.source_path(id);
        let last = AtomicU8::new(bands.download.start);
        let on_bytes = |done: u64, total: Option<u64>| {
            let Some(total) = total.filter(|t| *t > 0) else {
                return;
            };
            let progress = bands.download.at(done as usize, total as usize);
            if progress > last.fetch_max(progress, Ordering::SeqCst) {
                let message = format!("Downloading… {}%", done * 100 / total);
                if let Err(e) = reporter.report(progress, None, message) {
                    debug!("Job {}: download progress not recorded: {}", reporter.id, e);
                }
            }
        };

        let fetched = match &request.source {
            DocumentSource::Url(url) => {
                reporter.transition(
                    JobStatus::Downloading,
                    bands.download.start,
                    "Downloading document...",
                )?;
                let book_title = url_file_name(url);
                reporter.update(|job| job.book_title = Some(book_title))?;
                self.fetcher.fetch_url(url, &dest, &on_bytes).await?
            }
            DocumentSource::Candidate(candidate) => {
                reporter.transition(
                    JobStatus::Downloading,
                    bands.download.start,
                    "Starting download...",
                )?;
                let title = candidate.title.clone();
                reporter.update(|job| job.book_title = Some(title))?;
                self.fetcher
                    .fetch_candidate(candidate, &self.config.mirror_preference, &dest, &on_bytes)
                    .await?
            }
            DocumentSource::Title(title) => {
                reporter.report(
                    bands.download.start,
                    None,
                    format!("Searching for '{}' in {}...", title.trim(), request.language),
                )?;
                let candidate = self.best_candidate(title, &request.language).await?;
                let found = candidate.title.clone();
                reporter.update(|job| job.book_title = Some(found))?;
                reporter.transition(
                    JobStatus::Downloading,
                    bands.download.start,
                    "Found book! Starting download...",
                )?;
                self.fetcher
                    .fetch_candidate(&candidate, &self.config.mirror_preference, &dest, &on_bytes)
                    .await?
            }
        };
        info!(
            "Job {}: downloaded {} bytes from {} via {}",
            id,
            fetched.bytes,
            fetched.url,
            fetched.mirror.as_deref().unwrap_or("direct link")
        );
        reporter.report(bands.download.end, None, "Download complete!")?;

        // ── Stage 2: Extract text ────────────────────────────────────────
        reporter.transition(
            JobStatus::Extracting,
            bands.extract.start,
            "Extracting text from PDF...",
        )?;
        let progress = Arc::new(ExtractionReporter {
            reporter: reporter.clone(),
            band: bands.extract,
        });
        let pages = extract_pages(Arc::clone(&self.extractor), dest.clone(), progress).await?;
        reporter.report(
            bands.extract.end,
            None,
            format!("Extracted text from {} pages", pages.len()),
        )?;

        // ── Stage 3: Synthesize ──────────────────────────────────────────
        let synthesizer = self.synthesizer_for(&request.engine);
        let format = synthesizer.audio_format();
        reporter.update(|job| job.audio_format = format)?;
        reporter.transition(
            JobStatus::Converting,
            bands.convert.start,
            format!("Converting {} pages to audio...", pages.len()),
        )?;
        reporter.commit(self.registry.set_total_pages(id, pages.len()))?;
        let manifest = self
            .synthesize_pages(reporter, &pages, synthesizer.as_ref(), bands.convert)
            .await?;

        // ── Stage 4: Finalize ────────────────────────────────────────────
        reporter.transition(JobStatus::Finalizing, 95, "Finalizing audiobook...")?;
        if !self.config.retain_source_documents {
            if let Err(e) = self.store.remove_source(id).await {
                warn!("Job {}: could not remove source document: {}", id, e);
            }
        }
        let count = manifest.len();
        reporter.commit(
            self.registry
                .complete(id, manifest, format!("Audiobook ready: {count} pages")),
        )
    }

    /// Search by title and pick the top-ranked candidate.
    async fn best_candidate(
        &self,
        title: &str,
        language: &str,
    ) -> Result<SearchCandidate, Pdf2AudioError> {
        let (found, _) =
            search_with_fallback(self.provider.as_ref(), title.trim(), language).await?;
        rank_candidates(title.trim(), found)
            .into_iter()
            .next()
            .map(|ranked| ranked.candidate)
            .ok_or_else(|| Pdf2AudioError::not_found(format!("Book '{}'", title.trim())))
    }

    fn synthesizer_for(&self, engine: &VoiceEngine) -> Arc<dyn Synthesizer> {
        match &self.config.synthesizer {
            Some(s) => Arc::clone(s),
            None => engine.synthesizer(self.config.synthesis_timeout_secs),
        }
    }

    fn chunks_for(&self, page: &Page) -> Vec<Chunk> {
        let text = if self.config.announce_page_numbers {
            announce_page(page.number, &page.text)
        } else {
            page.text.clone()
        };
        if self.config.chunking {
            chunk_page(page.number, &text, self.config.max_chunk_size)
        } else {
            vec![Chunk {
                page: page.number,
                index: 0,
                text,
            }]
        }
    }

    /// Speak every page in order and return the manifest of what was written.
    async fn synthesize_pages(
        &self,
        reporter: &JobReporter,
        pages: &[Page],
        synthesizer: &dyn Synthesizer,
        band: Band,
    ) -> Result<Vec<PageAudio>, Pdf2AudioError> {
        let total = pages.len();
        let mut manifest = Vec::with_capacity(total);
        let mut abandoned = Vec::new();

        for (i, page) in pages.iter().enumerate() {
            let ordinal = i + 1;
            reporter.report(
                band.at(i, total),
                Some(ordinal),
                format!("Converting page {} ({ordinal}/{total}) to audio...", page.number),
            )?;

            match self.synthesize_page(reporter.id, page, synthesizer).await? {
                PageOutcome::Done(audio) => manifest.push(audio),
                PageOutcome::Skipped => {
                    debug!("Job {}: page {} produced no audio", reporter.id, page.number)
                }
                PageOutcome::Abandoned { failed } => {
                    warn!(
                        "Job {}: page {} abandoned after chunk {:?} failed",
                        reporter.id, page.number, failed
                    );
                    abandoned.push(page.number);
                    let number = page.number;
                    reporter.update(|job| job.failed_pages.push(number))?;
                }
            }

            reporter.report(
                band.at(ordinal, total),
                Some(ordinal),
                format!("Converted page {} ({ordinal}/{total})", page.number),
            )?;
        }

        if manifest.is_empty() {
            return Err(Pdf2AudioError::NoAudioProduced {
                pages: total,
                abandoned,
            });
        }
        Ok(manifest)
    }

    async fn synthesize_page(
        &self,
        id: JobId,
        page: &Page,
        synthesizer: &dyn Synthesizer,
    ) -> Result<PageOutcome, Pdf2AudioError> {
        let chunks = self.chunks_for(page);
        let chunked = chunks.len() > 1;
        let format = synthesizer.audio_format();
        let policy = self.config.chunk_failure_policy;

        let mut written: Vec<ChunkArtifact> = Vec::with_capacity(chunks.len());
        let mut failed: Vec<usize> = Vec::new();
        let mut last_failure: Option<SynthesisError> = None;

        for chunk in &chunks {
            let audio = match self.synthesize_chunk(synthesizer, &chunk.text).await {
                Ok(audio) => audio,
                Err(SynthesisError::EmptyText) => continue,
                Err(e) => {
                    warn!("Job {}: page {} chunk {} failed: {}", id, page.number, chunk.index, e);
                    match policy {
                        ChunkFailurePolicy::AbortJob => {
                            return Err(Pdf2AudioError::SynthesisFailed {
                                page: page.number,
                                chunk: chunked.then_some(chunk.index),
                                detail: e.to_string(),
                            });
                        }
                        ChunkFailurePolicy::SkipPage => {
                            failed.push(chunk.index);
                            last_failure = Some(e);
                            break;
                        }
                        ChunkFailurePolicy::SkipChunk => {
                            failed.push(chunk.index);
                            last_failure = Some(e);
                            continue;
                        }
                    }
                }
            };

            let name = if chunked {
                chunk_artifact_name(id, page.number, chunk.index, format)
            } else {
                page_artifact_name(id, page.number, format)
            };
            self.store.write(&name, &audio).await?;
            written.push(ChunkArtifact {
                chunk: chunk.index,
                file: name,
            });
        }

        if written.is_empty() {
            return match (policy, last_failure) {
                (ChunkFailurePolicy::SkipChunk, Some(e)) => Err(Pdf2AudioError::SynthesisFailed {
                    page: page.number,
                    chunk: None,
                    detail: format!("no chunk could be synthesized: {e}"),
                }),
                (_, Some(_)) => Ok(PageOutcome::Abandoned { failed }),
                (_, None) => Ok(PageOutcome::Skipped),
            };
        }

        let artifacts = if chunked {
            PageArtifacts::Chunked(written)
        } else {
            PageArtifacts::Single(written.remove(0).file)
        };
        Ok(PageOutcome::Done(PageAudio {
            page: page.number,
            artifacts,
            failed_chunks: failed,
        }))
    }

    async fn synthesize_chunk(
        &self,
        synthesizer: &dyn Synthesizer,
        text: &str,
    ) -> Result<Vec<u8>, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        let secs = self.config.synthesis_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), synthesizer.synthesize(text)).await {
            Ok(result) => result,
            Err(_) => Err(SynthesisError::Timeout { secs }),
        }
    }
}

/// Last path segment of a URL, for display.
fn url_file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| url.to_string())
}
