//! The request surface: search, start and observe conversions, serve audio.
//!
//! [`AudiobookService`] owns the shared state (registry, broadcaster,
//! pipeline) and a bounded worker pool. Each started conversion gets its own
//! tokio task that waits for a pool permit, then runs the pipeline to a
//! terminal state.

use crate::config::PipelineConfig;
use crate::convert::{ConversionPipeline, ConversionRequest};
use crate::error::Pdf2AudioError;
use crate::job::{Job, JobId, JobRegistry, JobStatus};
use crate::pipeline::synth::{EngineCatalog, VoiceEngine};
use crate::progress::{ProgressBroadcaster, ProgressEvent};
use crate::search::provider::search_with_fallback;
use crate::search::SearchResponse;
use crate::storage::{AudioFormat, PageArtifacts};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Audio bytes plus what a client needs to serve them.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub file_name: String,
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

/// One chunk in a [`PageListing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkListing {
    pub chunk: usize,
    pub stream_url: String,
}

/// What a player needs to know about one page of a finished audiobook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageListing {
    pub page: usize,
    pub available: bool,
    pub stream_url: Option<String>,
    pub chunks: Option<Vec<ChunkListing>>,
}

pub fn page_stream_url(id: JobId, page: usize) -> String {
    format!("/api/audiobook/{id}/stream/{page}")
}

pub fn chunk_stream_url(id: JobId, page: usize, chunk: usize) -> String {
    format!("/api/audiobook/{id}/stream/{page}/chunk/{chunk}")
}

/// Entry point for callers: the CLI, the HTTP server, or an embedding app.
pub struct AudiobookService {
    config: Arc<PipelineConfig>,
    registry: Arc<JobRegistry>,
    broadcaster: ProgressBroadcaster,
    pipeline: Arc<ConversionPipeline>,
    permits: Arc<Semaphore>,
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl AudiobookService {
    pub fn new(config: PipelineConfig) -> Result<Self, Pdf2AudioError> {
        Self::with_registry(config, Arc::new(JobRegistry::new()))
    }

    /// Build a service over an existing registry.
    pub fn with_registry(
        config: PipelineConfig,
        registry: Arc<JobRegistry>,
    ) -> Result<Self, Pdf2AudioError> {
        let config = Arc::new(config);
        let broadcaster = ProgressBroadcaster::new(config.event_capacity);
        let pipeline = ConversionPipeline::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            broadcaster.clone(),
        )?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Ok(Self {
            config,
            registry,
            broadcaster,
            pipeline: Arc::new(pipeline),
            permits,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Search for books, ranked by relevance and cut to `search_top_n`.
    pub async fn search(
        &self,
        query: &str,
        language: &str,
    ) -> Result<SearchResponse, Pdf2AudioError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Pdf2AudioError::InvalidInput("Search query is required".to_string()));
        }
        let provider = self.pipeline.provider();
        info!("Searching {} for '{}' ({})", provider.name(), query, language);
        let (found, search_type) = search_with_fallback(provider.as_ref(), query, language).await?;
        Ok(SearchResponse::from_candidates(query, found, search_type, self.config.search_top_n))
    }

    /// Register a job and schedule it; returns at once with the job id.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_conversion(&self, request: ConversionRequest) -> Result<JobId, Pdf2AudioError> {
        request.validate()?;
        let job = Job::new(
            request.display_title(),
            request.language.clone(),
            request.engine.clone(),
        );
        let id = self.registry.create(job)?;
        let token = CancellationToken::new();
        self.tokens().insert(id, token.clone());
        info!("Queued job {} for '{}'", id, request.display_title());

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let tokens = Arc::clone(&self.tokens);
        tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = permits.acquire_owned() => match permit {
                    Ok(p) => Some(p),
                    // Pool closed: the service is going away.
                    Err(_) => {
                        token.cancel();
                        None
                    }
                },
            };
            debug!("Job {} left the queue", id);
            let _ = pipeline.run(id, request, token).await;
            tokens.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        });
        Ok(id)
    }

    /// Latest committed snapshot of a job.
    pub fn job_status(&self, id: JobId) -> Result<Job, Pdf2AudioError> {
        self.registry
            .get(id)
            .ok_or_else(|| Pdf2AudioError::not_found(format!("Conversion {id}")))
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.registry.list()
    }

    fn completed_job(&self, id: JobId) -> Result<Job, Pdf2AudioError> {
        let job = self.job_status(id)?;
        if job.status != JobStatus::Completed {
            return Err(Pdf2AudioError::JobNotReady {
                id: id.to_string(),
                status: job.status,
            });
        }
        Ok(job)
    }

    async fn payload(&self, job: &Job, file_name: &str) -> Result<AudioPayload, Pdf2AudioError> {
        let bytes = self.pipeline.store().read(file_name).await?;
        Ok(AudioPayload {
            file_name: file_name.to_string(),
            format: job.audio_format,
            bytes,
        })
    }

    /// The whole-page artifact of `page`. Chunked pages have none.
    pub async fn download_page(
        &self,
        id: JobId,
        page: usize,
    ) -> Result<AudioPayload, Pdf2AudioError> {
        let job = self.completed_job(id)?;
        let entry = job
            .page(page)
            .ok_or_else(|| Pdf2AudioError::not_found(format!("Audio file for page {page}")))?;
        match &entry.artifacts {
            PageArtifacts::Single(name) => self.payload(&job, name).await,
            PageArtifacts::Chunked(_) => Err(Pdf2AudioError::not_found(format!(
                "Audio file for page {page}"
            ))),
        }
    }

    /// Audio for playback. Without `chunk`, the single file or else chunk 00.
    pub async fn stream_page(
        &self,
        id: JobId,
        page: usize,
        chunk: Option<usize>,
    ) -> Result<AudioPayload, Pdf2AudioError> {
        let job = self.completed_job(id)?;
        let entry = job
            .page(page)
            .ok_or_else(|| Pdf2AudioError::not_found(format!("Audio file for page {page}")))?;

        let name = match (chunk, &entry.artifacts) {
            (None, _) => entry.first_file().map(str::to_string),
            (Some(c), PageArtifacts::Chunked(chunks)) => {
                chunks.iter().find(|a| a.chunk == c).map(|a| a.file.clone())
            }
            (Some(_), PageArtifacts::Single(_)) => None,
        };
        let name = name.ok_or_else(|| match chunk {
            Some(c) => Pdf2AudioError::not_found(format!("Audio chunk {c} of page {page}")),
            None => Pdf2AudioError::not_found(format!("Audio file for page {page}")),
        })?;
        self.payload(&job, &name).await
    }

    /// Every page of a finished audiobook, with stream URLs for what is on disk.
    pub async fn list_pages(&self, id: JobId) -> Result<Vec<PageListing>, Pdf2AudioError> {
        let job = self.completed_job(id)?;
        let store = self.pipeline.store();
        let mut listing = Vec::with_capacity(job.pages.len());

        for entry in &job.pages {
            let page = entry.page;
            let item = match &entry.artifacts {
                PageArtifacts::Single(name) => {
                    let available = store.exists(name).await;
                    PageListing {
                        page,
                        available,
                        stream_url: available.then(|| page_stream_url(id, page)),
                        chunks: None,
                    }
                }
                PageArtifacts::Chunked(files) => {
                    let mut chunks = Vec::with_capacity(files.len());
                    for artifact in files {
                        if store.exists(&artifact.file).await {
                            chunks.push(ChunkListing {
                                chunk: artifact.chunk,
                                stream_url: chunk_stream_url(id, page, artifact.chunk),
                            });
                        }
                    }
                    if chunks.is_empty() {
                        PageListing {
                            page,
                            available: false,
                            stream_url: None,
                            chunks: None,
                        }
                    } else {
                        PageListing {
                            page,
                            available: true,
                            stream_url: Some(page_stream_url(id, page)),
                            chunks: Some(chunks),
                        }
                    }
                }
            };
            listing.push(item);
        }
        Ok(listing)
    }

    /// Progress for one job: the current snapshot first, then live events,
    /// ending after the terminal one.
    pub fn subscribe(
        &self,
        id: JobId,
    ) -> Result<BoxStream<'static, ProgressEvent>, Pdf2AudioError> {
        // Unknown ids must not open a channel.
        self.job_status(id)?;
        let live = self.broadcaster.subscribe_stream(id);
        // Read after joining so nothing between the read and the first live
        // event is lost.
        let first = ProgressEvent::from_job(&self.job_status(id)?);
        if first.is_terminal() {
            // The terminal publish already happened; nothing else removes
            // the channel this subscription opened.
            drop(live);
            self.broadcaster.close(id);
            return Ok(stream::once(async move { first }).boxed());
        }
        // Events buffered before the read can be older than it.
        let floor = first.revision;
        let live = live.filter(move |ev| futures::future::ready(ev.revision > floor));
        Ok(stream::once(async move { first }).chain(live).boxed())
    }

    /// Cancel a queued or running job.
    ///
    /// Returns `false` if the job had already finished.
    pub fn cancel(&self, id: JobId) -> Result<bool, Pdf2AudioError> {
        let job = self.job_status(id)?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        match self.tokens().get(&id) {
            Some(token) => {
                info!("Cancelling job {}", id);
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel every job that has not finished yet.
    pub fn cancel_all(&self) {
        for token in self.tokens().values() {
            token.cancel();
        }
    }

    pub fn voices(&self) -> EngineCatalog {
        VoiceEngine::catalog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        chunk_artifact_name, page_artifact_name, ArtifactStore, ChunkArtifact, PageAudio,
    };

    fn service(dir: &std::path::Path) -> AudiobookService {
        let config = PipelineConfig::builder()
            .output_dir(dir.join("out"))
            .download_dir(dir.join("dl"))
            .build()
            .unwrap();
        AudiobookService::new(config).unwrap()
    }

    /// A completed job with page 1 as one file and page 2 in two chunks.
    async fn finished_job(svc: &AudiobookService) -> JobId {
        let id = svc
            .registry()
            .create(Job::new("Book", "English", VoiceEngine::default()))
            .unwrap();
        let store = ArtifactStore::new(&svc.config().output_dir, &svc.config().download_dir);
        store.ensure_dirs().await.unwrap();

        let single = page_artifact_name(id, 1, AudioFormat::Mp3);
        store.write(&single, b"page-one").await.unwrap();
        let chunks: Vec<ChunkArtifact> = (0..2)
            .map(|c| ChunkArtifact {
                chunk: c,
                file: chunk_artifact_name(id, 2, c, AudioFormat::Mp3),
            })
            .collect();
        for (i, c) in chunks.iter().enumerate() {
            store.write(&c.file, format!("page-two-{i}").as_bytes()).await.unwrap();
        }

        svc.registry()
            .complete(
                id,
                vec![
                    PageAudio {
                        page: 1,
                        artifacts: PageArtifacts::Single(single),
                        failed_chunks: vec![],
                    },
                    PageAudio {
                        page: 2,
                        artifacts: PageArtifacts::Chunked(chunks),
                        failed_chunks: vec![],
                    },
                ],
                "done",
            )
            .unwrap();
        id
    }

    #[tokio::test]
    async fn empty_search_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = service(dir.path()).search("   ", "English").await.unwrap_err();
        assert!(matches!(err, Pdf2AudioError::InvalidInput(_)));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        assert!(matches!(
            svc.job_status(JobId::new()).unwrap_err(),
            Pdf2AudioError::NotFound { .. }
        ));
        assert!(matches!(svc.cancel(JobId::new()).unwrap_err(), Pdf2AudioError::NotFound { .. }));
    }

    #[tokio::test]
    async fn audio_of_unfinished_job_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = svc
            .registry()
            .create(Job::new("Book", "English", VoiceEngine::default()))
            .unwrap();
        let err = svc.download_page(id, 1).await.unwrap_err();
        assert!(matches!(err, Pdf2AudioError::JobNotReady { status: JobStatus::Queued, .. }));
        assert!(svc.list_pages(id).await.is_err());
    }

    #[tokio::test]
    async fn download_serves_only_whole_page_files() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = finished_job(&svc).await;

        let p = svc.download_page(id, 1).await.unwrap();
        assert_eq!(p.bytes, b"page-one");
        assert_eq!(p.format, AudioFormat::Mp3);
        for missing in [2, 9] {
            let err = svc.download_page(id, missing).await.unwrap_err();
            assert!(matches!(err, Pdf2AudioError::NotFound { .. }), "page {missing}: {err:?}");
        }
    }

    #[tokio::test]
    async fn stream_falls_back_to_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = finished_job(&svc).await;

        assert_eq!(svc.stream_page(id, 1, None).await.unwrap().bytes, b"page-one");
        assert_eq!(svc.stream_page(id, 2, None).await.unwrap().bytes, b"page-two-0");
        assert_eq!(svc.stream_page(id, 2, Some(1)).await.unwrap().bytes, b"page-two-1");
        assert!(svc.stream_page(id, 2, Some(5)).await.is_err());
        assert!(svc.stream_page(id, 1, Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn list_pages_builds_stream_urls() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = finished_job(&svc).await;

        let pages = svc.list_pages(id).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].available);
        assert_eq!(pages[0].stream_url.as_deref(), Some(page_stream_url(id, 1).as_str()));
        assert!(pages[0].chunks.is_none());

        let chunks = pages[1].chunks.as_ref().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].stream_url, format!("/api/audiobook/{id}/stream/2/chunk/1"));
    }

    #[tokio::test]
    async fn subscribe_to_finished_job_yields_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = finished_job(&svc).await;

        let events: Vec<ProgressEvent> = svc.subscribe(id).unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, JobStatus::Completed);
        assert_eq!(events[0].progress, 100);
        assert!(!svc.cancel(id).unwrap());
        assert_eq!(svc.broadcaster.open_channels(), 0);
    }

    #[tokio::test]
    async fn subscribe_skips_events_committed_before_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let reg = svc.registry();
        let id = reg.create(Job::new("Book", "English", VoiceEngine::default())).unwrap();

        // Committed but not yet published when the subscriber reads.
        let queued = reg.report(id, 0, None, "Waiting").unwrap();
        let running = reg.transition(id, JobStatus::Running, "Starting conversion").unwrap();
        let stream = svc.subscribe(id).unwrap();

        svc.broadcaster.publish(id, ProgressEvent::from_job(&queued));
        svc.broadcaster.publish(id, ProgressEvent::from_job(&running));
        let downloading = reg.transition(id, JobStatus::Downloading, "Downloading").unwrap();
        svc.broadcaster.publish(id, ProgressEvent::from_job(&downloading));
        let failed = reg.fail(id, "boom").unwrap();
        svc.broadcaster.publish(id, ProgressEvent::from_job(&failed));

        let events: Vec<ProgressEvent> = stream.collect().await;
        let statuses: Vec<JobStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Running, JobStatus::Downloading, JobStatus::Failed]
        );
        assert!(events.windows(2).all(|w| w[0].revision < w[1].revision));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_queueing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let err = svc.start_conversion(ConversionRequest::title("")).unwrap_err();
        assert!(matches!(err, Pdf2AudioError::InvalidInput(_)));
        assert!(svc.list_jobs().is_empty());
    }
}
