//! Conversion jobs and the registry that owns them.
//!
//! A [`Job`] is the single source of truth for one conversion's status. The
//! pipeline never keeps a private copy it mutates on the side: every change
//! goes through a [`JobRegistry`] operation, so what a status poller sees and
//! what drives the pipeline are the same value.
//!
//! ## State machine
//!
//! ```text
//! queued → running → downloading → extracting → converting → finalizing → completed
//!    │        │           │             │             │            │
//!    └────────┴───────────┴─────────────┴─────────────┴────────────┴──→ failed
//! ```
//!
//! Forward moves may skip states; backwards moves are rejected. `completed`
//! and `failed` are terminal. While a job is non-terminal its progress never
//! decreases: the registry clamps every write to the previous value.
//!
//! Every committed update bumps [`Job::revision`], so two snapshots of the
//! same job order totally even when status and progress are unchanged.

use crate::error::Pdf2AudioError;
use crate::pipeline::synth::VoiceEngine;
use crate::storage::{AudioFormat, PageAudio};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Opaque, unique identifier of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Pdf2AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Pdf2AudioError::not_found(format!("Conversion '{s}'")))
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Downloading,
    Extracting,
    Converting,
    Finalizing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` or `failed`: no further transitions occur.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position along the happy path; `failed` sits outside it.
    fn ordinal(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Downloading => 2,
            JobStatus::Extracting => 3,
            JobStatus::Converting => 4,
            JobStatus::Finalizing => 5,
            JobStatus::Completed => 6,
            JobStatus::Failed => u8::MAX,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same non-terminal state is allowed (progress updates
    /// within a stage). Any non-terminal state may fail.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Failed {
            return true;
        }
        next.ordinal() >= self.ordinal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Downloading => "downloading",
            JobStatus::Extracting => "extracting",
            JobStatus::Converting => "converting",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress range `[start, end]` owned by one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub start: u8,
    pub end: u8,
}

impl Band {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Map `done` of `total` units into this band.
    pub fn at(&self, done: usize, total: usize) -> u8 {
        if total == 0 || self.end <= self.start {
            return self.start;
        }
        let span = (self.end - self.start) as usize;
        let offset = span * done.min(total) / total;
        self.start + offset as u8
    }
}

/// Per-stage progress bands for one kind of conversion flow.
///
/// Bands are laid out so each stage starts at or above where the previous
/// one ended; a stage boundary can therefore never move progress backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBands {
    pub download: Band,
    pub extract: Band,
    pub convert: Band,
}

impl ProgressBands {
    /// Title or candidate input: the document has to be fetched first.
    pub const fn search_flow() -> Self {
        Self {
            download: Band::new(0, 30),
            extract: Band::new(30, 60),
            convert: Band::new(60, 95),
        }
    }

    /// Direct URL input: the download is reported as a status only.
    pub const fn direct_flow() -> Self {
        Self {
            download: Band::new(0, 0),
            extract: Band::new(0, 60),
            convert: Band::new(65, 100),
        }
    }
}

/// One end-to-end conversion request and its evolving state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub language: String,
    pub engine: VoiceEngine,
    pub status: JobStatus,
    pub progress: u8,
    pub current_page: usize,
    pub total_pages: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    pub audio_format: AudioFormat,
    pub pages: Vec<PageAudio>,
    /// Pages abandoned after a synthesis failure; they have no audio.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<usize>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of committed updates; 0 for a fresh job.
    #[serde(default)]
    pub revision: u64,
}

impl Job {
    /// A fresh job in the `queued` state.
    pub fn new(title: impl Into<String>, language: impl Into<String>, engine: VoiceEngine) -> Self {
        let audio_format = engine.audio_format();
        Self {
            id: JobId::new(),
            title: title.into(),
            language: language.into(),
            engine,
            status: JobStatus::Queued,
            progress: 0,
            current_page: 0,
            total_pages: 0,
            message: "Queued".to_string(),
            error: None,
            book_title: None,
            audio_format,
            pages: Vec::new(),
            failed_pages: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            revision: 0,
        }
    }

    /// Look up the manifest entry for a page.
    pub fn page(&self, number: usize) -> Option<&PageAudio> {
        self.pages.iter().find(|p| p.page == number)
    }
}

/// Process-wide map from job id to job state.
///
/// Constructed explicitly and shared as `Arc<JobRegistry>`; tests use an
/// isolated instance each. All mutations funnel through [`JobRegistry::update`],
/// which applies the state-machine and progress rules under one lock.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Job>> {
        // A panic while holding the lock leaves the map itself intact.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new job. Ids are unique; a duplicate is an internal error.
    pub fn create(&self, job: Job) -> Result<JobId, Pdf2AudioError> {
        let id = job.id;
        let mut jobs = self.lock();
        if jobs.contains_key(&id) {
            return Err(Pdf2AudioError::Internal(format!("duplicate job id {id}")));
        }
        jobs.insert(id, job);
        debug!("Registered job {}", id);
        Ok(id)
    }

    /// Latest committed snapshot of a job.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    /// Snapshots of every job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut all: Vec<Job> = self.lock().values().cloned().collect();
        all.sort_by_key(|j| j.created_at);
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply `f` to a job and return the committed snapshot.
    ///
    /// Rules enforced after `f` runs:
    /// * terminal jobs are frozen: any update is rejected;
    /// * the status change must satisfy [`JobStatus::can_transition_to`];
    /// * progress never decreases; `completed` forces 100;
    /// * `failed` keeps the last progress value;
    /// * the revision goes up by one.
    pub fn update<F>(&self, id: JobId, f: F) -> Result<Job, Pdf2AudioError>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| Pdf2AudioError::not_found(format!("Conversion {id}")))?;

        let before = job.clone();
        let mut next = job.clone();
        f(&mut next);

        if before.status.is_terminal() || !before.status.can_transition_to(next.status) {
            return Err(Pdf2AudioError::InvalidTransition {
                from: before.status,
                to: next.status,
            });
        }

        next.id = before.id;
        next.revision = before.revision + 1;
        next.progress = match next.status {
            JobStatus::Completed => 100,
            JobStatus::Failed => before.progress,
            _ => next.progress.clamp(before.progress, 100),
        };
        if next.status != JobStatus::Failed {
            next.error = None;
        }
        if next.status.is_terminal() && next.completed_at.is_none() {
            next.completed_at = Some(Utc::now());
        }
        if before.status == JobStatus::Queued
            && next.status != JobStatus::Queued
            && next.started_at.is_none()
        {
            next.started_at = Some(Utc::now());
        }

        *job = next;
        Ok(job.clone())
    }

    /// Move to `status` with a new status line.
    pub fn transition(
        &self,
        id: JobId,
        status: JobStatus,
        message: impl Into<String>,
    ) -> Result<Job, Pdf2AudioError> {
        let message = message.into();
        self.update(id, |job| {
            job.status = status;
            job.message = message;
        })
    }

    /// Report progress within the current state.
    pub fn report(
        &self,
        id: JobId,
        progress: u8,
        current_page: Option<usize>,
        message: impl Into<String>,
    ) -> Result<Job, Pdf2AudioError> {
        let message = message.into();
        self.update(id, |job| {
            job.progress = progress;
            if let Some(page) = current_page {
                job.current_page = page;
            }
            job.message = message;
        })
    }

    /// Record how many pages the current stage will walk.
    pub fn set_total_pages(&self, id: JobId, total_pages: usize) -> Result<Job, Pdf2AudioError> {
        self.update(id, |job| {
            job.total_pages = total_pages;
            job.current_page = 0;
        })
    }

    /// Mark the job `completed` with its final page manifest.
    pub fn complete(
        &self,
        id: JobId,
        pages: Vec<PageAudio>,
        message: impl Into<String>,
    ) -> Result<Job, Pdf2AudioError> {
        let message = message.into();
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.pages = pages;
            job.message = message;
        })
    }

    /// Mark the job `failed` with a human-readable error.
    pub fn fail(&self, id: JobId, error: impl Into<String>) -> Result<Job, Pdf2AudioError> {
        let error = error.into();
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.message = format!("Conversion failed: {error}");
            job.error = Some(error);
        })
    }
}
