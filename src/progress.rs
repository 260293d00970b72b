//! Real-time progress: per-job event fan-out plus a stage callback trait.
//!
//! Two pieces live here:
//!
//! * [`ProgressBroadcaster`] — publishes [`ProgressEvent`]s to every
//!   subscriber of one job id. Each job gets its own
//!   `tokio::sync::broadcast` channel, so subscribers of job A never see
//!   job B and events arrive in the order they were published. Publishing
//!   to a job nobody watches is a no-op.
//!
//! * [`ExtractionProgress`] — a `Send + Sync` callback trait for stages that
//!   run on a blocking thread (pdfium extraction). All methods default to
//!   no-ops so implementors only override what they care about.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2audio::progress::{ProgressBroadcaster, ProgressEvent};
//! use edgequake_pdf2audio::job::{JobId, JobStatus};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broadcaster = ProgressBroadcaster::new(16);
//! let id = JobId::new();
//! let mut rx = broadcaster.subscribe(id);
//!
//! broadcaster.publish(id, ProgressEvent::new(id, JobStatus::Downloading, 10, "Downloading…"));
//! let ev = rx.recv().await.unwrap();
//! assert_eq!(ev.progress, 10);
//! # }
//! ```

use crate::job::{Job, JobId, JobStatus};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// One status update for one job, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub current_page: usize,
    pub total_pages: usize,
    pub message: String,
    /// The job revision this event was taken from.
    #[serde(default)]
    pub revision: u64,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            progress,
            current_page: 0,
            total_pages: 0,
            message: message.into(),
            revision: 0,
        }
    }

    /// The event describing a job's committed state.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            current_page: job.current_page,
            total_pages: job.total_pages,
            message: match &job.error {
                Some(e) if job.status == JobStatus::Failed => format!("Conversion failed: {e}"),
                _ => job.message.clone(),
            },
            revision: job.revision,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Publishes job state transitions to all subscribers of that job id.
///
/// Cheap to clone; clones share the same channel table.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    channels: Arc<Mutex<HashMap<JobId, broadcast::Sender<ProgressEvent>>>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    /// `capacity` is the per-job buffer; a subscriber that falls further
    /// behind than this skips the oldest events.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, broadcast::Sender<ProgressEvent>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the channel of `job`. There is no unsubscribe: dropping the
    /// receiver leaves.
    pub fn subscribe(&self, job: JobId) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.lock();
        channels
            .entry(job)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver `event` to every current subscriber of `job`.
    ///
    /// Returns how many receivers got it. No subscribers → 0, not an error.
    /// A terminal event closes the job's channel afterwards so subscriber
    /// streams end once they have drained it.
    pub fn publish(&self, job: JobId, event: ProgressEvent) -> usize {
        let terminal = event.is_terminal();
        let mut channels = self.lock();
        let delivered = match channels.get(&job) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        };
        if terminal {
            channels.remove(&job);
        }
        debug!("Published progress for {} to {} subscribers", job, delivered);
        delivered
    }

    /// Drop the channel of `job`, ending every stream subscribed to it.
    ///
    /// For jobs whose terminal event was published before the subscription.
    pub fn close(&self, job: JobId) {
        if self.lock().remove(&job).is_some() {
            debug!("Closed progress channel for {}", job);
        }
    }

    /// Jobs that currently have a channel.
    pub fn open_channels(&self) -> usize {
        self.lock().len()
    }

    /// Current subscriber count for `job`.
    pub fn subscriber_count(&self, job: JobId) -> usize {
        self.lock().get(&job).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Subscribe and adapt the receiver into a stream that ends after the
    /// terminal event (or when the channel closes).
    pub fn subscribe_stream(
        &self,
        job: JobId,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        events_until_terminal(BroadcastStream::new(self.subscribe(job)))
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drop lag errors and stop right after the first terminal event.
fn events_until_terminal(
    stream: BroadcastStream<ProgressEvent>,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    stream
        .filter_map(|item| async move {
            match item {
                Ok(ev) => Some(ev),
                Err(e) => {
                    warn!("Progress subscriber lagged: {}", e);
                    None
                }
            }
        })
        .scan(false, |done, ev| {
            if *done {
                return futures::future::ready(None);
            }
            *done = ev.is_terminal();
            futures::future::ready(Some(ev))
        })
}

/// Called by blocking stages as they walk the document.
pub trait ExtractionProgress: Send + Sync {
    /// Called once the page count is known, before any page is read.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each page, whether it yielded text or not.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the document
    /// * `text_len`    — characters extracted (0 for skipped pages)
    fn on_page_extracted(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }
}

/// A no-op implementation for callers that don't need extraction events.
pub struct NoopProgress;

impl ExtractionProgress for NoopProgress {}
