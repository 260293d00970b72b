//! Durable storage for source documents and synthesized audio.
//!
//! Every file name is derived from the job id, so concurrent jobs never
//! collide and a retried job overwrites exactly the files it produced
//! before. The naming scheme is part of the public contract:
//!
//! ```text
//! {jobId}_page_{page:03}.{ext}                 whole-page artifact
//! {jobId}_page_{page:03}_chunk_{chunk:02}.{ext} one chunk of a page
//! {jobId}.pdf                                  cached source document
//! ```
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! reader never observes a half-written artifact.

use crate::error::Pdf2AudioError;
use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Container format produced by a voice engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

/// Name of a whole-page artifact.
pub fn page_artifact_name(job: JobId, page: usize, format: AudioFormat) -> String {
    format!("{job}_page_{page:03}.{}", format.extension())
}

/// Name of one chunk of a page.
pub fn chunk_artifact_name(job: JobId, page: usize, chunk: usize, format: AudioFormat) -> String {
    format!("{job}_page_{page:03}_chunk_{chunk:02}.{}", format.extension())
}

/// Name of the cached source document.
pub fn source_document_name(job: JobId) -> String {
    format!("{job}.pdf")
}

/// The artifacts produced for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "files")]
pub enum PageArtifacts {
    /// The page fit in one chunk and was spoken as a single file.
    Single(String),
    /// One file per chunk, ordered by chunk index. Failed chunks leave a gap
    /// recorded in [`PageAudio::failed_chunks`].
    Chunked(Vec<ChunkArtifact>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkArtifact {
    pub chunk: usize,
    pub file: String,
}

/// Manifest entry for one page of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAudio {
    pub page: usize,
    pub artifacts: PageArtifacts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<usize>,
}

impl PageAudio {
    pub fn is_chunked(&self) -> bool {
        matches!(self.artifacts, PageArtifacts::Chunked(_))
    }

    /// Name of the artifact that plays first for this page.
    pub fn first_file(&self) -> Option<&str> {
        match &self.artifacts {
            PageArtifacts::Single(name) => Some(name),
            PageArtifacts::Chunked(chunks) => chunks.first().map(|c| c.file.as_str()),
        }
    }
}

/// Directory-backed store for documents and audio artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    download_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Create both directories if needed.
    pub async fn ensure_dirs(&self) -> Result<(), Pdf2AudioError> {
        for dir in [&self.output_dir, &self.download_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Pdf2AudioError::io(dir, e))?;
        }
        Ok(())
    }

    /// Where the source document for `job` is cached.
    pub fn source_path(&self, job: JobId) -> PathBuf {
        self.download_dir.join(source_document_name(job))
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Write an artifact atomically (temp file + rename).
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, Pdf2AudioError> {
        let path = self.artifact_path(name);
        let tmp_path = self.output_dir.join(format!("{name}.tmp"));

        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| Pdf2AudioError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Pdf2AudioError::io(&path, e))?;

        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Read an artifact; a missing file is `NotFound`.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, Pdf2AudioError> {
        let path = self.artifact_path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Pdf2AudioError::not_found("Audio file"))
            }
            Err(e) => Err(Pdf2AudioError::io(path, e)),
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.artifact_path(name))
            .await
            .unwrap_or(false)
    }

    /// Remove the cached source document for `job`, ignoring a missing file.
    pub async fn remove_source(&self, job: JobId) -> Result<(), Pdf2AudioError> {
        let path = self.source_path(job);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Pdf2AudioError::io(path, e)),
        }
    }
}
