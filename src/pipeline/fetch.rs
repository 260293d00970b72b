//! Document download through an ordered list of named mirrors.
//!
//! Mirror *resolution* walks the preference list and picks the first name
//! the candidate exposes with a non-empty URL. Only that mirror is
//! downloaded unless `fallback` is enabled, in which case a failed download
//! moves on to the next resolvable mirror. Nothing is retried.
//!
//! ## Why stream to a `.part` file?
//!
//! Books run to hundreds of megabytes. The body is written chunk by chunk as
//! it arrives, and only a complete, `%PDF`-checked file is renamed to its
//! final name, so the extractor never opens a truncated document.

use crate::error::Pdf2AudioError;
use crate::search::{Mirror, SearchCandidate};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Called as bytes arrive: `(downloaded, total)`; `total` is the
/// `Content-Length` when the server sent one.
pub type ByteProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Mirror names tried in order when no preference is configured.
pub const DEFAULT_MIRRORS: [&str; 3] = ["Cloudflare", "IPFS.io", "Infura"];

/// A document on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub path: PathBuf,
    pub url: String,
    /// Name of the mirror used; `None` for direct URLs.
    pub mirror: Option<String>,
    pub bytes: u64,
}

/// The mirrors of `candidate` that can be downloaded, in the order they
/// should be tried. An empty `preference` keeps the candidate's own order.
pub fn resolve_mirrors<'a>(
    candidate: &'a SearchCandidate,
    preference: &[String],
) -> Vec<&'a Mirror> {
    let usable = |m: &&Mirror| !m.url.trim().is_empty();
    if preference.is_empty() {
        return candidate.mirrors.iter().filter(usable).collect();
    }
    preference
        .iter()
        .filter_map(|name| candidate.mirrors.iter().filter(usable).find(|m| &m.name == name))
        .collect()
}

pub struct MirroredFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
    fallback: bool,
}

impl MirroredFetcher {
    pub fn new(timeout_secs: u64, fallback: bool) -> Result<Self, Pdf2AudioError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(concat!("pdf2audio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Pdf2AudioError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
            fallback,
        })
    }

    /// Download the candidate's document to `dest` via the preferred mirror.
    pub async fn fetch_candidate(
        &self,
        candidate: &SearchCandidate,
        preference: &[String],
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<FetchedDocument, Pdf2AudioError> {
        let mirrors = resolve_mirrors(candidate, preference);
        let Some(first) = mirrors.first() else {
            let tried = if preference.is_empty() {
                "none listed".to_string()
            } else {
                preference.join(", ")
            };
            return Err(Pdf2AudioError::NoMirrorAvailable { tried });
        };

        if !self.fallback {
            info!("Downloading '{}' via {}", candidate.title, first.name);
            let mut doc = self.fetch_url(&first.url, dest, progress).await?;
            doc.mirror = Some(first.name.clone());
            return Ok(doc);
        }

        let mut last_err = None;
        for mirror in &mirrors {
            info!("Downloading '{}' via {}", candidate.title, mirror.name);
            match self.fetch_url(&mirror.url, dest, progress).await {
                Ok(mut doc) => {
                    doc.mirror = Some(mirror.name.clone());
                    return Ok(doc);
                }
                Err(e) => {
                    warn!("Mirror {} failed: {}", mirror.name, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Pdf2AudioError::NoMirrorAvailable {
            tried: preference.join(", "),
        }))
    }

    /// Download an arbitrary URL to `dest`.
    pub async fn fetch_url(
        &self,
        url: &str,
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<FetchedDocument, Pdf2AudioError> {
        let failed = |reason: String| Pdf2AudioError::DownloadFailed {
            url: url.to_string(),
            reason,
        };
        let describe = |e: reqwest::Error| {
            if e.is_timeout() {
                format!("timed out after {}s", self.timeout_secs)
            } else {
                e.to_string()
            }
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(describe(e)))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let total = response.content_length();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Pdf2AudioError::io(parent, e))?;
        }
        let part = part_path(dest);
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| Pdf2AudioError::io(&part, e))?;

        let mut magic = Vec::with_capacity(4);
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();
        let result: Result<(), Pdf2AudioError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| failed(describe(e)))?;
                if magic.len() < 4 {
                    let take = (4 - magic.len()).min(chunk.len());
                    magic.extend_from_slice(&chunk[..take]);
                }
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Pdf2AudioError::io(&part, e))?;
                downloaded += chunk.len() as u64;
                progress(downloaded, total);
            }
            file.flush().await.map_err(|e| Pdf2AudioError::io(&part, e))?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        if magic.as_slice() != b"%PDF" {
            let _ = tokio::fs::remove_file(&part).await;
            let mut bytes = [0u8; 4];
            bytes[..magic.len()].copy_from_slice(&magic);
            return Err(Pdf2AudioError::NotAPdf {
                path: dest.to_path_buf(),
                magic: bytes,
            });
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| Pdf2AudioError::io(dest, e))?;
        debug!("Downloaded {} bytes to {}", downloaded, dest.display());

        Ok(FetchedDocument {
            path: dest.to_path_buf(),
            url: url.to_string(),
            mirror: None,
            bytes: downloaded,
        })
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
