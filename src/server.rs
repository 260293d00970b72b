//! HTTP surface over [`AudiobookService`] (feature `server`).
//!
//! | Method | Path | Answer |
//! |--------|------|--------|
//! | POST   | `/api/search` | ranked [`SearchResponse`](crate::SearchResponse) |
//! | POST   | `/api/convert` | `{conversion_id, status}` |
//! | GET    | `/api/conversion/:id` | job snapshot |
//! | DELETE | `/api/conversion/:id` | cancel |
//! | GET    | `/api/conversion/:id/events` | SSE, event `conversion_progress` |
//! | GET    | `/api/audiobook/:id/pages` | page listing |
//! | GET    | `/api/audiobook/:id/download/:page` | whole-page audio, as attachment |
//! | GET    | `/api/audiobook/:id/stream/:page` | page audio (chunk 00 if chunked) |
//! | GET    | `/api/audiobook/:id/stream/:page/chunk/:chunk` | one chunk |
//! | GET    | `/api/available-voices` | engine catalog |
//!
//! Errors are `{"error": "<message>"}` with a status derived from the
//! underlying [`Pdf2AudioError`].

use crate::convert::{ConversionRequest, DocumentSource};
use crate::error::Pdf2AudioError;
use crate::job::JobId;
use crate::pipeline::synth::VoiceEngine;
use crate::search::SearchCandidate;
use crate::service::{AudioPayload, AudiobookService};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SSE event name for progress updates.
pub const PROGRESS_EVENT: &str = "conversion_progress";

type AppState = Arc<AudiobookService>;

/// A [`Pdf2AudioError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Pdf2AudioError);

impl From<Pdf2AudioError> for ApiError {
    fn from(e: Pdf2AudioError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Pdf2AudioError::NotFound { .. } => StatusCode::NOT_FOUND,
            Pdf2AudioError::JobNotReady { .. } | Pdf2AudioError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            Pdf2AudioError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Pdf2AudioError::SearchFailed(_)
            | Pdf2AudioError::DownloadFailed { .. }
            | Pdf2AudioError::NoMirrorAvailable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("API error ({}): {}", status, self.0);
        } else {
            debug!("API error ({}): {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the router over a shared service.
pub fn router(service: Arc<AudiobookService>) -> Router {
    Router::new()
        .route("/api/search", post(search))
        .route("/api/search-libgen", post(search))
        .route("/api/convert", post(convert))
        .route("/api/conversion/:id", get(conversion_status).delete(cancel_conversion))
        .route("/api/conversion/:id/events", get(conversion_events))
        .route("/api/audiobook/:id/pages", get(audiobook_pages))
        .route("/api/audiobook/:id/download/:page", get(download_page))
        .route("/api/audiobook/:id/stream/:page", get(stream_page))
        .route("/api/audiobook/:id/stream/:page/chunk/:chunk", get(stream_chunk))
        .route("/api/available-voices", get(available_voices))
        .with_state(service)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(
    service: Arc<AudiobookService>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), Pdf2AudioError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Pdf2AudioError::Internal(format!("Failed to bind {addr}: {e}")))?;
    info!("Serving on http://{}", addr);
    let app = router(Arc::clone(&service));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Pdf2AudioError::Internal(format!("Server error: {e}")))?;
    service.cancel_all();
    Ok(())
}

fn parse_id(raw: &str) -> ApiResult<JobId> {
    Ok(raw.parse::<JobId>()?)
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    title: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "English".to_string()
}

async fn search(
    State(svc): State<AppState>,
    Json(body): Json<SearchBody>,
) -> ApiResult<impl IntoResponse> {
    if body.title.trim().is_empty() {
        return Err(Pdf2AudioError::InvalidInput("Title is required".to_string()).into());
    }
    Ok(Json(svc.search(&body.title, &body.language).await?))
}

/// Body of `POST /api/convert`. A `candidate` wins over a `url`, which wins
/// over a `title`.
#[derive(Debug, Deserialize)]
pub struct ConvertBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub voice_engine: Option<String>,
    #[serde(default)]
    pub voice_settings: serde_json::Value,
    #[serde(default)]
    pub candidate: Option<SearchCandidate>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ConvertBody {
    pub fn into_request(self) -> Result<ConversionRequest, Pdf2AudioError> {
        let engine_id = self.voice_engine.as_deref().unwrap_or("gtts");
        let engine = VoiceEngine::from_parts(engine_id, self.voice_settings)?;
        let source = match (self.candidate, self.url, self.title) {
            (Some(c), _, _) => DocumentSource::Candidate(c),
            (None, Some(u), _) if !u.trim().is_empty() => DocumentSource::Url(u.trim().to_string()),
            (None, _, Some(t)) if !t.trim().is_empty() => DocumentSource::Title(t),
            _ => return Err(Pdf2AudioError::InvalidInput("Title is required".to_string())),
        };
        Ok(ConversionRequest {
            source,
            language: self.language,
            engine,
        })
    }
}

async fn convert(
    State(svc): State<AppState>,
    Json(body): Json<ConvertBody>,
) -> ApiResult<impl IntoResponse> {
    let id = svc.start_conversion(body.into_request()?)?;
    Ok(Json(json!({ "conversion_id": id, "status": "started" })))
}

async fn conversion_status(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(svc.job_status(parse_id(&id)?)?))
}

async fn cancel_conversion(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let cancelled = svc.cancel(id)?;
    let status = if cancelled {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(json!({ "conversion_id": id, "cancelled": cancelled }))))
}

async fn conversion_events(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_id(&id)?;
    let events = svc.subscribe(id)?;
    debug!("SSE client joined job {}", id);

    let stream = events.filter_map(|ev| async move {
        match Event::default().event(PROGRESS_EVENT).json_data(&ev) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("SSE: failed to serialise progress event: {}", e);
                None
            }
        }
    });
    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("heartbeat");
    Ok(Sse::new(stream).keep_alive(keep_alive))
}

async fn audiobook_pages(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let job = svc.job_status(id)?;
    let pages = svc.list_pages(id).await?;
    Ok(Json(json!({
        "audiobook": {
            "id": id,
            "title": job.book_title.unwrap_or(job.title),
            "total_pages": job.total_pages,
            "status": job.status,
        },
        "pages": pages,
    })))
}

fn audio_response(payload: AudioPayload, attachment: bool) -> Response {
    let disposition = if attachment {
        format!("attachment; filename=\"{}\"", payload.file_name)
    } else {
        format!("inline; filename=\"{}\"", payload.file_name)
    };
    (
        [
            (header::CONTENT_TYPE, payload.format.mime_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        payload.bytes,
    )
        .into_response()
}

async fn download_page(
    State(svc): State<AppState>,
    Path((id, page)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let payload = svc.download_page(parse_id(&id)?, page).await?;
    Ok(audio_response(payload, true))
}

async fn stream_page(
    State(svc): State<AppState>,
    Path((id, page)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let payload = svc.stream_page(parse_id(&id)?, page, None).await?;
    Ok(audio_response(payload, false))
}

async fn stream_chunk(
    State(svc): State<AppState>,
    Path((id, page, chunk)): Path<(String, usize, usize)>,
) -> ApiResult<Response> {
    let payload = svc.stream_page(parse_id(&id)?, page, Some(chunk)).await?;
    Ok(audio_response(payload, false))
}

async fn available_voices(State(svc): State<AppState>) -> impl IntoResponse {
    Json(svc.voices())
}
