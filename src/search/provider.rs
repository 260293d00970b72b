//! Search providers and the ingestion boundary for their records.
//!
//! Providers hand back loosely typed records ([`RawCandidate`]): years as
//! strings or numbers, authors as a string or a list, fields missing
//! entirely. [`RawCandidate::normalise`] turns each into a
//! [`SearchCandidate`] exactly once, so nothing downstream re-checks
//! optionality.

use super::{Mirror, SearchCandidate, SearchType, UNKNOWN};
use crate::error::Pdf2AudioError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub title: String,
    /// Language name or code, e.g. `English` or `en`.
    pub language: String,
    /// Exact title matching; `false` searches broadly.
    pub exact: bool,
}

/// A catalogue that can be searched for downloadable documents.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchCandidate>, Pdf2AudioError>;

    fn name(&self) -> &str;
}

/// Search exact first and fall back to broad matching when that finds nothing.
pub async fn search_with_fallback(
    provider: &dyn SearchProvider,
    title: &str,
    language: &str,
) -> Result<(Vec<SearchCandidate>, SearchType), Pdf2AudioError> {
    let mut query = SearchQuery {
        title: title.to_string(),
        language: language.to_string(),
        exact: true,
    };
    let exact = provider.search(&query).await?;
    if !exact.is_empty() {
        debug!("{}: {} exact matches for '{}'", provider.name(), exact.len(), title);
        return Ok((exact, SearchType::Exact));
    }

    query.exact = false;
    let broad = provider.search(&query).await?;
    if broad.is_empty() {
        info!("{}: no results for '{}'", provider.name(), title);
        return Ok((broad, SearchType::None));
    }
    debug!("{}: {} broad matches for '{}'", provider.name(), broad.len(), title);
    Ok((broad, SearchType::Broad))
}

/// A provider record before normalisation. Accepts both lowercase and
/// capitalised keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default, alias = "Title")]
    pub title: Option<Value>,
    #[serde(default, alias = "Author")]
    pub author: Option<Value>,
    #[serde(default, alias = "Year")]
    pub year: Option<Value>,
    #[serde(default, alias = "Pages")]
    pub pages: Option<Value>,
    #[serde(default, alias = "Size")]
    pub size: Option<Value>,
    #[serde(default, alias = "Extension")]
    pub extension: Option<Value>,
    #[serde(default, alias = "Language")]
    pub language: Option<Value>,
    #[serde(default, alias = "Publisher")]
    pub publisher: Option<Value>,
    #[serde(default, alias = "Identifier")]
    pub isbn: Option<Value>,
    #[serde(default, alias = "ID")]
    pub id: Option<Value>,
    /// Either `[{"name", "url"}, …]` or `{"name": "url", …}`.
    #[serde(default)]
    pub mirrors: Option<Value>,
}

impl RawCandidate {
    pub fn normalise(self) -> SearchCandidate {
        SearchCandidate {
            title: text_field(self.title.as_ref()),
            author: text_field(self.author.as_ref()),
            year: number_field(self.year.as_ref()).and_then(|n| i32::try_from(n).ok()),
            pages: number_field(self.pages.as_ref()).and_then(|n| u32::try_from(n).ok()),
            size: text_field(self.size.as_ref()),
            extension: text_field(self.extension.as_ref()),
            language: text_field(self.language.as_ref()),
            publisher: text_field(self.publisher.as_ref()),
            isbn: text_field(self.isbn.as_ref()),
            id: text_field(self.id.as_ref()),
            mirrors: mirrors_field(self.mirrors.as_ref()),
        }
    }
}

fn text_field(value: Option<&Value>) -> String {
    let text = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };
    if text.is_empty() {
        UNKNOWN.to_string()
    } else {
        text
    }
}

fn number_field(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn mirrors_field(value: Option<&Value>) -> Vec<Mirror> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<Mirror>(item.clone()).ok())
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(name, url)| {
                url.as_str().map(|u| Mirror {
                    name: name.clone(),
                    url: u.to_string(),
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

// ── Open Library ─────────────────────────────────────────────────────────

const OPEN_LIBRARY_URL: &str = "https://openlibrary.org";
const OPEN_LIBRARY_FIELDS: &str =
    "key,title,author_name,first_publish_year,ia,isbn,publisher,number_of_pages_median,language";

/// Name of the mirror Open Library candidates expose.
pub const INTERNET_ARCHIVE: &str = "Internet Archive";

/// Open Library search; only works with a scanned copy on archive.org are
/// returned, each with one [`INTERNET_ARCHIVE`] mirror.
pub struct OpenLibraryProvider {
    client: reqwest::Client,
    base_url: String,
    limit: usize,
}

#[derive(Deserialize)]
struct OpenLibraryResponse {
    #[serde(default)]
    docs: Vec<OpenLibraryDoc>,
}

#[derive(Deserialize)]
struct OpenLibraryDoc {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    title: Option<Value>,
    #[serde(default)]
    author_name: Option<Value>,
    #[serde(default)]
    first_publish_year: Option<Value>,
    #[serde(default)]
    ia: Option<Value>,
    #[serde(default)]
    isbn: Option<Vec<String>>,
    #[serde(default)]
    publisher: Option<Vec<String>>,
    #[serde(default)]
    number_of_pages_median: Option<Value>,
    #[serde(default)]
    language: Option<Vec<String>>,
}

impl OpenLibraryDoc {
    fn archive_id(&self) -> Option<String> {
        let id = match self.ia.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.first()?.as_str().map(str::to_string),
            _ => None,
        };
        id.filter(|s| !s.trim().is_empty())
    }

    fn into_raw(self) -> Option<RawCandidate> {
        let ia = self.archive_id()?;
        let first = |v: Option<Vec<String>>| {
            v.and_then(|v| v.into_iter().next()).map(Value::String)
        };
        Some(RawCandidate {
            title: self.title,
            author: self.author_name,
            year: self.first_publish_year,
            pages: self.number_of_pages_median,
            size: None,
            extension: Some(Value::String("pdf".into())),
            language: first(self.language),
            publisher: first(self.publisher),
            isbn: first(self.isbn),
            id: self.key.map(Value::String),
            mirrors: Some(serde_json::json!([{
                "name": INTERNET_ARCHIVE,
                "url": format!("https://archive.org/download/{ia}/{ia}.pdf"),
            }])),
        })
    }
}

impl OpenLibraryProvider {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(concat!("pdf2audio/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: OPEN_LIBRARY_URL.to_string(),
            limit: 50,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }
}

impl Default for OpenLibraryProvider {
    fn default() -> Self {
        Self::new(15)
    }
}

/// Open Library filters by MARC language code.
fn marc_language(language: &str) -> Option<&'static str> {
    let code = match language.trim().to_lowercase().as_str() {
        "english" | "en" | "eng" => "eng",
        "spanish" | "es" | "spa" => "spa",
        "french" | "fr" | "fre" => "fre",
        "german" | "de" | "ger" => "ger",
        "italian" | "it" | "ita" => "ita",
        "portuguese" | "pt" | "por" => "por",
        "russian" | "ru" | "rus" => "rus",
        "japanese" | "ja" | "jpn" => "jpn",
        "korean" | "ko" | "kor" => "kor",
        "chinese" | "zh" | "chi" => "chi",
        _ => return None,
    };
    Some(code)
}

#[async_trait]
impl SearchProvider for OpenLibraryProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchCandidate>, Pdf2AudioError> {
        let url = format!("{}/search.json", self.base_url);
        let title_key = if query.exact { "title" } else { "q" };
        let limit = self.limit.to_string();
        let mut params = vec![
            (title_key, query.title.trim().to_string()),
            ("fields", OPEN_LIBRARY_FIELDS.to_string()),
            ("limit", limit),
        ];
        if let Some(lang) = marc_language(&query.language) {
            params.push(("language", lang.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Pdf2AudioError::SearchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Pdf2AudioError::SearchFailed(format!(
                "Open Library returned HTTP {}",
                response.status()
            )));
        }
        let body: OpenLibraryResponse = response
            .json()
            .await
            .map_err(|e| Pdf2AudioError::SearchFailed(format!("bad Open Library payload: {e}")))?;

        let total = body.docs.len();
        let candidates: Vec<SearchCandidate> = body
            .docs
            .into_iter()
            .filter_map(OpenLibraryDoc::into_raw)
            .map(RawCandidate::normalise)
            .collect();
        if candidates.len() < total {
            warn!(
                "Open Library: {} of {} results have no archive.org scan",
                total - candidates.len(),
                total
            );
        }
        Ok(candidates)
    }

    fn name(&self) -> &str {
        "openlibrary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn normalise_fills_unknown_and_parses_numbers() {
        let raw: RawCandidate = serde_json::from_value(serde_json::json!({
            "Title": "  Dune ",
            "Author": ["Frank Herbert", ""],
            "Year": "1965",
            "Pages": "abc",
            "ID": 42,
            "mirrors": {"Cloudflare": "http://cf/dune.pdf"}
        }))
        .unwrap();
        let c = raw.normalise();
        assert_eq!(c.title, "Dune");
        assert_eq!(c.author, "Frank Herbert");
        assert_eq!(c.year, Some(1965));
        assert_eq!(c.pages, None);
        assert_eq!(c.publisher, UNKNOWN);
        assert_eq!(c.isbn, UNKNOWN);
        assert_eq!(c.id, "42");
        assert_eq!(c.mirror_url("Cloudflare"), Some("http://cf/dune.pdf"));
    }

    #[test]
    fn normalise_empty_record() {
        let c = RawCandidate::default().normalise();
        assert_eq!(c.title, UNKNOWN);
        assert_eq!(c.year, None);
        assert!(c.mirrors.is_empty());
    }

    #[test]
    fn number_field_rejects_signed_and_fractional_strings() {
        assert_eq!(number_field(Some(&Value::String("-5".into()))), None);
        assert_eq!(number_field(Some(&Value::String("2.5".into()))), None);
        assert_eq!(number_field(Some(&serde_json::json!(2001))), Some(2001));
    }

    #[test]
    fn marc_codes() {
        assert_eq!(marc_language("English"), Some("eng"));
        assert_eq!(marc_language("fr"), Some("fre"));
        assert_eq!(marc_language("Klingon"), None);
    }

    struct Scripted {
        exact: Vec<SearchCandidate>,
        broad: Vec<SearchCandidate>,
        calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl SearchProvider for Scripted {
        async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchCandidate>, Pdf2AudioError> {
            self.calls.lock().unwrap().push(q.exact);
            Ok(if q.exact { self.exact.clone() } else { self.broad.clone() })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn fallback_goes_broad_only_when_exact_is_empty() {
        let one = RawCandidate::default().normalise();
        let p = Scripted {
            exact: vec![],
            broad: vec![one.clone()],
            calls: Mutex::new(vec![]),
        };
        let (found, kind) = search_with_fallback(&p, "t", "English").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(kind, SearchType::Broad);
        assert_eq!(*p.calls.lock().unwrap(), vec![true, false]);

        let p = Scripted {
            exact: vec![one],
            broad: vec![],
            calls: Mutex::new(vec![]),
        };
        let (_, kind) = search_with_fallback(&p, "t", "English").await.unwrap();
        assert_eq!(kind, SearchType::Exact);
        assert_eq!(*p.calls.lock().unwrap(), vec![true]);

        let p = Scripted {
            exact: vec![],
            broad: vec![],
            calls: Mutex::new(vec![]),
        };
        let (found, kind) = search_with_fallback(&p, "t", "English").await.unwrap();
        assert!(found.is_empty());
        assert_eq!(kind, SearchType::None);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn open_library_maps_docs_with_scans() {
        let app = Router::new().route(
            "/search.json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("language").map(String::as_str), Some("eng"));
                assert!(params.contains_key("title"));
                assert_eq!(params.get("limit").map(String::as_str), Some("7"));
                Json(serde_json::json!({
                    "docs": [
                        {
                            "key": "/works/OL1W",
                            "title": "Dune",
                            "author_name": ["Frank Herbert"],
                            "first_publish_year": 1965,
                            "ia": ["dune00herb"],
                            "number_of_pages_median": 412,
                            "publisher": ["Chilton"],
                        },
                        { "key": "/works/OL2W", "title": "No scan" }
                    ]
                }))
            }),
        );
        let base = serve(app).await;
        let provider = OpenLibraryProvider::new(5).with_base_url(base).with_limit(7);
        let query = SearchQuery {
            title: "Dune".into(),
            language: "English".into(),
            exact: true,
        };
        let found = provider.search(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.author, "Frank Herbert");
        assert_eq!(c.pages, Some(412));
        assert_eq!(c.id, "/works/OL1W");
        assert_eq!(
            c.mirror_url(INTERNET_ARCHIVE),
            Some("https://archive.org/download/dune00herb/dune00herb.pdf")
        );
    }

    #[tokio::test]
    async fn open_library_http_error_is_search_failed() {
        let app = Router::new().route(
            "/search.json",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(app).await;
        let provider = OpenLibraryProvider::new(5).with_base_url(base);
        let query = SearchQuery {
            title: "Dune".into(),
            language: "English".into(),
            exact: false,
        };
        let err = provider.search(&query).await.unwrap_err();
        assert!(matches!(err, Pdf2AudioError::SearchFailed(_)));
    }
}
