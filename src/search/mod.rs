//! Book search: candidate types, relevance ranking, and providers.
//!
//! ```text
//! SearchProvider::search ──▶ Vec<SearchCandidate> ──▶ rank_candidates ──▶ Vec<RankedCandidate>
//!   (exact, then broad)       (normalised once)         (stable, by score)
//! ```

pub mod provider;
pub mod rank;
pub mod similarity;

pub use provider::{OpenLibraryProvider, RawCandidate, SearchProvider, SearchQuery};
pub use rank::{rank_candidates, score_candidate, ScoreBreakdown};
pub use similarity::similarity;

use serde::{Deserialize, Serialize};

/// Placeholder for missing textual fields.
pub const UNKNOWN: &str = "Unknown";

/// A named download location for a candidate's document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub url: String,
}

/// One search result. Textual fields are never empty (missing ones read
/// `"Unknown"`); numeric fields are `None` when the source had no number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    pub title: String,
    pub author: String,
    pub year: Option<i32>,
    pub pages: Option<u32>,
    pub size: String,
    pub extension: String,
    pub language: String,
    pub publisher: String,
    pub isbn: String,
    /// Identifier in the provider's catalogue.
    pub id: String,
    /// Download locations in the provider's order.
    #[serde(default)]
    pub mirrors: Vec<Mirror>,
}

impl SearchCandidate {
    /// URL of the mirror called `name`, if present and non-empty.
    pub fn mirror_url(&self, name: &str) -> Option<&str> {
        self.mirrors
            .iter()
            .find(|m| m.name == name && !m.url.trim().is_empty())
            .map(|m| m.url.as_str())
    }
}

/// A candidate with its relevance score and 1-based position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub candidate: SearchCandidate,
    pub score: f64,
    pub rank: usize,
}

/// Which matching mode produced the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Exact,
    Broad,
    None,
}

/// What `search` returns to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<RankedCandidate>,
    /// Candidates found before truncation.
    pub total: usize,
    pub showing: usize,
    pub search_type: SearchType,
    pub message: String,
}

impl SearchResponse {
    /// Rank `found`, keep the top `top_n`, and describe the outcome.
    pub fn from_candidates(
        query: &str,
        found: Vec<SearchCandidate>,
        search_type: SearchType,
        top_n: usize,
    ) -> Self {
        if found.is_empty() {
            return Self {
                results: Vec::new(),
                total: 0,
                showing: 0,
                search_type: SearchType::None,
                message: "No books found. Try a different search term or language.".to_string(),
            };
        }
        let total = found.len();
        let mut results = rank_candidates(query, found);
        results.truncate(top_n);
        let showing = results.len();
        Self {
            results,
            total,
            showing,
            search_type,
            message: format!("Found {total} books, showing top {showing} by relevance"),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn candidate(
        title: &str,
        author: &str,
        year: Option<i32>,
        pages: Option<u32>,
    ) -> SearchCandidate {
        SearchCandidate {
            title: title.to_string(),
            author: author.to_string(),
            year,
            pages,
            size: UNKNOWN.to_string(),
            extension: "pdf".to_string(),
            language: "English".to_string(),
            publisher: UNKNOWN.to_string(),
            isbn: UNKNOWN.to_string(),
            id: title.to_lowercase().replace(' ', "-"),
            mirrors: Vec::new(),
        }
    }
}
