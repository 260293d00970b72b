//! Relevance ranking of search candidates against the user's query.
//!
//! ```text
//! score = titleSim (+0.3 if query ⊂ title)
//!       + authorSim × 0.2   (multi-word query, known author)
//!       + yearBonus          (+0.1 ≥ 2000, +0.05 in 1990s)
//!       + pageBonus          (+0.1 for 50–1000 pages)
//! ```

use super::similarity::similarity;
use super::{RankedCandidate, SearchCandidate, UNKNOWN};
use serde::Serialize;

/// Each component of a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub title: f64,
    pub author: f64,
    pub year: f64,
    pub pages: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.title + self.author + self.year + self.pages
    }
}

pub fn score_candidate(query: &str, candidate: &SearchCandidate) -> ScoreBreakdown {
    let query_lower = query.to_lowercase();
    let title = candidate.title.trim();
    let author = candidate.author.trim();

    let mut title_score = similarity(query, title);
    if title.to_lowercase().contains(&query_lower) {
        title_score += 0.3;
    }

    let author_score =
        if query.split_whitespace().count() > 1 && !author.is_empty() && author != UNKNOWN {
            similarity(query, author) * 0.2
        } else {
            0.0
        };

    let year_score = match candidate.year {
        Some(y) if y >= 2000 => 0.1,
        Some(y) if y >= 1990 => 0.05,
        _ => 0.0,
    };

    let pages_score = match candidate.pages {
        Some(p) if (50..=1000).contains(&p) => 0.1,
        _ => 0.0,
    };

    ScoreBreakdown {
        title: title_score,
        author: author_score,
        year: year_score,
        pages: pages_score,
    }
}

/// Score every candidate and order them best first. Equal scores keep their
/// input order. Candidates themselves are not modified.
pub fn rank_candidates(query: &str, candidates: Vec<SearchCandidate>) -> Vec<RankedCandidate> {
    let mut scored: Vec<(f64, SearchCandidate)> = candidates
        .into_iter()
        .map(|c| (score_candidate(query, &c).total(), c))
        .collect();
    // sort_by is stable
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, candidate))| RankedCandidate {
            candidate,
            score,
            rank: i + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::fixtures::candidate;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn substring_title_scores_with_bonus() {
        let c = candidate("Python Programming", "Mark Lutz", Some(2010), Some(1600));
        let s = score_candidate("Python", &c);
        assert!(close(s.title, 0.5 + 0.3));
        assert!(close(s.author, 0.0), "single-word query ignores author");
        assert!(close(s.year, 0.1));
        assert!(close(s.pages, 0.0), "1600 pages is outside 50–1000");
        assert!(close(s.total(), 0.9));
    }

    #[test]
    fn bonus_boundaries() {
        let year = |y| score_candidate("x", &candidate("t", "a", Some(y), None)).year;
        assert!(close(year(2000), 0.1));
        assert!(close(year(1999), 0.05));
        assert!(close(year(1990), 0.05));
        assert!(close(year(1989), 0.0));

        let pages = |p| score_candidate("x", &candidate("t", "a", None, Some(p))).pages;
        assert!(close(pages(49), 0.0));
        assert!(close(pages(50), 0.1));
        assert!(close(pages(1000), 0.1));
        assert!(close(pages(1001), 0.0));
    }

    #[test]
    fn author_counts_only_for_multi_word_queries() {
        let c = candidate("Dune", "Frank Herbert", None, None);
        assert!(close(score_candidate("Dune", &c).author, 0.0));
        let s = score_candidate("Dune Herbert", &c);
        assert!(s.author > 0.0);
        assert!(close(s.author, similarity("Dune Herbert", "Frank Herbert") * 0.2));

        let unknown = candidate("Dune", UNKNOWN, None, None);
        assert!(close(score_candidate("Dune Herbert", &unknown).author, 0.0));
    }

    #[test]
    fn ranking_orders_by_score_and_keeps_ties_stable() {
        let input = vec![
            candidate("Cooking Basics", "A", None, None),
            candidate("Rust in Action", "B", Some(2021), Some(450)),
            candidate("Cooking Basics", "C", None, None),
        ];
        let ranked = rank_candidates("Rust", input);
        assert_eq!(ranked[0].candidate.title, "Rust in Action");
        assert_eq!(ranked[1].candidate.author, "A");
        assert_eq!(ranked[2].candidate.author, "C");
        let ranks: Vec<usize> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn ranking_empty_input() {
        assert!(rank_candidates("anything", Vec::new()).is_empty());
    }
}
