//! Deterministic cleanup of extracted page text before it is spoken.
//!
//! pdfium returns text with the layout baked in: hard line breaks at every
//! column edge, words hyphenated across lines, stray zero-width characters.
//! Spoken as-is, that produces odd pauses and half-words. Each rule below is
//! a pure `&str → String` pass.
//!
//! ## Rule Order
//!
//! Line endings are normalised before de-hyphenation so the hyphen rule only
//! has to match `\n`, and whitespace is collapsed last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule in order:
///
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 3. Re-join words hyphenated across a line break
/// 4. Collapse whitespace runs to a single space and trim
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = join_hyphenated_words(&s);
    collapse_whitespace(&s)
}

/// Prefix cleaned text with a spoken page marker.
pub fn announce_page(page: usize, text: &str) -> String {
    format!("Page {page}. {text}")
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Join words hyphenated across lines ───────────────────────────────

// "exam-\nple" → "example". Only lowercase continuations, so "Anglo-\nSaxon"
// keeps its hyphen and line-ending dashes in lists survive.
static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-[ \t]*\n[ \t]*(\p{Ll})").unwrap());

fn join_hyphenated_words(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Rule 4: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").to_string()
}
