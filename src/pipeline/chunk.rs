//! Sentence-bounded chunking of page text.
//!
//! Speech engines behave better on short inputs and a long page split into
//! chunks can start playing before the whole page is spoken. Chunks never
//! cut through a sentence: boundaries are `.`, `!` or `?` followed by
//! whitespace. A single sentence longer than the cap is kept whole.

use serde::{Deserialize, Serialize};

/// Default cap, in characters.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 500;

/// One piece of a page, ready to synthesize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub page: usize,
    /// 0-based, contiguous within a page.
    pub index: usize,
    pub text: String,
}

/// Split `text` into sentence-bounded chunks of at most `max_chunk_size`
/// characters (except for single over-long sentences).
///
/// Sentences inside a chunk are joined by one space, and that space counts
/// toward the cap. Blank input gives no chunks.
///
/// ```rust
/// use edgequake_pdf2audio::pipeline::chunk::split_into_chunks;
///
/// assert_eq!(split_into_chunks("Abc. Def. Ghi.", 10), vec!["Abc. Def.", "Ghi."]);
/// ```
pub fn split_into_chunks(text: &str, max_chunk_size: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= max_chunk_size {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(trimmed) {
        let len = sentence.chars().count();
        if current.is_empty() {
            current.push_str(sentence);
            current_len = len;
            continue;
        }
        if current_len + 1 + len > max_chunk_size {
            chunks.push(std::mem::take(&mut current));
            current.push_str(sentence);
            current_len = len;
        } else {
            current.push(' ');
            current.push_str(sentence);
            current_len += 1 + len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sentences of `text`: each ends at a terminator followed by whitespace (or
/// at the end of input). Returned slices are trimmed and non-empty.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let Some(&(_, next)) = iter.peek() else {
            break;
        };
        if next.is_whitespace() {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Chunk one page, numbering chunks from 0.
pub fn chunk_page(page: usize, text: &str, max_chunk_size: usize) -> Vec<Chunk> {
    split_into_chunks(text, max_chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { page, index, text })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_into_chunks("Hello world.", 500), vec!["Hello world."]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_into_chunks("", 500).is_empty());
        assert!(split_into_chunks("   \n\t ", 10).is_empty());
    }

    #[test]
    fn joining_space_counts_toward_cap() {
        assert_eq!(
            split_into_chunks("Abc. Def. Ghi.", 10),
            vec!["Abc. Def.", "Ghi."]
        );
        // "Abc. Def." is 9 chars; adding " Ghi." would be 14.
        assert_eq!(split_into_chunks("Abc. Def. Ghi.", 9), vec!["Abc. Def.", "Ghi."]);
        assert_eq!(
            split_into_chunks("Abc. Def. Ghi.", 8),
            vec!["Abc.", "Def.", "Ghi."]
        );
    }

    #[test]
    fn overlong_sentence_is_kept_whole() {
        let long = format!("{}.", "word ".repeat(40).trim());
        let text = format!("Short one. {long} Tail.");
        let chunks = split_into_chunks(&text, 50);
        assert!(chunks.contains(&long));
        assert_eq!(chunks.first().map(String::as_str), Some("Short one."));
        assert_eq!(chunks.last().map(String::as_str), Some("Tail."));
    }

    #[test]
    fn chunks_respect_cap_and_preserve_content() {
        let text = "First sentence here. Second one follows!  Is this third?\nYes it is. \
                    Then a fifth closes it.";
        let chunks = split_into_chunks(text, 40);
        for c in &chunks {
            assert!(!c.is_empty());
            assert!(c.chars().count() <= 40, "too long: {c:?}");
        }
        let normalised: Vec<&str> = text.split_whitespace().collect();
        let rejoined = chunks.join(" ");
        let rejoined: Vec<&str> = rejoined.split_whitespace().collect();
        assert_eq!(rejoined, normalised);
    }

    #[test]
    fn terminator_without_whitespace_does_not_split() {
        let s = split_sentences("Version 3.5 is out. Numbers like 1.2.3 stay.");
        assert_eq!(s, vec!["Version 3.5 is out.", "Numbers like 1.2.3 stay."]);
    }

    #[test]
    fn multibyte_text_is_counted_in_characters() {
        let text = "Ça va. Très bien! Merci.";
        let chunks = split_into_chunks(text, 12);
        assert_eq!(chunks, vec!["Ça va.", "Très bien!", "Merci."]);
    }

    #[test]
    fn chunk_page_numbers_contiguously() {
        let chunks = chunk_page(7, "One. Two. Three.", 5);
        let idx: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
        assert!(chunks.iter().all(|c| c.page == 7));
    }
}
