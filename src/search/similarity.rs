//! Ratcliff/Obershelp string similarity.
//!
//! Find the longest common contiguous block, recurse on what lies to its
//! left and right, and report `2·M / (|a| + |b|)` where `M` is the total
//! number of matched characters. Comparison is case-insensitive and counts
//! Unicode scalar values, not bytes.

/// Similarity ratio in `[0, 1]`. Two empty strings score `1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_characters(&a, &b);
    2.0 * matched as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    // Explicit stack instead of recursion; order doesn't affect the sum.
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, alo, ahi, b, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest block with `a[i..i+k] == b[j..j+k]` inside the given windows.
/// Ties go to the block starting earliest in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    alo: usize,
    ahi: usize,
    b: &[char],
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            if a[i] == b[j] {
                let k = prev[col - 1] + 1;
                curr[col] = k;
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            } else {
                curr[col] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_strings_score_one() {
        assert!(close(similarity("Dune", "Dune"), 1.0));
        assert!(close(similarity("", ""), 1.0));
    }

    #[test]
    fn case_is_ignored() {
        assert!(close(similarity("Machine Learning", "machine learning"), 1.0));
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert!(close(similarity("abc", "xyz"), 0.0));
        assert!(close(similarity("abc", ""), 0.0));
    }

    #[test]
    fn known_ratios() {
        // Common block "bcd": 2·3 / 8.
        assert!(close(similarity("abcd", "bcde"), 0.75));
        // "python" inside "python programming": 2·6 / 24.
        assert!(close(similarity("Python", "Python Programming"), 0.5));
        // Blocks on both sides of the longest match are counted.
        assert!(close(similarity("a-bcd-e", "a bcd e"), 2.0 * 5.0 / 14.0));
    }

    #[test]
    fn symmetric_and_bounded() {
        let pairs = [
            ("Introduction to Python", "Python"),
            ("Data Science", "data"),
            ("The Rust Programming Language", "Programming Rust"),
        ];
        for (x, y) in pairs {
            let s = similarity(x, y);
            assert!((0.0..=1.0).contains(&s));
            assert!(close(s, similarity(y, x)), "{x} / {y}");
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert!(close(similarity("café", "cafe"), 0.75));
    }
}
