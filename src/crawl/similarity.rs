//! Text normalization and partial-ratio similarity.

use std::collections::{BTreeSet, HashMap};

/// Characters of normalized page text kept as the matched snippet.
pub const SNIPPET_LEN: usize = 200;

/// Characters of the normalized input used to locate the snippet.
const SNIPPET_ANCHOR_LEN: usize = 10;

/// Lowercase, drop punctuation, and collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scores two normalized strings on a 0–100 scale.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, needle: &str, haystack: &str) -> u8;
}

/// Best alignment of the shorter string against windows of the longer one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialRatio;

impl SimilarityScorer for PartialRatio {
    fn score(&self, needle: &str, haystack: &str) -> u8 {
        partial_ratio(needle, haystack)
    }
}

/// Inclusive threshold check.
pub fn is_match(score: u8, threshold: u8) -> bool {
    score >= threshold
}

/// Partial-ratio similarity between two strings.
///
/// An exact substring scores 100. Otherwise candidate windows of the longer
/// string, each as long as the shorter one, are aligned on words the two
/// strings share; the best normalized Levenshtein similarity wins.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.is_empty() {
        return 0;
    }
    if long.contains(short) {
        return 100;
    }

    let long_chars: Vec<char> = long.chars().collect();
    let short_len = short.chars().count();
    let max_start = long_chars.len() - short_len;

    let mut best = 0.0_f64;
    for start in window_starts(short, long, max_start) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        let sim = strsim::normalized_levenshtein(short, &window);
        if sim > best {
            best = sim;
        }
    }
    (best * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Char offsets in `long` where a window should start so that a word shared
/// with `short` lines up with its position in `short`.
fn window_starts(short: &str, long: &str, max_start: usize) -> BTreeSet<usize> {
    let mut offsets_in_short: HashMap<&str, Vec<usize>> = HashMap::new();
    for (offset, word) in word_offsets(short) {
        offsets_in_short.entry(word).or_default().push(offset);
    }

    let mut starts = BTreeSet::new();
    for (pos, word) in word_offsets(long) {
        if let Some(offsets) = offsets_in_short.get(word) {
            for &offset in offsets {
                starts.insert(pos.saturating_sub(offset).min(max_start));
            }
        }
    }
    if starts.is_empty() {
        starts.insert(0);
    }
    starts
}

/// `(char offset, word)` for each whitespace-separated word.
fn word_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut word_start: Option<(usize, usize)> = None;
    let mut char_idx = 0;
    for (byte_idx, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some((chars, bytes)) = word_start.take() {
                out.push((chars, &text[bytes..byte_idx]));
            }
        } else if word_start.is_none() {
            word_start = Some((char_idx, byte_idx));
        }
        char_idx += 1;
    }
    if let Some((chars, bytes)) = word_start {
        out.push((chars, &text[bytes..]));
    }
    out
}

/// Snippet of `page` starting where the input first appears.
///
/// Both arguments are normalized text. Falls back to the start of the page
/// when the input's opening characters are not found.
pub fn extract_snippet(page: &str, input: &str) -> String {
    let anchor: String = input.chars().take(SNIPPET_ANCHOR_LEN).collect();
    let start = if anchor.is_empty() {
        0
    } else {
        page.find(&anchor).unwrap_or(0)
    };
    page[start..].chars().take(SNIPPET_LEN).collect()
}
