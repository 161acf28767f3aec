//! Word counting and sentence-boundary helpers shared by the planner,
//! processor and stitcher. A "word" is any maximal run of non-whitespace.

/// Characters allowed to trail a sentence terminator, e.g. `end."` or `(sic.)`.
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '\u{201d}', '\u{2019}', '\u{bb}'];

/// Counts whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Returns `true` if `word` ends a sentence (`.`, `!` or `?`, optionally
/// followed by closing quotes or brackets).
pub fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(CLOSERS).ends_with(['.', '!', '?'])
}

/// Byte ranges `(start, end)` of every word in `text`.
pub(crate) fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;

    for (pos, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, pos));
                start = None;
            }
            (false, None) => start = Some(pos),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

/// The last `n` words of `text`, joined by single spaces.
pub(crate) fn tail_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let skip = words.len().saturating_sub(n);
    words[skip..].join(" ")
}
