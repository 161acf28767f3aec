//! Final assembly of processed chunks.

use crate::{
    chunk::Chunk,
    error::{Error, Result},
    words::count_words,
};

/// The assembled document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stitched {
    pub text: String,
    pub word_count: usize,
}

/// Joins chunk results in index order.
///
/// Every chunk must be terminal and `chunks[i].index == i`. Each chunk's
/// text is normalized (trailing whitespace trimmed per line, runs of blank
/// lines collapsed) and chunks are separated by a single blank line.
///
/// # Errors
///
/// Returns [`Error::IncompleteStitch`] if the sequence is shorter than
/// `expected`, has a gap, or holds a chunk without a final result.
pub fn stitch(chunks: &[Chunk], expected: usize) -> Result<Stitched> {
    if chunks.len() != expected {
        return Err(Error::IncompleteStitch {
            reason: format!("expected {expected} chunks, have {}", chunks.len()),
        });
    }

    let mut parts = Vec::with_capacity(chunks.len());
    for (position, chunk) in chunks.iter().enumerate() {
        if chunk.index != position {
            return Err(Error::IncompleteStitch {
                reason: format!("chunk {} found at position {position}", chunk.index),
            });
        }
        let text = match (&chunk.result_text, chunk.status.is_terminal()) {
            (Some(text), true) => text,
            _ => {
                return Err(Error::IncompleteStitch {
                    reason: format!("chunk {position} is {:?}", chunk.status),
                });
            }
        };
        let normalized = normalize(text);
        if !normalized.is_empty() {
            parts.push(normalized);
        }
    }

    let text = parts.join("\n\n");
    let word_count = count_words(&text);
    Ok(Stitched { text, word_count })
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = false;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chunk::ChunkStatus, config::WordBand};

    fn done(index: usize, text: &str) -> Chunk {
        let mut chunk = Chunk::new(index, String::new(), 0, 10, WordBand { min: 1, max: 20 });
        chunk
            .finish(text.to_string(), count_words(text), ChunkStatus::OnTarget)
            .unwrap();
        chunk
    }

    #[test]
    fn joins_in_order_with_blank_lines() {
        let chunks = [
            done(0, "First part.  \n"),
            done(1, "\n\nSecond part\nstill second.\n\n\n\nNew paragraph."),
            done(2, "Third."),
        ];
        let stitched = stitch(&chunks, 3).unwrap();

        assert_eq!(
            stitched.text,
            "First part.\n\nSecond part\nstill second.\n\nNew paragraph.\n\nThird."
        );
        assert_eq!(stitched.word_count, 9);
    }

    #[test]
    fn word_count_matches_sum_of_chunks() {
        let chunks: Vec<_> = (0..4).map(|i| done(i, "one two three.")).collect();
        let total: usize = chunks.iter().map(|c| c.actual_words).sum();
        assert_eq!(stitch(&chunks, 4).unwrap().word_count, total);
    }

    #[test]
    fn rejects_missing_chunks() {
        let chunks = [done(0, "a"), done(2, "c")];
        assert!(matches!(
            stitch(&chunks, 2),
            Err(Error::IncompleteStitch { .. })
        ));
        assert!(matches!(
            stitch(&chunks[..1], 2),
            Err(Error::IncompleteStitch { .. })
        ));
    }

    #[test]
    fn rejects_unfinished_chunks() {
        let pending = Chunk::new(1, "b".to_string(), 1, 1, WordBand { min: 1, max: 1 });
        let err = stitch(&[done(0, "a"), pending], 2).unwrap_err();
        assert_eq!(
            err,
            Error::IncompleteStitch {
                reason: "chunk 1 is Pending".to_string()
            }
        );
    }
}
