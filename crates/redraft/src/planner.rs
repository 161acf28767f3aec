//! Word-bounded chunk planning.
//!
//! [`ChunkPlanner`] validates a document against the eligibility bounds and
//! splits it into an ordered, non-overlapping and fully covering sequence of
//! [`Chunk`]s. Splits prefer sentence boundaries: after greedily taking
//! `chunk_target_words` words, the planner walks back up to
//! [`SENTENCE_SEARCH_FRACTION`] of the target looking for a word that ends a
//! sentence, and only cuts mid-sentence when none is found.
//!
//! Chunk sources are sliced straight out of the input, so paragraph breaks
//! inside a chunk survive and the concatenated sources reproduce the input
//! modulo whitespace between chunks.

use crate::{
    chunk::Chunk,
    config::{JobConfig, WordBand},
    error::{Error, Result},
    words::{ends_sentence, word_spans},
};

/// Fraction of the chunk target searched backwards for a sentence end.
pub const SENTENCE_SEARCH_FRACTION: f64 = 0.20;

/// The planned chunk sequence for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub chunks: Vec<Chunk>,
    pub input_words: usize,
    /// Sum of every chunk's target.
    pub target_words: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPlanner {
    chunk_target_words: usize,
    tolerance: f64,
    min_document_words: usize,
    max_document_words: usize,
}

impl ChunkPlanner {
    pub const fn new(
        chunk_target_words: usize,
        tolerance: f64,
        min_document_words: usize,
        max_document_words: usize,
    ) -> Self {
        Self {
            chunk_target_words,
            tolerance,
            min_document_words,
            max_document_words,
        }
    }

    pub const fn from_config(config: &JobConfig) -> Self {
        Self::new(
            config.chunk_target_words,
            config.tolerance,
            config.min_document_words,
            config.max_document_words,
        )
    }

    /// Checks a document's word count against the eligibility bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DocumentTooShort`] or [`Error::DocumentTooLong`].
    pub const fn validate(&self, words: usize) -> Result<()> {
        if words < self.min_document_words {
            return Err(Error::DocumentTooShort {
                words,
                min: self.min_document_words,
            });
        }
        if words > self.max_document_words {
            return Err(Error::DocumentTooLong {
                words,
                max: self.max_document_words,
            });
        }
        Ok(())
    }

    /// Splits `text` into chunks whose targets are their source length scaled
    /// by `ratio`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the document is outside the accepted
    /// word range.
    pub fn plan(&self, text: &str, ratio: f64) -> Result<Plan> {
        let spans = word_spans(text);
        let input_words = spans.len();
        self.validate(input_words)?;

        let mut chunks = Vec::new();
        for (index, (first, end)) in self.boundaries(text, &spans).into_iter().enumerate() {
            let source_text = text[spans[first].0..spans[end - 1].1].to_string();
            let source_words = end - first;
            let target_words = ((source_words as f64 * ratio).round() as usize).max(1);
            let band = WordBand::around(target_words, self.tolerance);
            chunks.push(Chunk::new(
                index,
                source_text,
                source_words,
                target_words,
                band,
            ));
        }

        let target_words = chunks.iter().map(|c| c.target_words).sum();
        Ok(Plan {
            chunks,
            input_words,
            target_words,
        })
    }

    /// Word ranges `[first, end)` for each chunk.
    fn boundaries(&self, text: &str, spans: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let total = spans.len();
        let target = self.chunk_target_words.max(1);
        let window = (target as f64 * SENTENCE_SEARCH_FRACTION) as usize;
        let is_sentence_end = |end: usize| {
            let (s, e) = spans[end - 1];
            ends_sentence(&text[s..e])
        };

        let mut ranges = Vec::with_capacity(total / target + 1);
        let mut first = 0;
        while first < total {
            let end = if total - first <= target {
                total
            } else {
                let hard = first + target;
                let floor = hard.saturating_sub(window).max(first + 1);
                let cut = (floor..=hard)
                    .rev()
                    .find(|&end| is_sentence_end(end))
                    .unwrap_or(hard);

                // A remainder too small to search is folded into this chunk.
                if total - cut < window { total } else { cut }
            };
            ranges.push((first, end));
            first = end;
        }
        ranges
    }
}

impl From<&JobConfig> for ChunkPlanner {
    fn from(config: &JobConfig) -> Self {
        Self::from_config(config)
    }
}
