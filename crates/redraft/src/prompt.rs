//! Prompt construction for skeleton and chunk calls.
//!
//! The wording here is deliberately plain; what matters to the pipeline is
//! that every chunk prompt carries the length contract and, on retries, an
//! explicit correction derived from the measured deviation.

use crate::chunk::Chunk;
use core::fmt::{self, Write as _};

/// Words of preceding source text handed to each chunk for continuity.
pub const PRECEDING_CONTEXT_WORDS: usize = 60;

/// Correction added to a retry prompt after an out-of-band attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthAdjustment {
    /// The previous attempt was `n` words short of the target.
    Expand(usize),
    /// The previous attempt was `n` words over the target.
    Cut(usize),
}

impl LengthAdjustment {
    /// Derives the correction from a measured length. `None` when the
    /// attempt hit the target exactly.
    pub fn from_deviation(target: usize, actual: usize) -> Option<Self> {
        match actual.cmp(&target) {
            core::cmp::Ordering::Less => Some(Self::Expand(target - actual)),
            core::cmp::Ordering::Greater => Some(Self::Cut(actual - target)),
            core::cmp::Ordering::Equal => None,
        }
    }
}

impl fmt::Display for LengthAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expand(n) => write!(
                f,
                "Your previous version was {n} words too short. Expand by {n} words."
            ),
            Self::Cut(n) => write!(
                f,
                "Your previous version was {n} words too long. Cut by {n} words."
            ),
        }
    }
}

/// Shared, per-job inputs to every chunk prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub skeleton: Option<String>,
    pub custom_instructions: Option<String>,
    pub total_chunks: usize,
}

pub fn skeleton_prompt(text: &str, target_words: usize) -> String {
    format!(
        "Outline the structure of the document below in about {target_words} words: \
         its main thesis, the sections in order, and the key terms it relies on. \
         Return only the outline.\n\n---\n{text}\n---"
    )
}

pub fn chunk_prompt(
    chunk: &Chunk,
    context: &PromptContext,
    preceding: Option<&str>,
    adjustment: Option<LengthAdjustment>,
) -> String {
    let mut prompt = String::with_capacity(chunk.source_text.len() + 1024);

    let _ = writeln!(
        prompt,
        "Rewrite section {} of {} of a longer document.",
        chunk.index + 1,
        context.total_chunks
    );
    if let Some(skeleton) = &context.skeleton {
        let _ = writeln!(prompt, "\nDocument outline:\n{skeleton}");
    }
    if let Some(instructions) = &context.custom_instructions {
        let _ = writeln!(prompt, "\nAdditional instructions:\n{instructions}");
    }
    if let Some(preceding) = preceding.filter(|p| !p.is_empty()) {
        let _ = writeln!(prompt, "\nThe previous section ends with:\n{preceding}");
    }
    let _ = writeln!(
        prompt,
        "\nLength requirement: write {} words, and never fewer than {} or more than {}.",
        chunk.target_words, chunk.min_words, chunk.max_words
    );
    if let Some(adjustment) = adjustment {
        let _ = writeln!(prompt, "{adjustment}");
    }
    let _ = write!(
        prompt,
        "Return only the rewritten text.\n\n---\n{}\n---",
        chunk.source_text
    );

    prompt
}
