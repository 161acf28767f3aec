use crate::{
    config::WordBand,
    error::{Error, Result},
};
use serde::{Deserialize, Serialize};

/// Processing status of a single chunk.
///
/// Status only moves forward: `Pending → Retrying* → {OnTarget |
/// PassedAfterRetry | Flagged}`. Terminal statuses are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    #[default]
    Pending,
    /// First attempt landed inside the primary band.
    OnTarget,
    /// An attempt missed the band and another one is scheduled.
    Retrying,
    /// A retry landed inside the primary band, or the best attempt landed
    /// inside the secondary band.
    PassedAfterRetry,
    /// Retries were exhausted without an acceptable length.
    Flagged,
}

impl ChunkStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::OnTarget | Self::PassedAfterRetry | Self::Flagged)
    }

    pub const fn can_advance_to(self, next: Self) -> bool {
        match self {
            Self::Pending => !matches!(next, Self::Pending),
            Self::Retrying => !matches!(next, Self::Pending),
            Self::OnTarget | Self::PassedAfterRetry | Self::Flagged => false,
        }
    }
}

/// A contiguous, word-bounded slice of the input document.
///
/// `index`, `source_text` and the word targets are fixed by the planner. The
/// result fields are written only by the chunk processor.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub source_text: String,
    pub source_words: usize,
    pub target_words: usize,
    pub min_words: usize,
    pub max_words: usize,
    pub result_text: Option<String>,
    pub actual_words: usize,
    pub retry_count: u32,
    pub status: ChunkStatus,
}

impl Chunk {
    pub fn new(
        index: usize,
        source_text: String,
        source_words: usize,
        target_words: usize,
        band: WordBand,
    ) -> Self {
        Self {
            index,
            source_text,
            source_words,
            target_words,
            min_words: band.min,
            max_words: band.max,
            result_text: None,
            actual_words: 0,
            retry_count: 0,
            status: ChunkStatus::Pending,
        }
    }

    pub const fn band(&self) -> WordBand {
        WordBand {
            min: self.min_words,
            max: self.max_words,
        }
    }

    /// Moves the chunk to `next`, rejecting backwards or post-terminal moves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalChunkTransition`] if the move is not allowed.
    pub fn advance(&mut self, next: ChunkStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::IllegalChunkTransition {
                index: self.index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records the final text for this chunk and moves it to a terminal
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalChunkTransition`] if `status` is not terminal
    /// or the chunk already finished.
    pub fn finish(&mut self, text: String, words: usize, status: ChunkStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::IllegalChunkTransition {
                index: self.index,
                from: self.status,
                to: status,
            });
        }
        self.advance(status)?;
        self.result_text = Some(text);
        self.actual_words = words;
        Ok(())
    }
}
