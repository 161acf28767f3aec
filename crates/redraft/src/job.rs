//! The job aggregate and its phase state machine.

use crate::{
    chunk::Chunk,
    config::LengthMode,
    error::{Error, Result},
    planner::Plan,
};
use core::fmt;
use serde::{Deserialize, Serialize};
use core::time::Duration;
use tokio::time::Instant;

/// Numeric job identifier, unique per process.
pub type JobId = u64;

/// Lifecycle phase of a job.
///
/// ```text
/// idle -> connecting -> [skeleton_extraction] -> chunk_processing -> stitching -> complete
/// ```
///
/// `failed` and `aborted` are reachable from every non-terminal phase.
/// `complete`, `failed` and `aborted` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Idle,
    Connecting,
    SkeletonExtraction,
    ChunkProcessing,
    Stitching,
    Complete,
    Failed,
    Aborted,
}

impl JobPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Aborted)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Aborted => true,
            Self::Connecting => matches!(self, Self::Idle),
            Self::SkeletonExtraction => matches!(self, Self::Connecting),
            Self::ChunkProcessing => matches!(self, Self::Connecting | Self::SkeletonExtraction),
            Self::Stitching => matches!(self, Self::ChunkProcessing),
            Self::Complete => matches!(self, Self::Stitching),
            Self::Idle => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::SkeletonExtraction => "skeleton_extraction",
            Self::ChunkProcessing => "chunk_processing",
            Self::Stitching => "stitching",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client-initiated rewrite request.
///
/// Owned exclusively by its coordinator. Once the phase is terminal every
/// mutating method is rejected.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    phase: JobPhase,
    input_words: usize,
    target_words: usize,
    length_mode: LengthMode,
    chunks: Vec<Chunk>,
    completed_chunks: usize,
    words_processed: usize,
    projected_final_words: usize,
    warnings: Vec<String>,
    started_at: Instant,
}

impl Job {
    pub fn new(id: JobId, plan: Plan, length_mode: LengthMode) -> Self {
        Self {
            id,
            phase: JobPhase::Idle,
            input_words: plan.input_words,
            target_words: plan.target_words,
            length_mode,
            chunks: plan.chunks,
            completed_chunks: 0,
            words_processed: 0,
            projected_final_words: 0,
            warnings: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub const fn id(&self) -> JobId {
        self.id
    }

    pub const fn phase(&self) -> JobPhase {
        self.phase
    }

    pub const fn input_words(&self) -> usize {
        self.input_words
    }

    pub const fn target_words(&self) -> usize {
        self.target_words
    }

    pub const fn length_mode(&self) -> LengthMode {
        self.length_mode
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks recorded so far, always a prefix of the plan.
    pub const fn completed_chunks(&self) -> usize {
        self.completed_chunks
    }

    pub const fn words_processed(&self) -> usize {
        self.words_processed
    }

    /// Projected final length, or 0 before the first chunk completes.
    pub const fn projected_final_words(&self) -> usize {
        self.projected_final_words
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Moves the job to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] for moves the state machine does
    /// not allow, including any move out of a terminal phase.
    pub fn transition(&mut self, next: JobPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(job_id = self.id, from = %self.phase, to = %next, "Job transition");
        self.phase = next;
        Ok(())
    }

    /// Records the next finished chunk in index order and updates the running
    /// totals.
    ///
    /// # Errors
    ///
    /// Fails if the job is not processing chunks, if `chunk` is not the next
    /// expected index (or lies outside the plan), or if it has not reached a
    /// terminal status.
    pub fn record_chunk(&mut self, chunk: Chunk) -> Result<&Chunk> {
        if self.phase != JobPhase::ChunkProcessing {
            return Err(Error::UnexpectedChunk {
                index: chunk.index,
                reason: format!("job is {}", self.phase),
            });
        }
        if chunk.index >= self.chunks.len() || chunk.index != self.completed_chunks {
            return Err(Error::UnexpectedChunk {
                index: chunk.index,
                reason: format!("expected chunk {}", self.completed_chunks),
            });
        }
        if !chunk.status.is_terminal() || chunk.result_text.is_none() {
            return Err(Error::UnexpectedChunk {
                index: chunk.index,
                reason: format!("chunk is still {:?}", chunk.status),
            });
        }

        let index = chunk.index;
        self.words_processed += chunk.actual_words;
        self.chunks[index] = chunk;
        self.completed_chunks += 1;
        self.update_projection();
        Ok(&self.chunks[index])
    }

    /// Appends a non-fatal notice. Ignored once the job is terminal.
    pub fn push_warning(&mut self, message: String) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.warnings.push(message);
        true
    }

    /// Seconds until completion, extrapolated from the mean time per chunk.
    pub fn estimated_remaining(&self) -> Option<u64> {
        if self.completed_chunks == 0 {
            return None;
        }
        let remaining = self.total_chunks() - self.completed_chunks;
        let per_chunk = self.elapsed().as_secs_f64() / self.completed_chunks as f64;
        Some((per_chunk * remaining as f64).round() as u64)
    }

    /// Extrapolates the final length from the observed output/target ratio.
    /// Never lets the projection move backwards.
    fn update_projection(&mut self) {
        let (done, rest) = self.chunks.split_at(self.completed_chunks);
        let done_target: usize = done.iter().map(|c| c.target_words).sum();
        let rest_target: usize = rest.iter().map(|c| c.target_words).sum();

        let ratio = if done_target == 0 {
            1.0
        } else {
            self.words_processed as f64 / done_target as f64
        };
        let estimate = self.words_processed + (rest_target as f64 * ratio).round() as usize;
        self.projected_final_words = self.projected_final_words.max(estimate);
    }
}
