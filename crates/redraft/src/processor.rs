//! Per-chunk processing under the length contract.
//!
//! [`ChunkProcessor::process`] drives one chunk through the generation
//! capability and enforces the retry policy:
//!
//! - An attempt whose word count lands in `[min_words, max_words]` finishes the
//!   chunk: `on_target` on the first attempt, `passed_after_retry` later.
//! - An out-of-band attempt moves the chunk to `retrying` and the next prompt
//!   carries an explicit "expand by N" / "cut by N" correction.
//! - Failed attempts (timeout, backend error, empty output) are retried after
//!   an exponential backoff.
//! - After `1 + max_retries` attempts the closest attempt is kept, as
//!   `passed_after_retry` inside the secondary band or `flagged` outside it. A
//!   chunk with no usable attempt at all keeps its source text and is
//!   `flagged`.
//!
//! The job's cancellation token is checked before every attempt and raced
//! against every call and backoff.

use crate::{
    chunk::{Chunk, ChunkStatus},
    config::JobConfig,
    error::{Error, Result},
    generation::{self, GenerationError, GenerationRequest, TextGenerator, sleep_or_cancel},
    prompt::{self, LengthAdjustment, PromptContext},
    words::count_words,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a chunk is being retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    OutOfBand { actual_words: usize },
    Failed(GenerationError),
}

/// Emitted before each retry of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    pub chunk_index: usize,
    /// 1-based number of the attempt about to run.
    pub next_attempt: u32,
    pub max_attempts: u32,
    pub reason: RetryReason,
}

pub struct ChunkProcessor<G> {
    generator: Arc<G>,
    config: Arc<JobConfig>,
    context: Arc<PromptContext>,
}

impl<G: TextGenerator> ChunkProcessor<G> {
    pub const fn new(generator: Arc<G>, config: Arc<JobConfig>, context: Arc<PromptContext>) -> Self {
        Self {
            generator,
            config,
            context,
        }
    }

    /// Processes `chunk` to a terminal status.
    ///
    /// `preceding` is the tail of the previous chunk's source text, used for
    /// continuity. `on_retry` is invoked before every retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires. Generation failures are
    /// never returned; they degrade the chunk instead.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(chunk_index = chunk.index, target = chunk.target_words)))]
    pub async fn process<F>(
        &self,
        mut chunk: Chunk,
        preceding: Option<&str>,
        cancel: &CancellationToken,
        mut on_retry: F,
    ) -> Result<Chunk>
    where
        F: FnMut(RetryNotice) + Send,
    {
        let max_attempts = self.config.max_retries + 1;
        let band = chunk.band();
        let mut best: Option<(String, usize)> = None;
        let mut adjustment = None;
        let mut consecutive_failures = 0;

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            chunk.retry_count = attempt;

            let request = GenerationRequest {
                prompt: prompt::chunk_prompt(&chunk, &self.context, preceding, adjustment),
                target_words: chunk.target_words,
                chunk_index: Some(chunk.index),
            };
            let reason = match generation::attempt(
                &*self.generator,
                request,
                self.config.attempt_timeout,
                cancel,
            )
            .await
            {
                Ok(text) => {
                    consecutive_failures = 0;
                    let text = text.trim().to_string();
                    let words = count_words(&text);
                    if band.contains(words) {
                        let status = if attempt == 0 {
                            ChunkStatus::OnTarget
                        } else {
                            ChunkStatus::PassedAfterRetry
                        };
                        #[cfg(feature = "tracing")]
                        tracing::debug!(attempt, words, ?status, "Chunk landed in band");
                        chunk.finish(text, words, status)?;
                        return Ok(chunk);
                    }

                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, words, min = band.min, max = band.max, "Chunk out of band");
                    adjustment = LengthAdjustment::from_deviation(chunk.target_words, words);
                    let closer = best.as_ref().is_none_or(|(_, best_words)| {
                        best_words.abs_diff(chunk.target_words) > words.abs_diff(chunk.target_words)
                    });
                    if closer {
                        best = Some((text, words));
                    }
                    RetryReason::OutOfBand {
                        actual_words: words,
                    }
                }
                Err(GenerationError::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %e, "Chunk attempt failed");
                    consecutive_failures += 1;
                    RetryReason::Failed(e)
                }
            };

            if attempt + 1 < max_attempts {
                chunk.advance(ChunkStatus::Retrying)?;
                on_retry(RetryNotice {
                    chunk_index: chunk.index,
                    next_attempt: attempt + 2,
                    max_attempts,
                    reason,
                });
                if consecutive_failures > 0 {
                    sleep_or_cancel(self.config.backoff_for(consecutive_failures), cancel).await?;
                }
            }
        }

        let (text, words, status) = match best {
            Some((text, words)) if self.config.secondary_band(chunk.target_words).contains(words) => {
                (text, words, ChunkStatus::PassedAfterRetry)
            }
            Some((text, words)) => (text, words, ChunkStatus::Flagged),
            None => {
                let source = chunk.source_text.clone();
                let words = chunk.source_words;
                (source, words, ChunkStatus::Flagged)
            }
        };
        #[cfg(feature = "tracing")]
        tracing::info!(words, ?status, "Chunk retries exhausted");
        chunk.finish(text, words, status)?;
        Ok(chunk)
    }
}
