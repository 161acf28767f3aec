//! Document skeleton extraction.
//!
//! A single generation call (retried on failure like any chunk attempt) that
//! produces a structural outline of the whole document. The outline is passed
//! to every chunk prompt to keep the rewrite thematically consistent.

use crate::{
    config::JobConfig,
    error::{Error, Result},
    generation::{self, GenerationError, GenerationRequest, TextGenerator, sleep_or_cancel},
    prompt,
    words::count_words,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Length requested for the outline.
pub const SKELETON_TARGET_WORDS: usize = 250;

/// Outlines shorter than this are treated as unusable.
pub const MIN_SKELETON_WORDS: usize = 5;

pub struct SkeletonExtractor<G> {
    generator: Arc<G>,
    config: Arc<JobConfig>,
}

impl<G: TextGenerator> SkeletonExtractor<G> {
    pub const fn new(generator: Arc<G>, config: Arc<JobConfig>) -> Self {
        Self { generator, config }
    }

    /// Extracts an outline of `text`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires, or [`Error::Skeleton`]
    /// once every attempt has failed or produced an unusable outline.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn extract(&self, text: &str, cancel: &CancellationToken) -> Result<String> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = GenerationError::EmptyOutput;

        for attempt in 1..=attempts {
            let request = GenerationRequest {
                prompt: prompt::skeleton_prompt(text, SKELETON_TARGET_WORDS),
                target_words: SKELETON_TARGET_WORDS,
                chunk_index: None,
            };

            match generation::attempt(
                &*self.generator,
                request,
                self.config.attempt_timeout,
                cancel,
            )
            .await
            {
                Ok(outline) if count_words(&outline) >= MIN_SKELETON_WORDS => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, words = count_words(&outline), "Skeleton extracted");
                    return Ok(outline.trim().to_string());
                }
                Ok(_) => last_error = GenerationError::EmptyOutput,
                Err(GenerationError::Cancelled) => return Err(Error::Cancelled),
                Err(e) => last_error = e,
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(attempt, attempts, error = %last_error, "Skeleton attempt failed");
            if attempt < attempts {
                sleep_or_cancel(self.config.backoff_for(attempt), cancel).await?;
            }
        }

        Err(Error::Skeleton {
            reason: last_error.to_string(),
        })
    }
}
