//! The external text-generation capability.
//!
//! The pipeline only needs `generate(prompt, target_words) -> text | error`.
//! Provider clients implement [`TextGenerator`] and are injected into the
//! [`JobService`](crate::JobService); nothing in this crate talks to a network.

use core::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;

/// A single call to the generation capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Desired output length in words.
    pub target_words: usize,
    /// The chunk this call belongs to, `None` for the skeleton call.
    pub chunk_index: Option<usize>,
}

/// Failure of a single generation attempt. Every variant except `Cancelled`
/// is retryable.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation returned no text")]
    EmptyOutput,

    #[error("generation backend failed: {0}")]
    Backend(String),

    #[error("generation cancelled")]
    Cancelled,
}

/// Anything that can turn a prompt into text.
pub trait TextGenerator: Send + Sync + 'static {
    /// Produces text for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Backend`] (or any other variant) when the
    /// provider cannot produce output.
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// Runs one attempt with its own timeout, abandoning the call as soon as
/// `cancel` fires. Whitespace-only output counts as
/// [`GenerationError::EmptyOutput`].
pub(crate) async fn attempt<G>(
    generator: &G,
    request: GenerationRequest,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<String, GenerationError>
where
    G: TextGenerator,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GenerationError::Cancelled),
        result = tokio::time::timeout(limit, generator.generate(request)) => match result {
            Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyOutput),
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GenerationError::Timeout(limit)),
        },
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> crate::Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(crate::Error::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
