//! Error types for the rewrite-job pipeline.
//!
//! This module defines the central [`Error`] enum, which captures every
//! reportable failure inside planning, chunk processing, stitching and the
//! session transport. Generation failures for a single attempt live in
//! [`GenerationError`](crate::generation::GenerationError) instead: they are
//! absorbed by the retry policy and never fail a job on their own.
//!
//! ## Error Cases
//! - `DocumentTooShort` / `DocumentTooLong`: the input failed eligibility
//!   checks; no job is created.
//! - `IllegalTransition` / `IllegalChunkTransition`: a state machine was asked
//!   to make a move it does not allow.
//! - `IncompleteStitch`: stitching found a missing or unfinished chunk.
//! - `Skeleton`: skeleton extraction failed while it was required.
//! - `ChannelError`: an internal channel or the client transport went away.
//! - `Cancelled`: the job was aborted by the client or by shutdown.

use crate::{chunk::ChunkStatus, job::JobPhase};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the rewrite pipeline.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// The document has fewer words than the configured minimum.
    #[error("Document is too short: {words} words (minimum is {min})")]
    DocumentTooShort { words: usize, min: usize },

    /// The document has more words than the configured maximum.
    #[error("Document is too long: {words} words (maximum is {max})")]
    DocumentTooLong { words: usize, max: usize },

    /// A [`JobConfig`](crate::JobConfig) value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The job state machine rejected a phase change.
    #[error("Illegal job transition from {from} to {to}")]
    IllegalTransition { from: JobPhase, to: JobPhase },

    /// A chunk was asked to move backwards or out of a terminal status.
    #[error("Illegal status change for chunk {index}: {from:?} -> {to:?}")]
    IllegalChunkTransition {
        index: usize,
        from: ChunkStatus,
        to: ChunkStatus,
    },

    /// A chunk result arrived that does not fit the planned sequence.
    #[error("Unexpected result for chunk {index}: {reason}")]
    UnexpectedChunk { index: usize, reason: String },

    /// Stitching was attempted over a sequence with gaps or unfinished chunks.
    #[error("Cannot stitch output: {reason}")]
    IncompleteStitch { reason: String },

    /// Skeleton extraction failed and skeleton mode is `required`.
    #[error("Skeleton extraction failed: {reason}")]
    Skeleton { reason: String },

    /// Internal channel send/receive failure, including a dropped client.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// An inbound frame could not be decoded.
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// The job was aborted before it finished.
    #[error("Job cancelled")]
    Cancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` for input problems that are reported before any job
    /// exists.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DocumentTooShort { .. } | Self::DocumentTooLong { .. }
        )
    }
}
