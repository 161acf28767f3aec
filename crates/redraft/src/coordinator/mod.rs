//! The per-job coordinator.
//!
//! A [`JobCoordinator`] owns one [`Job`] for its whole life and is the only
//! writer of its state. [`JobCoordinator::run`] sequences the phases:
//!
//! 1. `connecting`: announce the job with `job_started`.
//! 2. `skeleton_extraction` (unless skeleton mode is `off`).
//! 3. `chunk_processing`: dispatch chunks to a per-job [`WorkerPool`] within
//!    the concurrency window, buffer out-of-order completions in a
//!    [`ReorderBuffer`] and emit `chunk_complete` strictly by index, with a
//!    `progress` event between chunks and for every retry.
//! 4. `stitching`, then `job_complete`.
//!
//! Exactly one terminal event is emitted per job: `job_complete`,
//! `job_failed`, or `job_aborted` when the job's cancellation token fires.
//! If the client's event channel goes away the job is cancelled and
//! abandoned without further emission.

mod reorder;


pub use reorder::ReorderBuffer;

use crate::{
    chunk::{Chunk, ChunkStatus},
    config::{JobConfig, SkeletonMode},
    error::{Error, Result},
    generation::TextGenerator,
    job::{Job, JobPhase},
    pool::{Assignment, WorkerEvent, WorkerPool},
    processor::{ChunkProcessor, RetryNotice, RetryReason},
    prompt::{PRECEDING_CONTEXT_WORDS, PromptContext},
    protocol::ServerMessage,
    skeleton::SkeletonExtractor,
    stitcher::{self, Stitched},
    words::tail_words,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct JobCoordinator<G> {
    job: Job,
    source: String,
    custom_instructions: Option<String>,
    generator: Arc<G>,
    config: Arc<JobConfig>,
    events: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
    /// `chunk_complete` events actually delivered.
    emitted_chunks: usize,
}

impl<G: TextGenerator> JobCoordinator<G> {
    pub const fn new(
        job: Job,
        source: String,
        custom_instructions: Option<String>,
        generator: Arc<G>,
        config: Arc<JobConfig>,
        events: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            source,
            custom_instructions,
            generator,
            config,
            events,
            cancel,
            emitted_chunks: 0,
        }
    }

    pub const fn job(&self) -> &Job {
        &self.job
    }

    /// Drives the job to a terminal phase and returns it.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(job_id = self.job.id())))]
    pub async fn run(mut self) -> JobPhase {
        let outcome = self.drive().await;
        if outcome.is_err() {
            // stop any attempt still in flight
            self.cancel.cancel();
        }

        match outcome {
            Ok(stitched) => self.complete(stitched).await,
            Err(Error::Cancelled) => self.abort().await,
            Err(Error::ChannelError { context: _context }) if self.events.is_closed() => {
                #[cfg(feature = "tracing")]
                tracing::info!(context = %_context, "Client disconnected, abandoning job");
            }
            Err(e) => self.fail(e).await,
        }

        self.job.phase()
    }

    async fn drive(&mut self) -> Result<Stitched> {
        self.job.transition(JobPhase::Connecting)?;
        self.emit(ServerMessage::JobStarted {
            job_id: self.job.id(),
            total_chunks: self.job.total_chunks(),
            input_words: self.job.input_words(),
            target_words: self.job.target_words(),
            length_mode: self.job.length_mode(),
        })
        .await?;

        let skeleton = self.extract_skeleton().await?;

        self.job.transition(JobPhase::ChunkProcessing)?;
        self.emit(ServerMessage::phase(
            JobPhase::ChunkProcessing,
            format!("Processing {} chunks", self.job.total_chunks()),
        ))
        .await?;
        self.process_chunks(skeleton).await?;

        self.job.transition(JobPhase::Stitching)?;
        self.emit(ServerMessage::phase(
            JobPhase::Stitching,
            "Stitching final document",
        ))
        .await?;
        stitcher::stitch(self.job.chunks(), self.job.total_chunks())
    }

    async fn extract_skeleton(&mut self) -> Result<Option<String>> {
        let mode = self.config.skeleton_mode;
        if mode == SkeletonMode::Off {
            return Ok(None);
        }

        self.job.transition(JobPhase::SkeletonExtraction)?;
        self.emit(ServerMessage::phase(
            JobPhase::SkeletonExtraction,
            "Extracting document outline",
        ))
        .await?;

        let extractor = SkeletonExtractor::new(Arc::clone(&self.generator), Arc::clone(&self.config));
        match extractor.extract(&self.source, &self.cancel).await {
            Ok(outline) => Ok(Some(outline)),
            Err(Error::Skeleton { reason }) if mode == SkeletonMode::Optional => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%reason, "Continuing without a skeleton");
                self.warn(format!(
                    "Outline extraction failed ({reason}); continuing without it"
                ))
                .await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn process_chunks(&mut self, skeleton: Option<String>) -> Result<()> {
        let total = self.job.total_chunks();
        let context = PromptContext {
            skeleton,
            custom_instructions: self.custom_instructions.clone(),
            total_chunks: total,
        };
        let processor = ChunkProcessor::new(
            Arc::clone(&self.generator),
            Arc::clone(&self.config),
            Arc::new(context),
        );
        let (mut pool, mut worker_events) = WorkerPool::spawn(
            self.config.concurrency.min(total),
            Arc::new(processor),
            self.config.max_retries,
            self.cancel.clone(),
        );

        let result = self.schedule(&mut pool, &mut worker_events).await;
        if result.is_err() {
            self.cancel.cancel();
        }
        pool.shutdown().await;
        result
    }

    async fn schedule(
        &mut self,
        pool: &mut WorkerPool,
        worker_events: &mut mpsc::Receiver<WorkerEvent>,
    ) -> Result<()> {
        let total = self.job.total_chunks();
        let mut reorder = ReorderBuffer::new();
        let mut next_dispatch = 0;

        while self.job.completed_chunks() < total {
            while next_dispatch < total && pool.has_idle() {
                pool.dispatch(self.assignment(next_dispatch)).await?;
                next_dispatch += 1;
            }

            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                event = worker_events.recv() => event.ok_or_else(|| Error::ChannelError {
                    context: "worker event channel closed".to_string(),
                })?,
            };

            match event {
                WorkerEvent::Retrying(notice) => self.report_retry(&notice).await?,
                WorkerEvent::Finished {
                    worker_id,
                    index: _index,
                    outcome,
                } => {
                    pool.release(worker_id);
                    #[cfg(feature = "tracing")]
                    tracing::trace!(worker_id, chunk_index = _index, "Chunk finished");
                    if let Err(chunk) = reorder.insert(outcome?) {
                        return Err(Error::UnexpectedChunk {
                            index: chunk.index,
                            reason: "duplicate result".to_string(),
                        });
                    }
                    while let Some(chunk) = reorder.pop_ready() {
                        self.complete_chunk(chunk).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn assignment(&self, index: usize) -> Assignment {
        let chunks = self.job.chunks();
        let preceding = index
            .checked_sub(1)
            .map(|prev| tail_words(&chunks[prev].source_text, PRECEDING_CONTEXT_WORDS));
        Assignment {
            chunk: chunks[index].clone(),
            preceding,
        }
    }

    async fn complete_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let total = self.job.total_chunks();
        let index = self.job.record_chunk(chunk)?.index;
        let recorded = &self.job.chunks()[index];

        let flagged = (recorded.status == ChunkStatus::Flagged).then(|| {
            format!(
                "Chunk {} of {total} is off target: {} words against {} (accepted {}-{})",
                index + 1,
                recorded.actual_words,
                recorded.target_words,
                recorded.min_words,
                recorded.max_words,
            )
        });
        let message = ServerMessage::chunk_complete(
            recorded,
            self.job.words_processed(),
            self.job.projected_final_words(),
            total,
        );
        #[cfg(feature = "tracing")]
        tracing::info!(
            chunk_index = index,
            status = ?recorded.status,
            words = recorded.actual_words,
            retries = recorded.retry_count,
            "Chunk complete"
        );

        self.emit(message).await?;
        self.emitted_chunks += 1;

        if let Some(warning) = flagged {
            self.warn(warning).await?;
        }
        if self.job.completed_chunks() < total {
            self.emit(ServerMessage::Progress {
                phase: JobPhase::ChunkProcessing,
                message: format!("Chunk {} of {total} complete", index + 1),
                completed_chunks: Some(self.job.completed_chunks()),
                words_processed: Some(self.job.words_processed()),
                projected_final: Some(self.job.projected_final_words()),
                estimated_remaining: self.job.estimated_remaining(),
            })
            .await?;
        }
        Ok(())
    }

    async fn report_retry(&mut self, notice: &RetryNotice) -> Result<()> {
        let cause = match &notice.reason {
            RetryReason::OutOfBand { actual_words } => format!("{actual_words} words"),
            RetryReason::Failed(e) => e.to_string(),
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(
            chunk_index = notice.chunk_index,
            attempt = notice.next_attempt,
            %cause,
            "Chunk retrying"
        );

        let projected = self.job.projected_final_words();
        self.emit(ServerMessage::Progress {
            phase: JobPhase::ChunkProcessing,
            message: format!(
                "Chunk {} retrying, attempt {} of {} ({cause})",
                notice.chunk_index + 1,
                notice.next_attempt,
                notice.max_attempts
            ),
            completed_chunks: Some(self.job.completed_chunks()),
            words_processed: Some(self.job.words_processed()),
            projected_final: (projected > 0).then_some(projected),
            estimated_remaining: self.job.estimated_remaining(),
        })
        .await
    }

    async fn warn(&mut self, message: String) -> Result<()> {
        if !self.job.push_warning(message.clone()) {
            return Ok(());
        }
        self.emit(ServerMessage::Warning { message }).await
    }

    /// Sends a non-terminal event, giving up as soon as the job is cancelled.
    async fn emit(&self, message: ServerMessage) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = self.events.send(message) => sent.map_err(|e| Error::ChannelError {
                context: format!("client event channel closed, dropped {}", e.0.kind()),
            }),
        }
    }

    async fn complete(&mut self, stitched: Stitched) {
        if self.cancel.is_cancelled() {
            return self.abort().await;
        }
        if let Err(e) = self.job.transition(JobPhase::Complete) {
            return self.fail(e).await;
        }
        #[cfg(feature = "tracing")]
        tracing::info!(
            words = stitched.word_count,
            target = self.job.target_words(),
            warnings = self.job.warnings().len(),
            "Job complete"
        );
        self.send_terminal(ServerMessage::JobComplete {
            final_output: stitched.text,
            final_word_count: stitched.word_count,
            target_words: self.job.target_words(),
            time_elapsed: self.job.elapsed().as_secs_f64(),
        })
        .await;
    }

    async fn abort(&mut self) {
        if let Err(_e) = self.job.transition(JobPhase::Aborted) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "Failed to abort job");
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::info!(completed = self.emitted_chunks, "Job aborted");
        self.send_terminal(ServerMessage::JobAborted {
            completed_chunks: self.emitted_chunks,
            total_chunks: self.job.total_chunks(),
        })
        .await;
    }

    async fn fail(&mut self, error: Error) {
        if let Err(_e) = self.job.transition(JobPhase::Failed) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "Failed to fail job");
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::error!(%error, "Job failed");
        self.send_terminal(ServerMessage::JobFailed {
            error: error.to_string(),
        })
        .await;
    }

    async fn send_terminal(&self, message: ServerMessage) {
        if self.events.send(message).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Client left before the terminal event");
        }
    }
}
