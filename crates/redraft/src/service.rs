//! Job admission and spawning.
//!
//! [`JobService`] is the process-wide entry point: it validates and plans an
//! incoming document, allocates a job id and spawns a [`JobCoordinator`] task
//! whose cancellation token is a child of the service's shutdown token.
//! Cancelling the service token therefore aborts every running job.

use crate::{
    config::{JobConfig, LengthMode},
    coordinator::JobCoordinator,
    error::{Error, Result},
    generation::TextGenerator,
    job::{Job, JobId, JobPhase},
    planner::ChunkPlanner,
    protocol::ServerMessage,
};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Shared, cheaply clonable handle to the job machinery.
pub struct JobService<G> {
    config: Arc<JobConfig>,
    generator: Arc<G>,
    next_job_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl<G> Clone for JobService<G> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            generator: Arc::clone(&self.generator),
            next_job_id: Arc::clone(&self.next_job_id),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<G: TextGenerator> JobService<G> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: JobConfig, generator: G) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            generator: Arc::new(generator),
            next_job_id: Arc::new(AtomicU64::new(1)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Token cancelled when the service begins shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Refuses new jobs and aborts every running one.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new jobs");
        self.shutdown.cancel();
    }

    /// Plans `text` and spawns its coordinator. Every event of the job,
    /// terminal one included, is sent on `events`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the document is outside the accepted
    /// word range (no job is created and no id is consumed), or
    /// [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn start_job(
        &self,
        text: String,
        custom_instructions: Option<String>,
        length_mode: Option<LengthMode>,
        events: mpsc::Sender<ServerMessage>,
    ) -> Result<JobHandle> {
        if self.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }

        let length_mode = length_mode.unwrap_or(self.config.default_length_mode);
        let plan = ChunkPlanner::from_config(&self.config)
            .plan(&text, self.config.length_ratio(length_mode))?;
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "tracing")]
        tracing::info!(
            job_id = id,
            chunks = plan.chunks.len(),
            input_words = plan.input_words,
            target_words = plan.target_words,
            %length_mode,
            "Starting job"
        );

        let custom_instructions = custom_instructions
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let cancel = self.shutdown.child_token();
        let coordinator = JobCoordinator::new(
            Job::new(id, plan, length_mode),
            text,
            custom_instructions,
            Arc::clone(&self.generator),
            Arc::clone(&self.config),
            events,
            cancel.clone(),
        );

        Ok(JobHandle {
            id,
            cancel,
            task: tokio::spawn(coordinator.run()),
        })
    }
}

/// Control handle for one spawned job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<JobPhase>,
}

impl JobHandle {
    pub const fn id(&self) -> JobId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests cancellation. Returns `false` if the job already ended, in
    /// which case nothing happens.
    pub fn abort(&self) -> bool {
        if self.task.is_finished() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Waits for the coordinator and returns the job's final phase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the coordinator task panicked.
    pub async fn join(self) -> Result<JobPhase> {
        self.task.await.map_err(|e| Error::ChannelError {
            context: format!("job {} task failed: {e}", self.id),
        })
    }
}
