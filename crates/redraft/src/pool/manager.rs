//! Per-job pool of chunk workers.
//!
//! This module defines the [`WorkerPool`] struct, which owns a fixed set of
//! asynchronous workers for a single job. The pool size is the job's
//! concurrency window: the coordinator only dispatches while a worker is idle,
//! so at most `size` chunks are ever in flight.
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`] and reports on a
//! shared [`WorkerEvent`] channel. Workers share the job's
//! [`CancellationToken`], so aborting the job stops every attempt in flight.

use super::{
    request::{Assignment, WorkRequest, WorkerEvent},
    worker::worker_loop,
};
use crate::{
    error::{Error, Result},
    generation::TextGenerator,
    processor::ChunkProcessor,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// How long [`WorkerPool::shutdown`] waits for each acknowledgement.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    idle: Vec<usize>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawns `size` workers sharing `processor` and returns the pool with
    /// the receiving end of their event channel.
    pub fn spawn<G: TextGenerator>(
        size: usize,
        processor: Arc<ChunkProcessor<G>>,
        max_retries: u32,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let size = size.max(1);
        // Every worker can have one `Finished` plus one notice per retry
        // outstanding, and never more.
        let (events_tx, events_rx) = mpsc::channel(size * (max_retries as usize + 2));

        let workers = (0..size)
            .map(|worker_id| {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(worker_loop(
                    worker_id,
                    rx,
                    Arc::clone(&processor),
                    events_tx.clone(),
                    cancel.clone(),
                ));
                tx
            })
            .collect();

        // Pop from the back so worker 0 is used first.
        let idle = (0..size).rev().collect();
        (
            Self {
                workers,
                idle,
                cancel,
            },
            events_rx,
        )
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.workers.len() - self.idle.len()
    }

    /// Hands `assignment` to an idle worker.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The job was cancelled (no dispatch happens after an abort).
    /// - No worker is idle.
    /// - The worker's channel is closed.
    pub async fn dispatch(&mut self, assignment: Assignment) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(worker_id) = self.idle.pop() else {
            return Err(Error::ChannelError {
                context: "no idle worker to dispatch to".to_string(),
            });
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(worker_id, chunk_index = assignment.chunk.index, "Dispatching chunk");
        self.workers[worker_id]
            .send(WorkRequest::Process(assignment))
            .await
            .map_err(|_| Error::ChannelError {
                context: format!("Worker {worker_id} channel closed"),
            })
    }

    /// Marks `worker_id` idle after it reported [`WorkerEvent::Finished`].
    pub fn release(&mut self, worker_id: usize) {
        if worker_id < self.workers.len() && !self.idle.contains(&worker_id) {
            self.idle.push(worker_id);
        }
    }

    /// Stops every worker.
    ///
    /// - Sends a [`WorkRequest::Shutdown`] to each worker.
    /// - Waits (up to 3 seconds per worker) for shutdown acknowledgements.
    ///
    /// Busy workers only see the request once their current chunk ends, so
    /// callers cancel the job token first when they want a prompt stop.
    pub async fn shutdown(self) {
        let mut acks = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(_e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                #[cfg(feature = "tracing")]
                tracing::debug!("Failed to send shutdown to worker {i}: {_e}");
            } else {
                acks.push((i, rx));
            }
        }

        let waits = acks.into_iter().map(|(_i, rx)| async move {
            match timeout(SHUTDOWN_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {_i} dropped its shutdown ack: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });
        futures::future::join_all(waits).await;
    }
}
