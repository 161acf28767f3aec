use super::request::{WorkRequest, WorkerEvent};
use crate::{generation::TextGenerator, processor::ChunkProcessor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Worker task that processes [`WorkRequest`] messages for one job.
///
/// Each worker listens on its own channel, drives every assigned chunk
/// through the shared [`ChunkProcessor`] and reports back on `events`. The
/// loop ends on [`WorkRequest::Shutdown`], when the request channel closes, or
/// when the coordinator stops listening.
pub async fn worker_loop<G: TextGenerator>(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    processor: Arc<ChunkProcessor<G>>,
    events: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Process(assignment) => {
                let index = assignment.chunk.index;
                let notices = events.clone();
                let outcome = processor
                    .process(
                        assignment.chunk,
                        assignment.preceding.as_deref(),
                        &cancel,
                        move |notice| {
                            // The event channel is sized so this only fails
                            // once the coordinator has gone away.
                            if notices.try_send(WorkerEvent::Retrying(notice)).is_err() {
                                #[cfg(feature = "tracing")]
                                tracing::debug!("Worker {worker_id} dropped a retry notice");
                            }
                        },
                    )
                    .await;

                if events
                    .send(WorkerEvent::Finished {
                        worker_id,
                        index,
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {worker_id} exiting, coordinator is gone");
                    break;
                }
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Worker {worker_id} received shutdown signal");
                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}
