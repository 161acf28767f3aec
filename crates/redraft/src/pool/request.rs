use crate::{chunk::Chunk, error::Result, processor::RetryNotice};
use tokio::sync::oneshot;

/// A chunk handed to a worker, with the source tail of the chunk before it.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub chunk: Chunk,
    pub preceding: Option<String>,
}

/// Messages sent from the coordinator to a single worker.
#[derive(Debug)]
pub enum WorkRequest {
    /// Drive one chunk to a terminal status.
    Process(Assignment),
    /// Stop the worker and acknowledge on `response`.
    Shutdown { response: oneshot::Sender<()> },
}

/// Messages sent from workers back to the coordinator.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A chunk missed its band or failed and is about to be retried.
    Retrying(RetryNotice),
    /// A worker finished its assignment and is idle again.
    Finished {
        worker_id: usize,
        index: usize,
        outcome: Result<Chunk>,
    },
}
