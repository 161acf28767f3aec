//! Bounded-concurrency chunk workers.
//!
//! - [`manager`] - the per-job [`WorkerPool`](manager::WorkerPool).
//! - [`worker`] - the worker task loop.
//! - [`request`] - messages exchanged between the coordinator and workers.

pub mod manager;
pub mod request;
pub mod worker;

pub use manager::WorkerPool;
pub use request::{Assignment, WorkRequest, WorkerEvent};
