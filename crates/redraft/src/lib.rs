#![doc = include_str!("../README.md")]

mod chunk;
mod config;
mod coordinator;
mod error;
mod generation;
mod job;
mod planner;
mod pool;
mod processor;
mod prompt;
mod protocol;
mod service;
mod skeleton;
mod stitcher;
mod transport;
mod words;

#[cfg(test)]
mod testing;

pub use crate::chunk::*;
pub use crate::config::*;
pub use crate::coordinator::{JobCoordinator, ReorderBuffer};
pub use crate::error::*;
pub use crate::generation::{GenerationError, GenerationRequest, TextGenerator};
pub use crate::job::*;
pub use crate::planner::*;
pub use crate::pool::{Assignment, WorkRequest, WorkerEvent, WorkerPool};
pub use crate::processor::*;
pub use crate::prompt::*;
pub use crate::protocol::*;
pub use crate::service::*;
pub use crate::skeleton::*;
pub use crate::stitcher::*;
pub use crate::transport::*;
pub use crate::words::{count_words, ends_sentence};
