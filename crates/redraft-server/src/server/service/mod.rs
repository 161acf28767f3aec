//! Client-facing service.
//!
//! ## Structure
//!
//! - [`handler`] - axum routes and WebSocket sessions (`AppState`).
//! - [`backend`] - the OpenAI-compatible [`redraft::TextGenerator`].

pub mod backend;
pub mod handler;
