//! Server internals: configuration, telemetry and the HTTP/WebSocket
//! service.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env settings and their validation.
//! - [`service`] - routes, sessions and the generation backend.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod config;
pub mod service;
pub mod telemetry;
