//! HTTP surface of the rewrite service.
//!
//! - `GET /ws` upgrades to a WebSocket and runs one [`StreamTransport`]
//!   session over it, carrying JSON text frames both ways.
//! - `GET /healthz` answers `ok` while the service accepts work.

use crate::server::{
    service::backend::OpenAiCompatGenerator,
    telemetry::{record_event, session_closed, session_opened},
};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use core::future;
use futures::{SinkExt, StreamExt};
use portable_atomic::{AtomicU64, AtomicUsize, Ordering};
use redraft::{JobService, StreamTransport};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub type RewriteService = JobService<OpenAiCompatGenerator>;

#[derive(Clone)]
pub struct AppState {
    service: RewriteService,
    sessions: Arc<AtomicUsize>,
    next_session_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(service: RewriteService) -> Self {
        Self {
            service,
            sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub const fn service(&self) -> &RewriteService {
        &self.service
    }

    /// Number of WebSocket sessions still open.
    pub fn sessions_inflight(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    #[tracing::instrument(name = "session", skip_all, fields(session_id))]
    async fn run_session(self, socket: WebSocket) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("session_id", session_id);
        let _guard = SessionGuard::open(Arc::clone(&self.sessions));
        tracing::debug!("session opened");

        let (sink, stream) = socket.split();
        let inbound = Box::pin(
            stream
                .take_while(|frame| {
                    future::ready(matches!(frame, Ok(message) if !matches!(message, Message::Close(_))))
                })
                .filter_map(|frame| {
                    future::ready(match frame {
                        Ok(Message::Text(text)) => Some(text.to_string()),
                        _ => None,
                    })
                }),
        );
        let outbound = Box::pin(
            sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))),
        );

        let transport = StreamTransport::new(self.service.clone());
        match transport.serve(inbound, outbound, record_event).await {
            Ok(()) => tracing::debug!("session closed"),
            Err(e) => tracing::debug!("session ended: {e}"),
        }
    }
}

/// Keeps the in-flight session count accurate however the session ends.
struct SessionGuard {
    sessions: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn open(sessions: Arc<AtomicUsize>) -> Self {
        sessions.fetch_add(1, Ordering::AcqRel);
        session_opened();
        Self { sessions }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::AcqRel);
        session_closed();
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.service.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    ws.on_upgrade(move |socket| state.run_session(socket))
}

async fn healthz(State(state): State<AppState>) -> Response {
    if state.service.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    } else {
        "ok".into_response()
    }
}
