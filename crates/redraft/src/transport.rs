//! Client sessions over a bidirectional stream of text frames.
//!
//! A [`StreamTransport`] binds one client connection to the [`JobService`].
//! The connection is any `Stream<Item = String>` of inbound frames plus any
//! `Sink<String>` for outbound frames, so the same session logic serves a
//! WebSocket in the server binary and in-memory channels in tests.
//!
//! Per session:
//! - at most one job is active; a second `start_job` is answered with an
//!   `error` frame,
//! - outbound events are forwarded in emission order, and pending events are
//!   always flushed before the next inbound frame is handled,
//! - after a terminal event the session stays open for a new job,
//! - when the client goes away the active job is aborted.

use crate::{
    error::{Error, Result},
    generation::TextGenerator,
    protocol::{ClientMessage, ServerMessage},
    service::{JobHandle, JobService},
};
use core::fmt::Display;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

pub struct StreamTransport<G> {
    service: JobService<G>,
}

impl<G: TextGenerator> StreamTransport<G> {
    pub const fn new(service: JobService<G>) -> Self {
        Self { service }
    }

    /// Runs the session until the client disconnects, or until the service
    /// shuts down and no job is left running. `on_event` sees every outbound
    /// event before it is written, and also the events of a job aborted
    /// because the session closed, up to its `job_aborted`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if writing to `outbound` fails. The
    /// active job, if any, is aborted first.
    pub async fn serve<I, O, F>(&self, mut inbound: I, mut outbound: O, mut on_event: F) -> Result<()>
    where
        I: Stream<Item = String> + Unpin,
        O: Sink<String> + Unpin,
        O::Error: Display,
        F: FnMut(&ServerMessage),
    {
        let (events_tx, mut events_rx) = mpsc::channel::<ServerMessage>(self.service.config().event_buffer_size);
        let shutdown = self.service.shutdown_token();
        let mut active: Option<JobHandle> = None;

        let result = loop {
            let step = tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    if event.is_terminal() {
                        active = None;
                    }
                    on_event(&event);
                    send(&mut outbound, &event).await
                }
                frame = inbound.next() => match frame {
                    Some(frame) => {
                        match self.handle_frame(&frame, &mut active, &events_tx) {
                            Some(reply) => {
                                on_event(&reply);
                                send(&mut outbound, &reply).await
                            }
                            None => Ok(()),
                        }
                    }
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Client closed the session");
                        break Ok(());
                    }
                },
                () = shutdown.cancelled(), if active.is_none() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Closing idle session for shutdown");
                    break Ok(());
                }
            };
            if let Err(e) = step {
                break Err(e);
            }
        };

        if let Some(job) = active.take() {
            if job.abort() {
                #[cfg(feature = "tracing")]
                tracing::info!(job_id = job.id(), "Aborting job of a closed session");
            }
            // The job ends once its coordinator drops the last sender. Its
            // remaining events, the terminal one included, reach the observer
            // but are not written.
            drop(events_tx);
            while let Some(event) = events_rx.recv().await {
                on_event(&event);
            }
        }
        result
    }

    /// Applies one inbound frame and returns the immediate reply, if any.
    fn handle_frame(
        &self,
        frame: &str,
        active: &mut Option<JobHandle>,
        events: &mpsc::Sender<ServerMessage>,
    ) -> Option<ServerMessage> {
        let message = match ClientMessage::from_json(frame) {
            Ok(message) => message,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Rejecting inbound frame");
                return Some(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        };

        match message {
            ClientMessage::StartJob {
                text,
                custom_instructions,
                length_mode,
            } => {
                if let Some(job) = active.as_ref() {
                    return Some(ServerMessage::Error {
                        message: format!("Job {} is still running", job.id()),
                    });
                }
                match self
                    .service
                    .start_job(text, custom_instructions, length_mode, events.clone())
                {
                    Ok(job) => {
                        *active = Some(job);
                        None
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::info!(error = %e, "Job rejected");
                        Some(ServerMessage::Error {
                            message: e.to_string(),
                        })
                    }
                }
            }
            ClientMessage::AbortJob { job_id } => {
                match active.as_ref() {
                    Some(job) if job.id() == job_id => {
                        #[cfg(feature = "tracing")]
                        tracing::info!(job_id, "Abort requested");
                        job.abort();
                    }
                    _ => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(job_id, "Ignoring abort for a job that is not running");
                    }
                }
                None
            }
        }
    }
}

async fn send<O>(outbound: &mut O, message: &ServerMessage) -> Result<()>
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let frame = message.to_json()?;
    outbound.send(frame).await.map_err(|e| Error::ChannelError {
        context: format!("failed to write {} frame: {e}", message.kind()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{JobConfig, SkeletonMode},
        testing::{ScriptedGenerator, Step, document},
    };
    use futures::channel::mpsc as frames;
    use serde_json::json;
    use tokio::task::JoinHandle;

    struct Session {
        inbound: frames::UnboundedSender<String>,
        outbound: frames::UnboundedReceiver<String>,
        task: JoinHandle<Result<()>>,
        service: JobService<ScriptedGenerator>,
    }

    impl Session {
        fn open(generator: ScriptedGenerator) -> Self {
            let config = JobConfig {
                skeleton_mode: SkeletonMode::Off,
                ..JobConfig::default()
            };
            let service = JobService::new(config, generator).unwrap();
            let (inbound, inbound_rx) = frames::unbounded();
            let (outbound_tx, outbound) = frames::unbounded();

            let transport = StreamTransport::new(service.clone());
            let task = tokio::spawn(async move { transport.serve(inbound_rx, outbound_tx, |_| {}).await });
            Self {
                inbound,
                outbound,
                task,
                service,
            }
        }

        fn send(&self, frame: serde_json::Value) {
            self.inbound.unbounded_send(frame.to_string()).unwrap();
        }

        fn start(&self, words: usize) {
            self.send(json!({"type": "start_job", "text": document(words)}));
        }

        async fn recv(&mut self) -> ServerMessage {
            let frame = self.outbound.next().await.unwrap();
            serde_json::from_str(&frame).unwrap()
        }

        async fn recv_until_terminal(&mut self) -> Vec<ServerMessage> {
            let mut events = Vec::new();
            loop {
                let event = self.recv().await;
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    return events;
                }
            }
        }
    }

    #[tokio::test]
    async fn runs_a_job_end_to_end() {
        let mut session = Session::open(ScriptedGenerator::new());
        session.send(json!({
            "type": "start_job",
            "text": document(2000),
            "customInstructions": "Plain English.",
            "lengthMode": "expand"
        }));

        let events = session.recv_until_terminal().await;
        assert!(matches!(
            events[0],
            ServerMessage::JobStarted {
                job_id: 1,
                total_chunks: 2,
                target_words: 2600,
                ..
            }
        ));
        let chunk_indices: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ServerMessage::ChunkComplete { chunk_index, .. } => Some(*chunk_index),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_indices, [0, 1]);
        assert!(matches!(
            events.last(),
            Some(ServerMessage::JobComplete {
                final_word_count: 2600,
                target_words: 2600,
                ..
            })
        ));

        drop(session.inbound);
        session.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rejects_ineligible_documents_and_stays_open() {
        let mut session = Session::open(ScriptedGenerator::new());
        session.start(100);
        assert_eq!(
            session.recv().await,
            ServerMessage::Error {
                message: "Document is too short: 100 words (minimum is 500)".to_string()
            }
        );

        session.start(20_001);
        assert!(matches!(session.recv().await, ServerMessage::Error { message } if message.starts_with("Document is too long")));

        session.start(1000);
        assert!(matches!(
            session.recv().await,
            ServerMessage::JobStarted { job_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn reports_malformed_frames() {
        let mut session = Session::open(ScriptedGenerator::new());
        session.inbound.unbounded_send("{not json".to_string()).unwrap();
        assert!(matches!(session.recv().await, ServerMessage::Error { message } if message.starts_with("Invalid message")));

        session.send(json!({"type": "resume_job"}));
        assert!(matches!(session.recv().await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn one_job_at_a_time_and_targeted_abort() {
        let mut session = Session::open(ScriptedGenerator::new().script(0, [Step::Hang]));
        session.start(1000);
        assert!(matches!(
            session.recv().await,
            ServerMessage::JobStarted { job_id: 1, .. }
        ));
        // "Processing 1 chunks"
        assert!(matches!(session.recv().await, ServerMessage::Progress { .. }));

        session.start(1000);
        assert_eq!(
            session.recv().await,
            ServerMessage::Error {
                message: "Job 1 is still running".to_string()
            }
        );

        session.send(json!({"type": "abort_job", "jobId": 99}));
        session.send(json!({"type": "abort_job", "jobId": 1}));
        assert_eq!(
            session.recv().await,
            ServerMessage::JobAborted {
                completed_chunks: 0,
                total_chunks: 1
            }
        );

        // a stale abort changes nothing and a new job may start
        session.send(json!({"type": "abort_job", "jobId": 1}));
        session.start(1000);
        assert!(matches!(
            session.recv().await,
            ServerMessage::JobStarted { job_id: 2, .. }
        ));
    }

    #[tokio::test]
    async fn closing_the_session_aborts_its_job() {
        let session = Session::open(ScriptedGenerator::new().script(0, [Step::Hang]));
        let Session {
            inbound,
            mut outbound,
            task,
            ..
        } = session;
        inbound
            .unbounded_send(json!({"type": "start_job", "text": document(1000)}).to_string())
            .unwrap();
        let started: ServerMessage = serde_json::from_str(&outbound.next().await.unwrap()).unwrap();
        assert!(matches!(started, ServerMessage::JobStarted { .. }));

        drop(inbound);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn observer_sees_the_abort_of_an_abandoned_job() {
        let config = JobConfig {
            skeleton_mode: SkeletonMode::Off,
            ..JobConfig::default()
        };
        let generator = ScriptedGenerator::new().script(0, [Step::Hang]);
        let service = JobService::new(config, generator).unwrap();
        let (inbound, inbound_rx) = frames::unbounded();
        let (outbound_tx, mut outbound_rx) = frames::unbounded::<String>();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let transport = StreamTransport::new(service);
        let task = tokio::spawn(async move {
            transport
                .serve(inbound_rx, outbound_tx, |event| {
                    let _ = seen_tx.send(event.clone());
                })
                .await
        });

        inbound
            .unbounded_send(json!({"type": "start_job", "text": document(1000)}).to_string())
            .unwrap();
        let started: ServerMessage = serde_json::from_str(&outbound_rx.next().await.unwrap()).unwrap();
        assert!(matches!(started, ServerMessage::JobStarted { .. }));

        drop(inbound);
        task.await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = seen_rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.last(),
            Some(&ServerMessage::JobAborted {
                completed_chunks: 0,
                total_chunks: 1
            })
        );
        assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);

        // nothing after job_started was written to the departed client
        let mut written = Vec::new();
        while let Ok(Some(frame)) = outbound_rx.try_next() {
            written.push(frame);
        }
        assert!(written.iter().all(|frame| !frame.contains("job_aborted")));
    }

    #[tokio::test]
    async fn shutdown_aborts_the_job_then_closes() {
        let mut session = Session::open(ScriptedGenerator::new().script(0, [Step::Hang]));
        session.start(1000);
        assert!(matches!(
            session.recv().await,
            ServerMessage::JobStarted { .. }
        ));

        session.service.shutdown();
        let events = session.recv_until_terminal().await;
        assert!(matches!(
            events.last(),
            Some(ServerMessage::JobAborted { .. })
        ));
        session.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_writes_end_the_session() {
        let config = JobConfig {
            skeleton_mode: SkeletonMode::Off,
            ..JobConfig::default()
        };
        let service = JobService::new(config, ScriptedGenerator::new().script(0, [Step::Hang])).unwrap();
        let (inbound, inbound_rx) = frames::unbounded();
        let (outbound_tx, outbound_rx) = frames::unbounded::<String>();
        drop(outbound_rx);

        inbound
            .unbounded_send(json!({"type": "start_job", "text": document(1000)}).to_string())
            .unwrap();
        let err = StreamTransport::new(service)
            .serve(inbound_rx, outbound_tx, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelError { .. }));
    }

    #[tokio::test]
    async fn observer_sees_every_outbound_event() {
        let config = JobConfig {
            skeleton_mode: SkeletonMode::Off,
            ..JobConfig::default()
        };
        let service = JobService::new(config, ScriptedGenerator::new()).unwrap();
        let (inbound, inbound_rx) = frames::unbounded();
        let (outbound_tx, mut outbound_rx) = frames::unbounded::<String>();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let transport = StreamTransport::new(service);
        let task = tokio::spawn(async move {
            transport
                .serve(inbound_rx, outbound_tx, |event| {
                    let _ = seen_tx.send(event.kind());
                })
                .await
        });

        inbound
            .unbounded_send(json!({"type": "start_job", "text": document(1000)}).to_string())
            .unwrap();
        let mut written = Vec::new();
        loop {
            let event: ServerMessage = serde_json::from_str(&outbound_rx.next().await.unwrap()).unwrap();
            written.push(event.kind());
            if event.is_terminal() {
                break;
            }
        }
        drop(inbound);
        task.await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Ok(kind) = seen_rx.try_recv() {
            seen.push(kind);
        }
        assert_eq!(seen, written);
    }
}
