//! JSON wire protocol between a client session and the job service.
//!
//! Every frame is a JSON object with a `type` tag in `snake_case` and
//! `camelCase` fields:
//!
//! ```json
//! {"type":"start_job","text":"...","customInstructions":"Keep it formal.","lengthMode":"condense"}
//! {"type":"abort_job","jobId":3}
//! {"type":"chunk_complete","chunkIndex":0,"chunkText":"...","actualWords":1012, ...}
//! ```

use crate::{
    chunk::{Chunk, ChunkStatus},
    config::LengthMode,
    error::{Error, Result},
    job::{JobId, JobPhase},
};
use serde::{Deserialize, Serialize};

/// Control messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    StartJob {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_instructions: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length_mode: Option<LengthMode>,
    },
    AbortJob {
        job_id: JobId,
    },
}

impl ClientMessage {
    /// Decodes one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] for malformed JSON or an unknown
    /// message type.
    pub fn from_json(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Error::InvalidMessage {
            reason: e.to_string(),
        })
    }
}

/// Lifecycle and progress events sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    JobStarted {
        job_id: JobId,
        total_chunks: usize,
        input_words: usize,
        target_words: usize,
        length_mode: LengthMode,
    },
    Progress {
        phase: JobPhase,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_chunks: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        words_processed: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        projected_final: Option<usize>,
        /// Seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        estimated_remaining: Option<u64>,
    },
    ChunkComplete {
        chunk_index: usize,
        chunk_text: String,
        actual_words: usize,
        target_words: usize,
        min_words: usize,
        max_words: usize,
        status: ChunkStatus,
        running_total: usize,
        projected_final: usize,
        total_chunks: usize,
    },
    Warning {
        message: String,
    },
    JobComplete {
        final_output: String,
        final_word_count: usize,
        target_words: usize,
        /// Seconds.
        time_elapsed: f64,
    },
    JobFailed {
        error: String,
    },
    JobAborted {
        completed_chunks: usize,
        total_chunks: usize,
    },
    /// Session-level problem not tied to a running job.
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// A `progress` event carrying only a phase and a message.
    pub fn phase(phase: JobPhase, message: impl Into<String>) -> Self {
        Self::Progress {
            phase,
            message: message.into(),
            completed_chunks: None,
            words_processed: None,
            projected_final: None,
            estimated_remaining: None,
        }
    }

    pub fn chunk_complete(
        chunk: &Chunk,
        running_total: usize,
        projected_final: usize,
        total_chunks: usize,
    ) -> Self {
        Self::ChunkComplete {
            chunk_index: chunk.index,
            chunk_text: chunk.result_text.clone().unwrap_or_default(),
            actual_words: chunk.actual_words,
            target_words: chunk.target_words,
            min_words: chunk.min_words,
            max_words: chunk.max_words,
            status: chunk.status,
            running_total,
            projected_final,
            total_chunks,
        }
    }

    /// `true` for the events that end a job.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobComplete { .. } | Self::JobFailed { .. } | Self::JobAborted { .. }
        )
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::Progress { .. } => "progress",
            Self::ChunkComplete { .. } => "chunk_complete",
            Self::Warning { .. } => "warning",
            Self::JobComplete { .. } => "job_complete",
            Self::JobFailed { .. } => "job_failed",
            Self::JobAborted { .. } => "job_aborted",
            Self::Error { .. } => "error",
        }
    }

    /// Encodes the event as one outbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMessage {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn encoded(message: &ServerMessage) -> Value {
        serde_json::from_str(&message.to_json().unwrap()).unwrap()
    }

    #[test]
    fn decodes_start_job() {
        let message = ClientMessage::from_json(
            r#"{"type":"start_job","text":"Some text.","customInstructions":"Be brief.","lengthMode":"condense"}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ClientMessage::StartJob {
                text: "Some text.".to_string(),
                custom_instructions: Some("Be brief.".to_string()),
                length_mode: Some(LengthMode::Condense),
            }
        );

        let minimal = ClientMessage::from_json(r#"{"type":"start_job","text":"x"}"#).unwrap();
        assert_eq!(
            minimal,
            ClientMessage::StartJob {
                text: "x".to_string(),
                custom_instructions: None,
                length_mode: None,
            }
        );
    }

    #[test]
    fn decodes_abort_job() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"abort_job","jobId":42}"#).unwrap(),
            ClientMessage::AbortJob { job_id: 42 }
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        for frame in [
            "not json",
            r#"{"type":"pause_job"}"#,
            r#"{"type":"abort_job"}"#,
            r#"{"type":"start_job","text":"x","lengthMode":"double"}"#,
        ] {
            assert!(
                matches!(
                    ClientMessage::from_json(frame),
                    Err(Error::InvalidMessage { .. })
                ),
                "{frame}"
            );
        }
    }

    #[test]
    fn encodes_job_started() {
        let message = ServerMessage::JobStarted {
            job_id: 1,
            total_chunks: 10,
            input_words: 10_000,
            target_words: 7_000,
            length_mode: LengthMode::Condense,
        };
        assert_eq!(
            encoded(&message),
            json!({
                "type": "job_started",
                "jobId": 1,
                "totalChunks": 10,
                "inputWords": 10000,
                "targetWords": 7000,
                "lengthMode": "condense"
            })
        );
    }

    #[test]
    fn progress_omits_absent_fields() {
        let message = ServerMessage::phase(JobPhase::SkeletonExtraction, "Extracting outline");
        assert_eq!(
            encoded(&message),
            json!({
                "type": "progress",
                "phase": "skeleton_extraction",
                "message": "Extracting outline"
            })
        );

        let message = ServerMessage::Progress {
            phase: JobPhase::ChunkProcessing,
            message: "Chunk 1 of 3 complete".to_string(),
            completed_chunks: Some(1),
            words_processed: Some(980),
            projected_final: Some(2940),
            estimated_remaining: Some(12),
        };
        assert_eq!(
            encoded(&message),
            json!({
                "type": "progress",
                "phase": "chunk_processing",
                "message": "Chunk 1 of 3 complete",
                "completedChunks": 1,
                "wordsProcessed": 980,
                "projectedFinal": 2940,
                "estimatedRemaining": 12
            })
        );
    }

    #[test]
    fn encodes_chunk_complete() {
        let mut chunk = Chunk::new(
            4,
            "src".to_string(),
            1,
            1000,
            crate::config::WordBand { min: 900, max: 1100 },
        );
        chunk
            .finish("out".to_string(), 930, ChunkStatus::PassedAfterRetry)
            .unwrap();

        assert_eq!(
            encoded(&ServerMessage::chunk_complete(&chunk, 4930, 9930, 10)),
            json!({
                "type": "chunk_complete",
                "chunkIndex": 4,
                "chunkText": "out",
                "actualWords": 930,
                "targetWords": 1000,
                "minWords": 900,
                "maxWords": 1100,
                "status": "passed_after_retry",
                "runningTotal": 4930,
                "projectedFinal": 9930,
                "totalChunks": 10
            })
        );
    }

    #[test]
    fn encodes_terminal_events() {
        let complete = ServerMessage::JobComplete {
            final_output: "done".to_string(),
            final_word_count: 1,
            target_words: 1,
            time_elapsed: 1.5,
        };
        assert!(complete.is_terminal());
        assert_eq!(
            encoded(&complete),
            json!({
                "type": "job_complete",
                "finalOutput": "done",
                "finalWordCount": 1,
                "targetWords": 1,
                "timeElapsed": 1.5
            })
        );

        let aborted = ServerMessage::JobAborted {
            completed_chunks: 2,
            total_chunks: 10,
        };
        assert!(aborted.is_terminal());
        assert_eq!(
            encoded(&aborted),
            json!({"type": "job_aborted", "completedChunks": 2, "totalChunks": 10})
        );

        let failed = ServerMessage::JobFailed {
            error: "boom".to_string(),
        };
        assert_eq!(encoded(&failed), json!({"type": "job_failed", "error": "boom"}));

        let error = ServerMessage::Error {
            message: "bad".to_string(),
        };
        assert!(!error.is_terminal());
        assert_eq!(error.kind(), "error");
        assert_eq!(encoded(&error), json!({"type": "error", "message": "bad"}));
    }
}
