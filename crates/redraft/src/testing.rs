//! Test doubles shared by the in-crate test modules.

use crate::{
    generation::{GenerationError, GenerationRequest, TextGenerator},
    protocol::ServerMessage,
};
use core::{future::Future, time::Duration};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted response.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Return this many words immediately.
    Words(usize),
    /// Return this many words after a delay.
    WordsAfter(Duration, usize),
    /// Fail with a backend error.
    Fail,
    /// Return whitespace only.
    Empty,
    /// Never resolve.
    Hang,
}

/// A generator that replays queued [`Step`]s per chunk (or for the skeleton
/// call) and answers exactly on target once a queue runs dry.
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    scripts: Mutex<HashMap<Option<usize>, VecDeque<Step>>>,
    prompts: Mutex<Vec<(Option<usize>, String)>>,
}

impl ScriptedGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(self, chunk: usize, steps: impl IntoIterator<Item = Step>) -> Self {
        self.push(Some(chunk), steps)
    }

    pub(crate) fn skeleton(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.push(None, steps)
    }

    fn push(self, key: Option<usize>, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .extend(steps);
        self
    }

    /// Number of generation calls made for `chunk`.
    pub(crate) fn attempts(&self, chunk: usize) -> usize {
        self.prompts_for(Some(chunk)).len()
    }

    pub(crate) fn prompts_for(&self, key: Option<usize>) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send {
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.chunk_index)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Words(request.target_words));
        self.prompts
            .lock()
            .unwrap()
            .push((request.chunk_index, request.prompt));

        async move {
            match step {
                Step::Words(n) => Ok(words(n)),
                Step::WordsAfter(delay, n) => {
                    tokio::time::sleep(delay).await;
                    Ok(words(n))
                }
                Step::Fail => Err(GenerationError::Backend("scripted failure".to_string())),
                Step::Empty => Ok(" \n ".to_string()),
                Step::Hang => core::future::pending().await,
            }
        }
    }
}

/// `n` words of filler ending in a full stop.
pub(crate) fn words(n: usize) -> String {
    let mut text = vec!["word"; n].join(" ");
    if n > 0 {
        text.push('.');
    }
    text
}

/// A document of `words` words in ten-word sentences.
pub(crate) fn document(words: usize) -> String {
    (0..words)
        .map(|i| {
            if i % 10 == 9 {
                format!("s{i}.")
            } else {
                format!("s{i}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Receives events until (and including) the first terminal one.
pub(crate) async fn collect_until_terminal(
    rx: &mut mpsc::Receiver<ServerMessage>,
) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
