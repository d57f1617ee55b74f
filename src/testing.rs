//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{Clock, CompletionBackend};
use crate::embeddings::EmbeddingProvider;
use crate::error::{BackendError, EmbeddingError};

/// Write `rows` as a version 1, little-endian `f4`, C-order `.npy` file.
pub fn write_npy(path: &Path, rows: &[Vec<f32>]) {
    let cols = rows.first().map(Vec::len).unwrap_or(0);
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows.len(),
        cols
    );
    // magic(6) + version(2) + header_len(2) + header + '\n' must be a multiple of 64
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"\x93NUMPY");
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for row in rows {
        for value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    fs::write(path, bytes).unwrap();
}

/// Deterministic bag-of-bytes embedder.
pub struct HashEmbedder {
    pub dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[(byte as usize + i) % self.dimension] += 1.0;
        }
        Ok(vector)
    }
}

/// Embedder whose model never loads.
pub struct BrokenEmbedder;

impl EmbeddingProvider for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Load("model weights missing".into()))
    }
}

enum Script {
    Queue(VecDeque<Result<String, BackendError>>),
    Always(Result<String, BackendError>),
    Hang,
}

/// Completion backend that replays canned outcomes and records every prompt.
pub struct ScriptedBackend {
    script: Mutex<Script>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Replay `outcomes` in order; once exhausted every call fails.
    pub fn new(outcomes: Vec<Result<String, BackendError>>) -> Self {
        Self::with_script(Script::Queue(outcomes.into()))
    }

    pub fn always(outcome: Result<String, BackendError>) -> Self {
        Self::with_script(Script::Always(outcome))
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, BackendError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let outcome = match &mut *self.script.lock().unwrap() {
            Script::Queue(queue) => Some(
                queue
                    .pop_front()
                    .unwrap_or_else(|| Err(BackendError::Api("script exhausted".into()))),
            ),
            Script::Always(outcome) => Some(outcome.clone()),
            Script::Hang => None,
        };
        match outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

/// Clock that records requested sleeps and returns immediately.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
