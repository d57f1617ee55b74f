//! # Error taxonomy
//!
//! Every failure the service can produce is classified here. The
//! [`RagError`] enum is the only error type that crosses the
//! [`RetrievalPipeline`](crate::pipeline::RetrievalPipeline) boundary; lower
//! level failures ([`BackendError`], [`EmbeddingError`]) are converted before
//! they reach a caller.
//!
//! Startup problems with the corpus files are reported as [`CorpusError`] and
//! abort the process before any traffic is served.
//!
//! Malformed model output is not in this module: it is a
//! regular value ([`MalformedOutput`](crate::chart::MalformedOutput)) that the
//! pipeline turns into the "no chart data" response.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the retrieval pipeline to its callers.
#[derive(Error, Debug)]
pub enum RagError {
    /// The query could not be embedded, so no search is possible.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The query vector did not fit the index.
    #[error("search failed: {0}")]
    Search(String),

    /// Every attempt against the generative model failed.
    #[error("generative model unavailable after {attempts} attempt(s): {last_error}")]
    GenerationUnavailable {
        attempts: usize,
        last_error: BackendError,
    },

    /// The overall per-request deadline elapsed.
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

/// Fatal problems while loading the embedding matrix and metadata at startup.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid matrix file {path}: {reason}")]
    Npy { path: PathBuf, reason: String },

    #[error("invalid metadata on line {line}: {source}")]
    Metadata {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedding matrix has {rows} rows but metadata has {records} records")]
    RowCountMismatch { rows: usize, records: usize },

    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("index construction failed: {0}")]
    Index(String),
}

/// Loading or running the sentence embedding model failed.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("failed to load embedding model: {0}")]
    Load(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),
}

/// One failed attempt against the generative model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote error: {0}")]
    Api(String),

    #[error("model returned an empty completion")]
    EmptyResponse,
}

/// History store failures.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("failed to connect to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: diesel::ConnectionError,
    },

    #[error("history query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("history task failed: {0}")]
    Task(String),
}
