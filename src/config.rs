//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `RagConfig` struct, which holds every tunable of the service,
//! and a `load_config` function to load the configuration from a YAML file.
//! The configuration is built once at startup and handed by reference to each
//! component constructor.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use ragchart::config::{RagConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: RagConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config);
//! ```

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::PathBuf, time::Duration};
use tracing::debug;

use crate::api::RetryPolicy;
use crate::error::HistoryError;

/// Represents the application's configuration.
///
/// Only `api_key`, `embeddings_path` and `metadata_path` are required; every
/// other field has a default so a minimal file is enough to start serving.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RagConfig {
    /// The API key used to authenticate requests to the generative model.
    pub api_key: String,

    /// The base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// The chat model used for chart and explanation generation.
    #[serde(default = "default_model")]
    pub model: String,

    /// System instruction sent with every completion request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    // Per-attempt timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Pause between failed attempts.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    // Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    // Overall budget for one query, retries included.
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: Option<u64>,

    // Completion token cap.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// `.npy` matrix with one embedding per row.
    pub embeddings_path: PathBuf,

    /// JSON-lines metadata file, line `i` describing row `i` of the matrix.
    pub metadata_path: PathBuf,

    /// Hugging Face model id of the sentence embedding model.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_revision")]
    pub embedding_revision: String,

    /// Local directory holding `config.json`, `tokenizer.json` and
    /// `model.safetensors`. When set the hub is never contacted.
    #[serde(default)]
    pub embedding_model_dir: Option<PathBuf>,

    // Neighbours fetched per query.
    #[serde(default = "default_search_k")]
    pub search_k: usize,

    // Hits placed in a chart prompt.
    #[serde(default = "default_chart_context_hits")]
    pub chart_context_hits: usize,

    // Hits placed in an explanation prompt.
    #[serde(default = "default_text_context_hits")]
    pub text_context_hits: usize,

    // cl100k token ceiling for a rendered prompt.
    #[serde(default)]
    pub max_prompt_tokens: Option<usize>,

    // History database url (SQLite)
    #[serde(default = "default_history_db_url")]
    pub history_db_url: String,

    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,

    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

pub(crate) fn default_system_prompt() -> String {
    "You are an assistant to generate either chart visualization data or summary for queries."
        .to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_max_attempts() -> usize {
    3
}

fn default_request_deadline_secs() -> Option<u64> {
    Some(240)
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_embedding_revision() -> String {
    "main".to_string()
}

fn default_search_k() -> usize {
    20
}

fn default_chart_context_hits() -> usize {
    20
}

fn default_text_context_hits() -> usize {
    5
}

fn default_history_db_url() -> String {
    "history.db".to_string()
}

fn default_history_page_size() -> usize {
    5
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl RagConfig {
    /// A configuration with every default applied and placeholder credentials.
    ///
    /// Used by `ragchart init` to seed a config file.
    pub fn with_defaults(embeddings_path: PathBuf, metadata_path: PathBuf) -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: default_api_base(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            max_attempts: default_max_attempts(),
            request_deadline_secs: default_request_deadline_secs(),
            max_tokens: None,
            embeddings_path,
            metadata_path,
            embedding_model: default_embedding_model(),
            embedding_revision: default_embedding_revision(),
            embedding_model_dir: None,
            search_k: default_search_k(),
            chart_context_hits: default_chart_context_hits(),
            text_context_hits: default_text_context_hits(),
            max_prompt_tokens: None,
            history_db_url: default_history_db_url(),
            history_page_size: default_history_page_size(),
            bind: default_bind(),
        }
    }

    /// Retry policy for the generative client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_secs(self.retry_delay_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    /// Overall per-query deadline, if any.
    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(Duration::from_secs)
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(RagConfig)`: The loaded configuration.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
pub fn load_config(file: &str) -> Result<RagConfig, Box<dyn Error>> {
    debug!("Loading config from {}", file);
    let content = fs::read_to_string(file)?;
    let config: RagConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Open a connection to the SQLite history database.
pub fn establish_connection(db_url: &str) -> Result<SqliteConnection, HistoryError> {
    SqliteConnection::establish(db_url).map_err(|source| HistoryError::Connection {
        url: db_url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com"
model: "example_model"
embeddings_path: "embeddings.npy"
metadata_path: "metadata.json"
history_db_url: "rc.db"
search_k: 10
max_prompt_tokens: 4096
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.embeddings_path, PathBuf::from("embeddings.npy"));
        assert_eq!(config.history_db_url, "rc.db");
        assert_eq!(config.search_k, 10);
        assert_eq!(config.max_prompt_tokens, Some(4096));
    }

    #[test]
    fn test_load_config_applies_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "k"
embeddings_path: "e.npy"
metadata_path: "m.json"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.search_k, 20);
        assert_eq!(config.chart_context_hits, 20);
        assert_eq!(config.text_context_hits, 5);
        assert_eq!(config.request_deadline(), Some(Duration::from_secs(240)));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(10));
        assert_eq!(policy.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_retry_policy_never_has_zero_attempts() {
        let mut config = RagConfig::with_defaults("e.npy".into(), "m.json".into());
        config.max_attempts = 0;
        assert_eq!(config.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_defaults_round_trip_through_yaml() {
        let config = RagConfig::with_defaults("e.npy".into(), "m.json".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: RagConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(config.is_err());
    }
}
