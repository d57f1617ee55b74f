//! # ragchart (library root)
//!
//! Semantic search over a precomputed corpus that answers either with a chart
//! document or with a grounded explanation written by a chat model.
//!
//! This crate provides the core plumbing for the **ragchart** service and CLI:
//! - Corpus loading and nearest-neighbour search (`corpus`, `vector_store`).
//! - Query embeddings with a CPU sentence-embedding model (`embeddings`).
//! - The retrying chat-completion client (`api`).
//! - Prompt construction, chart validation and formatting (`prompt`, `chart`).
//! - The orchestrating retrieval pipeline (`pipeline`).
//! - History persistence in SQLite (`history`, `models`, `schema`).
//! - The HTTP surface and CLI (`server`, `commands`).
//! - Configuration and the error taxonomy (`config`, `error`).
//!
//! ## Request flow
//!
//! ```text
//! query ─► embed ─► search ─► chart hint? ─┬─ bar/line/pie ─► chart prompt ─► model ─► validate ─► format
//!                                          └─ otherwise ────► explanation prompt ─► model ─► text
//! ```
//!
//! ## Configuration discovery
//! By default the configuration lives under your per-platform config directory, e.g.:
//!
//! - macOS: `~/Library/Application Support/com.ragchart.ragchart/config.yaml`
//! - Linux (XDG): `~/.config/ragchart/config.yaml`
//! - Windows: `C:\Users\<you>\AppData\Roaming\ragchart\ragchart\config\config.yaml`
//!
//! ## Modules
//! - [`api`], [`chart`], [`commands`], [`config`], [`corpus`], [`embeddings`],
//!   [`error`], [`history`], [`models`], [`pipeline`], [`prompt`], [`schema`],
//!   [`server`], [`vector_store`]

use directories::ProjectDirs;
use std::error::Error;

pub mod api;
pub mod chart;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod server;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::RagError;
pub use pipeline::{QueryResponse, RetrievalPipeline};

/// Return the per-platform configuration directory used by ragchart.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "ragchart", "ragchart")`.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```no_run
/// let cfg = ragchart::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "ragchart", "ragchart")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
