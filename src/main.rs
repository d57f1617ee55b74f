//! Main module for the ragchart CLI application.
//!
//! This module provides the main function for the binary. It handles command
//! parsing, configuration loading, and initialization, and dispatches to the
//! library for the actual work.
//!
//! # Examples
//!
//! Writing a default configuration, then serving:
//!
//! ```sh
//! ragchart init
//! ragchart serve --bind 0.0.0.0:8000
//! ```
//!
//! Asking a one-off question:
//!
//! ```sh
//! ragchart query "robbery downtown" -c pie
//! ```

use std::{error::Error, fs, path::PathBuf};

use clap::Parser;
use once_cell::sync::OnceCell;
use ragchart::{
    commands::{Cli, Commands},
    config::{self, RagConfig},
    config_dir,
    history::{HistoryEntry, HistorySink, SqliteHistory},
    pipeline::RetrievalPipeline,
    server,
};
use tracing::{debug, info};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the ragchart CLI application.
///
/// Loads configuration, parses command-line arguments, and executes the
/// appropriate command.
///
/// # Errors
///
/// Returns an error if there is an issue loading the configuration or
/// executing the specified command. Corpus and model problems surface here
/// before any traffic is served.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            debug!("Initializing configuration");
            init(cli.config)?;
        }
        Commands::Serve { bind } => {
            let config = load(cli.config)?;
            server::serve(&config, bind).await?;
        }
        Commands::Query {
            query,
            chart_type,
            user,
        } => {
            let config = load(cli.config)?;
            ask(&config, query, chart_type, user).await?;
        }
        Commands::History { email, page } => {
            let config = load(cli.config)?;
            let store = SqliteHistory::open(config.history_db_url.clone()).await?;
            let page_size = config.history_page_size.max(1);
            let offset = page.map(|page| page.saturating_mul(page_size));
            let rows = store.list(&email, offset, page_size).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

/// Load the config from `path`, or from `config.yaml` in the platform config directory.
fn load(path: Option<PathBuf>) -> Result<RagConfig, Box<dyn Error>> {
    let config_path = match path {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };
    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(&config_path.to_string_lossy())?;
    debug!("Config loaded: {:?}", config);
    Ok(config)
}

/// Run one query through the pipeline and print the response.
async fn ask(
    config: &RagConfig,
    query: String,
    chart_type: Option<String>,
    user: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let pipeline = RetrievalPipeline::from_config(config)?;
    let response = pipeline.answer(&query, chart_type.as_deref()).await?;

    match serde_json::to_value(&response)? {
        serde_json::Value::String(text) => println!("{text}"),
        document => println!("{}", serde_json::to_string_pretty(&document)?),
    }

    if let Some(user_email) = user {
        let store = SqliteHistory::open(config.history_db_url.clone()).await?;
        store
            .record(HistoryEntry {
                user_email,
                user_query: query,
                response: response.history_text()?,
            })
            .await?;
    }

    Ok(())
}

/// Initializes the application's configuration.
///
/// Writes a default `config.yaml`, either at `target` or in the platform
/// configuration directory. An existing file is left untouched.
///
/// # Errors
///
/// Returns an error if there is an issue creating the directories or files, or
/// serializing the configuration to YAML.
fn init(target: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let config_path = match target {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };
    if config_path.exists() {
        info!("Config file already exists: {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    info!("Creating config file: {}", config_path.display());
    let config = RagConfig::with_defaults("embeddings.npy".into(), "metadata.json".into());
    let config_yaml = serde_yaml::to_string(&config)?;
    fs::write(&config_path, config_yaml)?;
    println!("Wrote {}", config_path.display());

    Ok(())
}
