//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! Parsing command-line arguments:
//!
//! ```no_run
//! use clap::Parser;
//! use ragchart::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Serve { bind } => println!("serving on {bind:?}"),
//!     Commands::Query { query, .. } => println!("asking {query}"),
//!     Commands::History { email, .. } => println!("history of {email}"),
//!     Commands::Init => println!("writing default config"),
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Configuration file. Defaults to `config.yaml` in the platform config directory.
    #[arg(long, short = 'C', global = true, env = "RAGCHART_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Run the HTTP service.
    #[clap(name = "serve", alias = "s")]
    Serve {
        /// Address to bind (host:port); overrides `bind` from the config file.
        #[arg(long, env = "RAGCHART_BIND")]
        bind: Option<String>,
    },

    /// Answer a single query and print the result.
    ///
    /// Prints the chart document as JSON when a supported chart type is
    /// given, otherwise the explanation text.
    #[clap(name = "query", alias = "q")]
    Query {
        /// The free-text query.
        query: String,

        /// `bar`, `line` or `pie`; anything else produces an explanation.
        #[arg(name = "chart_type", short = 'c', long = "chart-type")]
        chart_type: Option<String>,

        /// Record the exchange in the history store under this email.
        #[arg(name = "user", short = 'u', long = "user")]
        user: Option<String>,
    },

    /// List a user's past queries, newest first.
    #[clap(name = "history", alias = "h")]
    History {
        email: String,

        /// 0-based page; all entries when omitted.
        #[arg(long, short = 'p')]
        page: Option<usize>,
    },

    /// Write a default configuration file.
    Init,
}
