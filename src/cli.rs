//! Command-line interface definitions.
//!
//! Global options pick the data directory and credentials; the subcommand
//! picks between running the HTTP service and a one-shot generation.

use crate::config::CONFIG_FILE;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the daily digest service.
///
/// # Examples
///
/// ```sh
/// # Serve the API with schedules from ./data/config.yaml
/// daily_digest serve --port 3456
///
/// # Generate today's digest once and exit
/// daily_digest --api-key AIza... generate --hours 24 --top-n 10
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding the store and config
    #[arg(short, long, env = "DIGEST_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Path to config.yaml (defaults to <data-dir>/config.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// LLM API key; overrides the configured one
    #[arg(long, env = "DIGEST_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API and the daily scheduler
    Serve {
        #[arg(short, long, env = "PORT", default_value_t = 3456)]
        port: u16,
    },

    /// Generate today's digest once
    Generate {
        /// Recency window in hours
        #[arg(long, default_value_t = 48)]
        hours: u32,

        /// Number of articles to keep
        #[arg(long, default_value_t = 15)]
        top_n: usize,

        /// Skip pre-translating the selected articles
        #[arg(long)]
        no_translate: bool,
    },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.data_dir.join(CONFIG_FILE))
    }
}
