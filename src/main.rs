//! # Daily Digest
//!
//! Collects articles from a list of RSS/Atom feeds, asks an LLM to score and
//! summarize them, and publishes the best of the day as a digest with
//! on-demand Chinese translations of each article.
//!
//! ## Usage
//!
//! ```sh
//! daily_digest serve --port 3456
//! daily_digest --api-key AIza... generate --hours 48 --top-n 15
//! ```
//!
//! ## Architecture
//!
//! A generation run is a pipeline:
//! 1. **Fetching**: download every feed, a bounded window at a time
//! 2. **Filtering**: drop duplicates and articles outside the recency window
//! 3. **Scoring**: rate each article on relevance, quality and timeliness
//! 4. **Summarizing**: write a title, summary and reason for the top N
//! 5. **Highlights**: one editorial paragraph over the whole selection
//!
//! Finished digests are stored and served over HTTP, with progress pushed
//! to clients as server-sent events.

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod ai;
mod cli;
mod config;
mod feeds;
mod models;
mod orchestrator;
mod pipeline;
mod scheduler;
mod server;
mod state;
mod storage;
mod translate;
mod utils;

use cli::{Cli, Command};
use config::{ApiConfig, DEFAULT_RETENTION_DAYS};
use feeds::FeedFetcher;
use orchestrator::Orchestrator;
use scheduler::Scheduler;
use server::AppState;
use storage::{Store, FLUSH_INTERVAL};
use translate::TranslationService;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "daily_digest starting up");

    let args = Cli::parse();
    let config_path = args.config_path();
    debug!(data_dir = %args.data_dir.display(), config = %config_path.display(), "Parsed CLI arguments");

    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Store and config ----
    let store = Store::open(&args.data_dir)?;
    let flusher = store.spawn_flusher(FLUSH_INTERVAL);
    let config = ApiConfig::load(&config_path)?;
    match &config {
        Some(c) => info!(preset = %c.preset, schedules = c.schedules.len(), "Loaded configuration"),
        None => warn!(path = %config_path.display(), "No configuration yet; set one through the API"),
    }

    let retention = config
        .as_ref()
        .map(|c| c.translation_retention_days)
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    match store.prune_translations(retention, chrono::Utc::now()) {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, retention_days = retention, "Pruned old translations"),
        Err(e) => warn!(error = %e, "Could not prune translations"),
    }

    let translator = Arc::new(TranslationService::new(store.clone())?);
    let fetcher = FeedFetcher::new()?;

    match args.command {
        Command::Serve { port } => {
            let orchestrator = Arc::new(Orchestrator::new(store.clone(), fetcher, translator));
            let scheduler = Arc::new(Scheduler::new(Arc::clone(&orchestrator), config_path.clone()));
            if let Some(c) = &config {
                scheduler.arm(c);
            }
            let state = AppState::new(orchestrator, scheduler, config_path, args.api_key);
            server::serve(state, port).await?;
        }

        Command::Generate { hours, top_n, no_translate } => {
            let config = config.unwrap_or_default();
            let api_key = args
                .api_key
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| config.api_key.clone());
            let ai = ai::connect(&api_key, &config.api_options())?;

            let orchestrator = Orchestrator::new(store.clone(), fetcher, Arc::clone(&translator)).with_prewarm(false);
            let digest = orchestrator.run_with(Arc::clone(&ai), hours, top_n).await?;
            info!(
                date = %digest.date,
                articles = digest.articles.len(),
                feeds_ok = digest.success_feeds,
                feeds_total = digest.total_feeds,
                "Digest generated"
            );

            if !no_translate {
                translator.pre_translate(ai.as_ref(), &digest.articles).await;
                let progress = translator.progress();
                info!(done = progress.done, total = progress.total, "Pre-translation finished");
            }
        }
    }

    flusher.abort();
    match store.flush() {
        Ok(true) => debug!("Flushed store on shutdown"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "Could not flush store on shutdown"),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}
