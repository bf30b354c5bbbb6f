//! One digest generation run, end to end.
//!
//! ```text
//! idle → fetching → filtering → scoring → summarizing → highlights → done
//!            └──────────┴──────────┴───────────┴────────────┴──→ error
//! ```
//!
//! Only one run may be in flight; the [`GenerationTracker`] slot is claimed
//! before anything else happens and released on every exit path.

use crate::ai::{connect, AiError, ApiOptions, Completion};
use crate::feeds::sources::active_feeds;
use crate::feeds::{FeedFetcher, FetchProgress};
use crate::models::{Article, Digest, DigestArticle, DigestStatus, FeedSource, Score};
use crate::pipeline::dedup::{dedupe, within_window};
use crate::pipeline::highlights::generate_highlights;
use crate::pipeline::rank;
use crate::pipeline::scoring::score_articles;
use crate::pipeline::summarize::{summarize_articles, TargetScript};
use crate::state::{AlreadyRunning, GenerationTracker, Step};
use crate::storage::{Store, StoreError};
use crate::translate::TranslationService;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),

    #[error("an API key is required; configure one in settings")]
    MissingApiKey,

    #[error("no articles were fetched from any feed")]
    NoArticles,

    #[error("no articles found in the last {hours} hours")]
    NoRecentArticles { hours: u32 },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("AI backend error: {0}")]
    Ai(AiError),
}

impl From<AiError> for RunError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::MissingApiKey => Self::MissingApiKey,
            e => Self::Ai(e),
        }
    }
}

/// Owns the run slot and everything a run needs.
#[derive(Debug)]
pub struct Orchestrator {
    store: Store,
    generation: Arc<GenerationTracker>,
    translator: Arc<TranslationService>,
    fetcher: FeedFetcher,
    script: TargetScript,
    prewarm: bool,
}

impl Orchestrator {
    pub fn new(store: Store, fetcher: FeedFetcher, translator: Arc<TranslationService>) -> Self {
        Self {
            store,
            generation: Arc::new(GenerationTracker::new()),
            translator,
            fetcher,
            script: TargetScript::default(),
            prewarm: true,
        }
    }

    /// Whether a successful run pre-translates its articles in the background.
    pub fn with_prewarm(mut self, prewarm: bool) -> Self {
        self.prewarm = prewarm;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn generation(&self) -> &Arc<GenerationTracker> {
        &self.generation
    }

    pub fn translator(&self) -> &Arc<TranslationService> {
        &self.translator
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }

    /// Run the whole pipeline and wait for the result.
    pub async fn run_digest_generation(
        &self,
        api_key: &str,
        opts: &ApiOptions,
        hours: u32,
        top_n: usize,
    ) -> Result<Digest, RunError> {
        self.claim()?;
        self.run_claimed(connect(api_key, opts), hours, top_n).await
    }

    /// [`run_digest_generation`](Self::run_digest_generation) with an
    /// already-built backend.
    pub async fn run_with(&self, ai: Arc<dyn Completion>, hours: u32, top_n: usize) -> Result<Digest, RunError> {
        self.claim()?;
        self.run_claimed(Ok(ai), hours, top_n).await
    }

    /// Claim the run slot now and run in the background.
    ///
    /// Rejection happens before this returns, so callers can report it.
    pub fn start_digest_generation(
        self: &Arc<Self>,
        api_key: &str,
        opts: &ApiOptions,
        hours: u32,
        top_n: usize,
    ) -> Result<JoinHandle<Result<Digest, RunError>>, RunError> {
        self.claim()?;
        let ai = connect(api_key, opts);
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run_claimed(ai, hours, top_n).await }))
    }

    fn claim(&self) -> Result<(), RunError> {
        self.generation
            .try_begin(Utc::now(), "Fetching RSS feeds...")
            .map_err(|e| {
                warn!("Rejected generation request: a run is already in progress");
                RunError::from(e)
            })
    }

    #[instrument(level = "info", skip(self, ai))]
    async fn run_claimed(
        &self,
        ai: Result<Arc<dyn Completion>, AiError>,
        hours: u32,
        top_n: usize,
    ) -> Result<Digest, RunError> {
        let t0 = Instant::now();
        let date = Utc::now().date_naive().to_string();

        let outcome = async {
            let sources = active_feeds(self.store.rss_sources()?);
            self.store
                .begin_digest(Digest::placeholder(&date, hours, sources.len(), Utc::now()))?;
            let ai = ai?;
            let digest = self.pipeline(&date, ai.as_ref(), &sources, hours, top_n).await?;
            Ok::<_, RunError>((digest, ai))
        }
        .await;

        match outcome {
            Ok((digest, ai)) => {
                self.generation.finish(
                    Step::Done,
                    format!("Done! {} articles selected", digest.articles.len()),
                );
                info!(
                    %date,
                    articles = digest.articles.len(),
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "Digest generation complete"
                );
                if self.prewarm && !digest.articles.is_empty() {
                    let translator = Arc::clone(&self.translator);
                    let articles = digest.articles.clone();
                    tokio::spawn(async move {
                        translator.pre_translate(ai.as_ref(), &articles).await;
                    });
                }
                Ok(digest)
            }
            Err(e) => {
                error!(%date, error = %e, elapsed_ms = t0.elapsed().as_millis() as u64, "Digest generation failed");
                if let Err(store_err) = self.store.fail_digest(&date, Utc::now()) {
                    warn!(%date, error = %store_err, "Could not mark digest as failed");
                }
                self.generation.finish(Step::Error, e.to_string());
                Err(e)
            }
        }
    }

    async fn pipeline(
        &self,
        date: &str,
        ai: &dyn Completion,
        sources: &[FeedSource],
        hours: u32,
        top_n: usize,
    ) -> Result<Digest, RunError> {
        info!(sources = sources.len(), hours, top_n, "Starting digest generation");

        let fetched = self
            .fetcher
            .fetch_all(sources, |p: FetchProgress| {
                self.generation.progress(format!(
                    "Fetching feeds: {}/{} sources ({} ok, {} failed)",
                    p.done, p.total, p.ok, p.failed
                ));
            })
            .await;
        let total_articles = fetched.articles.len();
        if total_articles == 0 {
            return Err(RunError::NoArticles);
        }

        let deduped = dedupe(fetched.articles);
        if deduped.len() < total_articles {
            info!(before = total_articles, after = deduped.len(), "Removed duplicate articles");
        }

        self.generation.advance(Step::Filtering, "Filtering by publish time...");
        let recent = within_window(deduped, hours, Utc::now());
        if recent.is_empty() {
            return Err(RunError::NoRecentArticles { hours });
        }
        let filtered_articles = recent.len();

        self.generation
            .advance(Step::Scoring, format!("AI scoring ({filtered_articles} articles)..."));
        let scores = score_articles(ai, &recent, |done, total| {
            self.generation.progress(format!("AI scoring: {done}/{total} batches"));
        })
        .await;
        let (top, top_scores): (Vec<Article>, Vec<Score>) = rank(recent, scores, top_n).into_iter().unzip();

        self.generation
            .advance(Step::Summarizing, format!("Summarizing ({} articles)...", top.len()));
        let summaries = summarize_articles(ai, &top, &self.script, |done, total| {
            self.generation.progress(format!("Summarizing: {done}/{total} batches"));
        })
        .await;
        let articles: Vec<DigestArticle> = top
            .iter()
            .zip(&top_scores)
            .zip(summaries)
            .map(|((article, score), summary)| DigestArticle::assemble(article, score, summary))
            .collect();

        self.generation.advance(Step::Highlights, "Writing today's highlights...");
        let highlights = generate_highlights(ai, &articles).await;

        let now = Utc::now();
        let digest = Digest {
            date: date.to_string(),
            status: DigestStatus::Done,
            hours,
            total_feeds: sources.len(),
            success_feeds: fetched.success_count,
            total_articles,
            filtered_articles,
            highlights,
            articles,
            share_token: None,
            created_at: now,
            updated_at: now,
        };
        self.store.finish_digest(digest.clone())?;
        info!(
            feeds_ok = fetched.success_count,
            fetched = total_articles,
            recent = filtered_articles,
            selected = digest.articles.len(),
            "Digest saved"
        );
        Ok(self.store.get_digest(date)?.unwrap_or(digest))
    }
}
