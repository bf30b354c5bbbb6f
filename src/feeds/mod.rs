//! Feed fan-out: download every configured source and normalize its items.
//!
//! Sources are processed in windows of [`WINDOW`]; each window is fetched
//! concurrently and joined before the next begins. A failing feed is retried
//! once and then contributes nothing; it never aborts the batch.

pub mod parse;
pub mod sources;

use crate::models::{Article, FeedSource};
use futures::future::join_all;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

pub use parse::parse_feed_items;

/// Feeds fetched concurrently per window.
pub const WINDOW: usize = 10;
/// Per-request timeout for feed downloads.
pub const FEED_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for the "test source" probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Probe responses shorter than this cannot be a usable feed.
pub const PROBE_MIN_BYTES: usize = 100;

const ACCEPT: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml, */*";

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Transport(reqwest::Error),

    #[error("response too short ({0} bytes)")]
    TooShort(usize),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e)
        }
    }
}

/// Cumulative progress, reported once per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub done: usize,
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
}

/// Everything one fan-out produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub articles: Vec<Article>,
    pub success_count: usize,
    pub fail_count: usize,
}

/// Downloads feeds with bounded concurrency and per-feed retry.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    http: Client,
    window: usize,
    timeout: Duration,
    retries: usize,
    backoff: Duration,
}

impl FeedFetcher {
    pub fn new() -> Result<Self, FeedError> {
        let http = Client::builder()
            .user_agent(concat!("daily-digest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            window: WINDOW,
            timeout: FEED_TIMEOUT,
            retries: 1,
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay for the linear retry backoff (`backoff × attempt`).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch every source. Feeds that fail or yield no items count as failures.
    #[instrument(level = "info", skip_all, fields(feeds = sources.len()))]
    pub async fn fetch_all<F>(&self, sources: &[FeedSource], mut on_progress: F) -> FetchOutcome
    where
        F: FnMut(FetchProgress),
    {
        let t0 = Instant::now();
        let total = sources.len();
        let mut outcome = FetchOutcome::default();
        let mut done = 0usize;

        for window in sources.chunks(self.window.max(1)) {
            let results = join_all(window.iter().map(|feed| self.fetch_feed(feed))).await;
            for items in results {
                if items.is_empty() {
                    outcome.fail_count += 1;
                } else {
                    outcome.success_count += 1;
                    outcome.articles.extend(items);
                }
            }
            done += window.len();
            on_progress(FetchProgress {
                done,
                total,
                ok: outcome.success_count,
                failed: outcome.fail_count,
            });
        }

        info!(
            articles = outcome.articles.len(),
            ok = outcome.success_count,
            failed = outcome.fail_count,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched feeds"
        );
        outcome
    }

    /// One feed with retry; exhaustion yields no articles.
    #[instrument(level = "debug", skip_all, fields(feed = %feed.name))]
    async fn fetch_feed(&self, feed: &FeedSource) -> Vec<Article> {
        let mut attempt = 0usize;
        loop {
            match self.fetch_once(feed).await {
                Ok(items) => {
                    debug!(count = items.len(), "Parsed feed");
                    return items;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    let delay = self.backoff * attempt as u32;
                    debug!(attempt, ?delay, error = %e, "Feed fetch failed; retrying");
                    sleep(delay).await;
                }
                Err(e) => {
                    warn!(url = %feed.xml_url, attempts = attempt + 1, error = %e, "Feed failed");
                    return Vec::new();
                }
            }
        }
    }

    async fn fetch_once(&self, feed: &FeedSource) -> Result<Vec<Article>, FeedError> {
        let xml = self.get_text(&feed.xml_url, self.timeout).await?;
        Ok(parse_feed_items(&xml, feed))
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, FeedError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Check that `xml_url` answers with something feed-sized.
    #[instrument(level = "info", skip(self))]
    pub async fn probe(&self, xml_url: &str) -> Result<(), FeedError> {
        let body = self.get_text(xml_url, PROBE_TIMEOUT).await?;
        if body.len() < PROBE_MIN_BYTES {
            return Err(FeedError::TooShort(body.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn rss(items: &[(&str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(title, link)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <pubDate>Tue, 06 May 2025 10:00:00 GMT</pubDate></item>"
                )
            })
            .collect();
        format!("<?xml version=\"1.0\"?><rss><channel>{body}</channel></rss>")
    }

    fn fetcher() -> FeedFetcher {
        FeedFetcher::new().unwrap().with_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fetch_all_partial_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/good.xml");
                then.status(200).body(rss(&[("A", "https://a.test/1"), ("B", "https://a.test/2")]));
            })
            .await;
        let bad = server
            .mock_async(|when, then| {
                when.method(GET).path("/bad.xml");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/empty.xml");
                then.status(200).body(rss(&[]));
            })
            .await;

        let sources = vec![
            FeedSource::new("Good", &server.url("/good.xml"), "https://a.test"),
            FeedSource::new("Bad", &server.url("/bad.xml"), ""),
            FeedSource::new("Empty", &server.url("/empty.xml"), ""),
        ];
        let mut reports = Vec::new();
        let outcome = fetcher().fetch_all(&sources, |p| reports.push(p)).await;

        assert_eq!(outcome.articles.len(), 2);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.fail_count, 2);
        assert_eq!(outcome.articles[0].source_name, "Good");
        assert_eq!(outcome.articles[0].source_url, "https://a.test");
        // one retry after the first failure
        assert_eq!(bad.calls_async().await, 2);
        assert_eq!(
            reports,
            vec![FetchProgress { done: 3, total: 3, ok: 1, failed: 2 }]
        );
    }

    #[tokio::test]
    async fn test_progress_once_per_window() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/feed.xml");
                then.status(200).body(rss(&[("A", "https://a.test/1")]));
            })
            .await;

        let sources: Vec<FeedSource> = (0..12)
            .map(|i| FeedSource::new(&format!("F{i}"), &server.url("/feed.xml"), ""))
            .collect();
        let mut reports = Vec::new();
        let outcome = fetcher().fetch_all(&sources, |p| reports.push(p)).await;

        assert_eq!(outcome.success_count, 12);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], FetchProgress { done: 10, total: 12, ok: 10, failed: 0 });
        assert_eq!(reports[1], FetchProgress { done: 12, total: 12, ok: 12, failed: 0 });
    }

    #[tokio::test]
    async fn test_slow_feed_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow.xml");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .body(rss(&[("A", "https://a.test/1")]));
            })
            .await;

        let sources = vec![FeedSource::new("Slow", &server.url("/slow.xml"), "")];
        let outcome = fetcher()
            .with_timeout(Duration::from_millis(50))
            .fetch_all(&sources, |_| {})
            .await;
        assert!(outcome.articles.is_empty());
        assert_eq!(outcome.fail_count, 1);
    }

    #[tokio::test]
    async fn test_probe() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ok.xml");
                then.status(200).body(rss(&[("A", "https://a.test/1")]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/tiny.xml");
                then.status(200).body("<rss/>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone.xml");
                then.status(404);
            })
            .await;

        let f = fetcher();
        assert!(f.probe(&server.url("/ok.xml")).await.is_ok());
        assert!(matches!(f.probe(&server.url("/tiny.xml")).await, Err(FeedError::TooShort(6))));
        assert!(matches!(f.probe(&server.url("/gone.xml")).await, Err(FeedError::Status(404))));
    }
}
