//! Full-article translation with a persistent cache.
//!
//! Three ways in:
//!
//! - [`TranslationService::translate`]: one blocking call, cache first
//! - [`TranslationService::translate_stream`]: the same, delivered as
//!   [`TranslateEvent`]s while the model writes
//! - [`TranslationService::batch_translate`]: several articles per call, built
//!   from their feed descriptions only, used to pre-warm the cache
//!
//! Source text comes from the article page ([`extract::extract_content`]) and
//! falls back to the feed description when the page yields too little.

pub mod extract;
pub mod format;

use crate::ai::{parse_json, AiError, Completion, JsonExtractError};
use crate::models::{DigestArticle, Translation};
use crate::state::{TranslateState, TranslateTracker};
use crate::storage::{Store, StoreError};
use chrono::Utc;
use extract::{extract_content, smart_truncate, TRUNCATE_BUDGET};
use format::{parse_structured, FormatEvent, Structured, StructuredParser};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Timeout for downloading the article page.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(12);
/// Extracted page text shorter than this is replaced by the feed description.
pub const MIN_EXTRACTED_CHARS: usize = 200;
/// Source text at least this long is translated with a streamed call.
pub const STREAM_THRESHOLD: usize = 1500;
/// Articles per pre-translation call.
pub const GROUP_SIZE: usize = 5;

const ITEM_GAP: Duration = Duration::from_secs(1);
const GROUP_GAP: Duration = Duration::from_secs(2);
const EVENT_BUFFER: usize = 64;
const BATCH_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("could not load the article content; the site may require login or block scraping")]
    NoContent,

    #[error("translation failed: {0}")]
    Ai(#[from] AiError),

    #[error("translation reply had no content")]
    Malformed,

    #[error("unreadable batch reply: {0}")]
    Batch(#[from] JsonExtractError),

    #[error("translation cache error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// An article to translate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TranslateItem {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Feed description, used when the page cannot be read.
    #[serde(default)]
    pub desc: String,
}

impl TranslateItem {
    pub fn new(url: &str, title: &str, desc: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            desc: desc.to_string(),
        }
    }
}

impl From<&DigestArticle> for TranslateItem {
    fn from(a: &DigestArticle) -> Self {
        let desc = if a.description.is_empty() { &a.summary } else { &a.description };
        Self::new(&a.link, &a.title, desc)
    }
}

/// Progress of a streamed translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateEvent {
    Status(String),
    Meta { title_zh: String, summary: String },
    Chunk(String),
    Done { translation: Translation, cached: bool },
    Error(String),
}

impl TranslateEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Meta { .. } => "meta",
            Self::Chunk(_) => "chunk",
            Self::Done { .. } => "done",
            Self::Error(_) => "error",
        }
    }

    /// SSE data payload.
    pub fn data(&self) -> Value {
        match self {
            Self::Status(message) => json!({ "message": message }),
            Self::Meta { title_zh, summary } => json!({ "titleZh": title_zh, "summary": summary }),
            Self::Chunk(text) => json!({ "text": text }),
            Self::Done { translation, cached } => json!({
                "ok": true,
                "cached": cached,
                "url": translation.url,
                "titleZh": translation.title_zh,
                "summary": translation.summary,
                "content": translation.content,
            }),
            Self::Error(error) => json!({ "error": error }),
        }
    }
}

fn translate_prompt(title: &str, content: &str, url: &str) -> String {
    format!(
        "You are a professional technology editor. Translate the article below into natural, fluent \
Simplified Chinese.\n\n\
Requirements:\n\
- Translate for meaning, not word by word; it should read like a quality Chinese tech publication\n\
- Keep technical terms (LLM, RAG, fine-tuning, ...) in English or add them in parentheses\n\
- Keep the paragraph structure, with a blank line between paragraphs\n\
- Give the article an engaging Chinese title\n\n\
Title: {title}\nSource: {url}\n\nContent:\n{content}\n\n\
Reply in exactly this format, with no JSON and no Markdown fences:\n\
TITLE_ZH: <Chinese title>\n\
SUMMARY_ZH: <2-3 sentence summary in Chinese>\n\
---CONTENT---\n\
<full Chinese translation>"
    )
}

fn batch_prompt(items: &[(usize, &TranslateItem)]) -> String {
    let list = items
        .iter()
        .map(|(i, item)| {
            format!(
                "Index {i}: {}\n{}",
                item.title,
                crate::utils::truncate_chars(&item.desc, BATCH_DESCRIPTION_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "Expand each article summary below into a short Simplified Chinese article of 2-4 paragraphs, \
based only on the text given. Keep technical terms in English where natural.\n\n{list}\n\n\
Return a JSON array with one object per article:\n\
[{{\"index\": 0, \"titleZh\": \"Chinese title\", \"summary\": \"one-sentence summary\", \
\"content\": \"paragraphs separated by \\n\\n\"}}]"
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry {
    index: usize,
    #[serde(default)]
    title_zh: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    content: String,
}

/// Sends events to one client; once the client is gone, sends become no-ops.
struct EventSink {
    tx: mpsc::Sender<TranslateEvent>,
    open: bool,
}

impl EventSink {
    async fn send(&mut self, event: TranslateEvent) {
        if self.open && self.tx.send(event).await.is_err() {
            self.open = false;
            debug!("Client disconnected; translation continues for the cache");
        }
    }

    /// Replay a finished translation as meta plus one chunk per paragraph.
    async fn replay(&mut self, t: &Translation) {
        self.send(TranslateEvent::Meta {
            title_zh: t.title_zh.clone(),
            summary: t.summary.clone(),
        })
        .await;
        for paragraph in t.content.split("\n\n").filter(|p| !p.trim().is_empty()) {
            self.send(TranslateEvent::Chunk(format!("{paragraph}\n\n"))).await;
        }
    }
}

/// Article translation backed by the shared translation cache.
#[derive(Debug)]
pub struct TranslationService {
    store: Store,
    http: Client,
    tracker: TranslateTracker,
    page_timeout: Duration,
    item_gap: Duration,
    group_gap: Duration,
}

impl TranslationService {
    pub fn new(store: Store) -> Result<Self, TranslateError> {
        let http = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; daily-digest/1.0)")
            .build()?;
        Ok(Self {
            store,
            http,
            tracker: TranslateTracker::new(),
            page_timeout: PAGE_TIMEOUT,
            item_gap: ITEM_GAP,
            group_gap: GROUP_GAP,
        })
    }

    /// Pauses between individual fallbacks and between pre-translation groups.
    pub fn with_pacing(mut self, item_gap: Duration, group_gap: Duration) -> Self {
        self.item_gap = item_gap;
        self.group_gap = group_gap;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Background pre-translation progress.
    pub fn progress(&self) -> TranslateState {
        self.tracker.snapshot()
    }

    async fn fetch_page(&self, url: &str) -> Result<String, reqwest::Error> {
        self.http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .timeout(self.page_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Text to translate: page content, else the feed description, truncated
    /// to the model budget.
    #[instrument(level = "debug", skip(self, fallback))]
    pub async fn load_source(&self, url: &str, fallback: &str) -> Result<String, TranslateError> {
        let mut content = match self.fetch_page(url).await {
            Ok(html) => extract_content(&html),
            Err(e) => {
                warn!(url, error = %e, "Article fetch failed");
                String::new()
            }
        };
        if content.chars().count() < MIN_EXTRACTED_CHARS && !fallback.trim().is_empty() {
            debug!(extracted = content.chars().count(), "Using feed description");
            content = fallback.trim().to_string();
        }
        if content.trim().is_empty() {
            return Err(TranslateError::NoContent);
        }
        Ok(smart_truncate(&content, TRUNCATE_BUDGET))
    }

    fn save(&self, item: &TranslateItem, parsed: Structured) -> Result<Translation, TranslateError> {
        if parsed.content.trim().is_empty() {
            return Err(TranslateError::Malformed);
        }
        let title_zh = if parsed.title_zh.is_empty() { item.title.clone() } else { parsed.title_zh };
        let translation = Translation {
            title_zh,
            summary: parsed.summary,
            content: parsed.content,
            url: item.url.clone(),
            created_at: Utc::now(),
        };
        self.store.save_translation(&translation)?;
        Ok(translation)
    }

    async fn translate_source(
        &self,
        ai: &dyn Completion,
        item: &TranslateItem,
        source: &str,
    ) -> Result<Translation, TranslateError> {
        let reply = ai.complete(&translate_prompt(&item.title, source, &item.url)).await?;
        self.save(item, parse_structured(&reply))
    }

    /// Cached translation of `item`, or a fresh one.
    #[instrument(level = "info", skip_all, fields(url = %item.url))]
    pub async fn translate(&self, ai: &dyn Completion, item: &TranslateItem) -> Result<Translation, TranslateError> {
        if let Some(cached) = self.store.get_translation(&item.url)? {
            debug!("Translation cache hit");
            return Ok(cached);
        }
        let t0 = Instant::now();
        let source = self.load_source(&item.url, &item.desc).await?;
        let translation = self.translate_source(ai, item, &source).await?;
        info!(
            chars = source.chars().count(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Translated article"
        );
        Ok(translation)
    }

    /// Drop the cached translation and translate again.
    pub async fn retranslate(&self, ai: &dyn Completion, item: &TranslateItem) -> Result<Translation, TranslateError> {
        self.store.delete_translation(&item.url)?;
        self.translate(ai, item).await
    }

    /// Translate in a background task, reporting progress as events.
    ///
    /// The result is cached even if the receiver is dropped early. The
    /// channel closes after a `Done` or `Error` event.
    pub fn translate_stream(
        self: Arc<Self>,
        ai: Arc<dyn Completion>,
        item: TranslateItem,
    ) -> mpsc::Receiver<TranslateEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut sink = EventSink { tx, open: true };
            if let Err(e) = self.run_stream(ai.as_ref(), &item, &mut sink).await {
                warn!(url = %item.url, error = %e, "Streaming translation failed");
                sink.send(TranslateEvent::Error(e.to_string())).await;
            }
        });
        rx
    }

    async fn run_stream(
        &self,
        ai: &dyn Completion,
        item: &TranslateItem,
        sink: &mut EventSink,
    ) -> Result<(), TranslateError> {
        if let Some(cached) = self.store.get_translation(&item.url)? {
            sink.send(TranslateEvent::Status("cached".to_string())).await;
            sink.replay(&cached).await;
            sink.send(TranslateEvent::Done { translation: cached, cached: true }).await;
            return Ok(());
        }

        sink.send(TranslateEvent::Status("fetching article".to_string())).await;
        let source = self.load_source(&item.url, &item.desc).await?;

        if source.chars().count() < STREAM_THRESHOLD {
            sink.send(TranslateEvent::Status("translating".to_string())).await;
            let translation = self.translate_source(ai, item, &source).await?;
            sink.replay(&translation).await;
            sink.send(TranslateEvent::Done { translation, cached: false }).await;
            return Ok(());
        }

        sink.send(TranslateEvent::Status("translating (streaming)".to_string())).await;
        let t0 = Instant::now();
        let mut deltas = ai.stream(&translate_prompt(&item.title, &source, &item.url)).await?;
        let mut parser = StructuredParser::new();
        while let Some(delta) = deltas.recv().await {
            for event in parser.push(&delta?) {
                let event = match event {
                    FormatEvent::Meta { title_zh, summary } => TranslateEvent::Meta { title_zh, summary },
                    FormatEvent::Chunk(text) => TranslateEvent::Chunk(text),
                };
                sink.send(event).await;
            }
        }

        let streamed = parser.has_meta();
        let translation = self.save(item, parser.finish())?;
        if !streamed {
            // the marker never came, so nothing was shown yet
            sink.replay(&translation).await;
        }
        info!(
            url = %item.url,
            chars = translation.content.chars().count(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Streamed translation"
        );
        sink.send(TranslateEvent::Done { translation, cached: false }).await;
        Ok(())
    }

    /// Translate several articles in one call from their descriptions.
    ///
    /// Cached URLs are skipped. Returns how many translations were saved.
    #[instrument(level = "info", skip_all, fields(items = items.len()))]
    pub async fn batch_translate(&self, ai: &dyn Completion, items: &[TranslateItem]) -> Result<usize, TranslateError> {
        let cached: HashSet<String> = self
            .store
            .translation_map(&items.iter().map(|i| i.url.clone()).collect::<Vec<_>>())?
            .into_keys()
            .collect();
        let pending: Vec<(usize, &TranslateItem)> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.url.is_empty() && !cached.contains(&item.url))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let reply = ai.complete(&batch_prompt(&pending)).await?;
        let entries: Vec<BatchEntry> = parse_json(&reply)?;

        let mut saved = 0;
        for entry in entries {
            let Some((_, item)) = pending.iter().find(|(i, _)| *i == entry.index) else {
                continue;
            };
            let parsed = Structured {
                title_zh: entry.title_zh,
                summary: entry.summary,
                content: entry.content,
            };
            match self.save(item, parsed) {
                Ok(_) => saved += 1,
                Err(TranslateError::Malformed) => debug!(index = entry.index, "Empty batch entry"),
                Err(e) => return Err(e),
            }
        }
        if saved == 0 {
            return Err(TranslateError::Malformed);
        }
        Ok(saved)
    }

    /// Warm the cache for a finished digest.
    ///
    /// Articles go through [`batch_translate`](Self::batch_translate) in groups
    /// of [`GROUP_SIZE`]; when a group fails, its uncached articles are
    /// translated one at a time. Failures are logged, never returned.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn pre_translate(&self, ai: &dyn Completion, articles: &[DigestArticle]) {
        let items: Vec<TranslateItem> = articles
            .iter()
            .filter(|a| !a.link.is_empty())
            .map(TranslateItem::from)
            .collect();
        let total = items.len();
        self.tracker.start(total);
        info!(total, group = GROUP_SIZE, "Pre-translating articles");

        for (n, group) in items.chunks(GROUP_SIZE).enumerate() {
            let first = n * GROUP_SIZE;
            debug!(from = first + 1, to = first + group.len(), total, "Translation group");

            if let Err(e) = self.batch_translate(ai, group).await {
                warn!(error = %e, "Batch translation failed; translating individually");
                for (offset, item) in group.iter().enumerate() {
                    if matches!(self.store.get_translation(&item.url), Ok(Some(_))) {
                        continue;
                    }
                    self.tracker.update(first + offset, &item.url);
                    if let Err(e) = self.translate(ai, item).await {
                        warn!(url = %item.url, error = %e, "Single translation failed");
                    }
                    sleep(self.item_gap).await;
                }
            }

            let done = (first + GROUP_SIZE).min(total);
            self.tracker.update(done, "");
            if done < total {
                sleep(self.group_gap).await;
            }
        }

        self.tracker.finish();
        info!(total, "Pre-translation complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedAi;
    use crate::models::{Article, Score, Summary};
    use httpmock::prelude::*;

    const REPLY: &str = "TITLE_ZH: 中文标题\nSUMMARY_ZH: 中文摘要。\n---CONTENT---\n第一段。\n\n第二段。";

    fn service(store: Store) -> Arc<TranslationService> {
        Arc::new(
            TranslationService::new(store)
                .unwrap()
                .with_pacing(Duration::ZERO, Duration::ZERO),
        )
    }

    fn page(words: usize) -> String {
        format!(
            "<html><body><nav>menu</nav><article><p>{}</p></article></body></html>",
            "word ".repeat(words)
        )
    }

    async fn collect(mut rx: mpsc::Receiver<TranslateEvent>) -> Vec<TranslateEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn chunk_text(events: &[TranslateEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                TranslateEvent::Chunk(c) => Some(c.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_translate_fetches_page_and_caches() {
        let server = MockServer::start_async().await;
        let page_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/post");
                then.status(200).body(page(100));
            })
            .await;
        let store = Store::in_memory();
        let svc = service(store.clone());
        let ai = ScriptedAi::new().on("TITLE_ZH", REPLY);
        let item = TranslateItem::new(&server.url("/post"), "Title", "desc");

        let t = svc.translate(&ai, &item).await.unwrap();
        assert_eq!(t.title_zh, "中文标题");
        assert_eq!(t.content, "第一段。\n\n第二段。");
        assert_eq!(store.get_translation(&item.url).unwrap(), Some(t.clone()));
        assert_eq!(ai.prompts_containing("word word"), 1);

        // second call is served from the cache
        let again = svc.translate(&ai, &item).await.unwrap();
        assert_eq!(again, t);
        page_mock.assert_calls_async(1).await;
        assert_eq!(ai.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_translate_falls_back_to_description() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/walled");
                then.status(403);
            })
            .await;
        let svc = service(Store::in_memory());
        let ai = ScriptedAi::new().on("TITLE_ZH", REPLY);

        let item = TranslateItem::new(&server.url("/walled"), "Title", "the feed description");
        svc.translate(&ai, &item).await.unwrap();
        assert_eq!(ai.prompts_containing("the feed description"), 1);

        let bare = TranslateItem::new(&server.url("/walled"), "Title", "");
        assert!(matches!(
            svc.translate(&ai, &bare).await,
            Err(TranslateError::NoContent)
        ));
    }

    #[tokio::test]
    async fn test_retranslate_replaces_cache() {
        let store = Store::in_memory();
        let svc = service(store.clone());
        let item = TranslateItem::new("http://127.0.0.1:9/gone", "Title", "short description");
        store
            .save_translation(&Translation {
                title_zh: "旧".to_string(),
                summary: String::new(),
                content: "旧内容".to_string(),
                url: item.url.clone(),
                created_at: Utc::now(),
            })
            .unwrap();
        let ai = ScriptedAi::new().on("TITLE_ZH", REPLY);

        let t = svc.retranslate(&ai, &item).await.unwrap();
        assert_eq!(t.title_zh, "中文标题");
        assert_eq!(store.get_translation(&item.url).unwrap().unwrap().title_zh, "中文标题");
    }

    #[tokio::test]
    async fn test_stream_short_content_uses_single_call() {
        let svc = service(Store::in_memory());
        let ai = Arc::new(ScriptedAi::new().on("TITLE_ZH", REPLY));
        let item = TranslateItem::new("http://127.0.0.1:9/gone", "Title", "short description");

        let events = collect(svc.clone().translate_stream(ai.clone(), item)).await;
        assert_eq!(ai.streams(), 0);
        assert!(matches!(events.first(), Some(TranslateEvent::Status(_))));
        assert!(events.iter().any(|e| matches!(e, TranslateEvent::Meta { title_zh, .. } if title_zh == "中文标题")));
        assert_eq!(chunk_text(&events), "第一段。\n\n第二段。\n\n");
        assert!(matches!(events.last(), Some(TranslateEvent::Done { cached: false, .. })));
    }

    #[tokio::test]
    async fn test_stream_long_content_streams_and_caches() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/long");
                then.status(200).body(page(400));
            })
            .await;
        let store = Store::in_memory();
        let svc = service(store.clone());
        let ai = Arc::new(ScriptedAi::new().on("TITLE_ZH", REPLY));
        let item = TranslateItem::new(&server.url("/long"), "Title", "");

        let events = collect(svc.clone().translate_stream(ai.clone(), item.clone())).await;
        assert_eq!(ai.streams(), 1);

        let meta_at = events
            .iter()
            .position(|e| matches!(e, TranslateEvent::Meta { .. }))
            .unwrap();
        let first_chunk = events
            .iter()
            .position(|e| matches!(e, TranslateEvent::Chunk(_)))
            .unwrap();
        assert!(meta_at < first_chunk);
        assert_eq!(chunk_text(&events), "第一段。\n\n第二段。");

        let cached = store.get_translation(&item.url).unwrap().unwrap();
        assert_eq!(cached.summary, "中文摘要。");
        assert!(matches!(events.last(), Some(TranslateEvent::Done { translation, .. }) if *translation == cached));
    }

    #[tokio::test]
    async fn test_stream_cache_hit_replays_paragraphs() {
        let store = Store::in_memory();
        let svc = service(store.clone());
        let t = Translation {
            title_zh: "标题".to_string(),
            summary: "摘要".to_string(),
            content: "一\n\n二\n\n三".to_string(),
            url: "https://a.test/cached".to_string(),
            created_at: Utc::now(),
        };
        store.save_translation(&t).unwrap();
        let ai = Arc::new(ScriptedAi::new());

        let events = collect(svc.translate_stream(ai.clone(), TranslateItem::new(&t.url, "", ""))).await;
        let chunks = events.iter().filter(|e| matches!(e, TranslateEvent::Chunk(_))).count();
        assert_eq!(chunks, 3);
        assert!(matches!(events.last(), Some(TranslateEvent::Done { cached: true, .. })));
        assert!(ai.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_event() {
        let svc = service(Store::in_memory());
        let ai = Arc::new(ScriptedAi::new().fail_on("TITLE_ZH", 401));
        let item = TranslateItem::new("http://127.0.0.1:9/gone", "Title", "short description");
        let events = collect(svc.translate_stream(ai, item)).await;
        let last = events.last().unwrap();
        assert_eq!(last.name(), "error");
        assert!(last.data()["error"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_batch_translate_skips_cached() {
        let store = Store::in_memory();
        let svc = service(store.clone());
        let items = vec![
            TranslateItem::new("https://a.test/0", "Zero", "d0"),
            TranslateItem::new("https://a.test/1", "One", "d1"),
        ];
        store
            .save_translation(&Translation {
                title_zh: "零".to_string(),
                summary: String::new(),
                content: "已缓存".to_string(),
                url: items[0].url.clone(),
                created_at: Utc::now(),
            })
            .unwrap();
        let ai = ScriptedAi::new().on(
            "JSON array",
            r#"[{"index": 1, "titleZh": "一", "summary": "摘要", "content": "正文"}]"#,
        );

        assert_eq!(svc.batch_translate(&ai, &items).await.unwrap(), 1);
        assert_eq!(ai.prompts_containing("Index 0"), 0);
        assert_eq!(store.get_translation(&items[1].url).unwrap().unwrap().title_zh, "一");
        assert_eq!(store.get_translation(&items[0].url).unwrap().unwrap().content, "已缓存");

        // nothing left to do
        assert_eq!(svc.batch_translate(&ai, &items).await.unwrap(), 0);
    }

    fn digest_article(i: usize) -> DigestArticle {
        let article = Article {
            title: format!("Post {i}"),
            link: format!("http://127.0.0.1:9/post/{i}"),
            pub_date: Utc::now(),
            description: format!("description of post {i}"),
            source_name: String::new(),
            source_url: String::new(),
        };
        DigestArticle::assemble(&article, &Score::fallback(), Summary::default())
    }

    #[tokio::test]
    async fn test_pre_translate_falls_back_to_single_calls() {
        let store = Store::in_memory();
        let svc = service(store.clone());
        let ai = ScriptedAi::new().on("JSON array", "not json").on("TITLE_ZH", REPLY);
        let articles: Vec<_> = (0..7).map(digest_article).collect();

        svc.pre_translate(&ai, &articles).await;

        assert_eq!(ai.prompts_containing("JSON array"), 2);
        for a in &articles {
            assert!(store.get_translation(&a.link).unwrap().is_some(), "{} missing", a.link);
        }
        let progress = svc.progress();
        assert!(!progress.running);
        assert_eq!((progress.done, progress.total), (7, 7));
    }
}
