//! Translated titles, summaries and reasons for the ranked articles.
//!
//! Three phases:
//!
//! 1. Batched calls; a failed batch simply leaves gaps
//! 2. Individual retry for every gap and every result whose title or summary
//!    lacks target-script characters
//! 3. Remaining gaps fall back to the original title and a cut description

use crate::ai::{extract_json, Completion};
use crate::models::{Article, Summary};
use crate::utils::{truncate_chars, truncate_for_log};
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub const BATCH_SIZE: usize = 5;
pub const CONCURRENCY: usize = 2;
const FALLBACK_SUMMARY_CHARS: usize = 200;

/// Heuristic for "the reply is actually in the target language".
///
/// A text passes when it contains at least one character matched by the
/// pattern. The default looks for Han characters.
#[derive(Debug, Clone)]
pub struct TargetScript {
    pattern: Regex,
}

impl TargetScript {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Whether a summary needs another attempt.
    pub fn rejects(&self, s: &Summary) -> bool {
        !self.matches(&s.title_zh) || !self.matches(&s.summary)
    }
}

impl Default for TargetScript {
    fn default() -> Self {
        Self {
            pattern: Regex::new(r"\p{Han}").unwrap(),
        }
    }
}

/// String field of a reply entry; `null`, missing and non-string values read as empty.
fn text(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn summary_from(v: &Value) -> Summary {
    Summary {
        title_zh: text(v, "titleZh"),
        summary: text(v, "summary"),
        reason: text(v, "reason"),
    }
}

/// Entry index as a number or a numeric string.
fn entry_index(v: &Value) -> Option<usize> {
    match v.get("index")? {
        Value::Number(n) => n.as_u64().map(|i| i as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pull `(index, summary)` pairs out of a batch reply entry by entry, so one
/// odd entry never costs the rest of the batch.
fn parse_batch(reply: &str, batch: &[(usize, &Article)]) -> Vec<(usize, Summary)> {
    let value = match extract_json(reply) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, reply = %truncate_for_log(reply, 200), "Unparseable summary batch");
            return Vec::new();
        }
    };
    let Some(results) = value.get("results").and_then(Value::as_array) else {
        warn!(reply = %truncate_for_log(reply, 200), "Summary batch without results");
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|r| {
            let index = entry_index(r)?;
            batch
                .iter()
                .any(|(i, _)| *i == index)
                .then(|| (index, summary_from(r)))
        })
        .collect()
}

const INSTRUCTIONS: &str = "Write in Simplified Chinese. Get straight to the point and keep concrete \
technical names, numbers and project names. Leave well-known technical terms (LLM, RAG, Kubernetes) in English.";

fn batch_prompt(batch: &[(usize, &Article)]) -> String {
    let list = batch
        .iter()
        .map(|(i, a)| {
            format!(
                "Index {i}: [{}] {}\nURL: {}\n{}",
                a.source_name,
                a.title,
                a.link,
                truncate_chars(&a.description, 800)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        r#"You are a technical editor. For each article below produce:
1. titleZh: a natural Chinese translation of the title
2. summary: a structured 4-6 sentence summary
3. reason: one sentence on why it is worth reading

{INSTRUCTIONS}

## Articles
{list}

Reply with strict JSON only:
{{"results":[{{"index":0,"titleZh":"中文标题","summary":"摘要……","reason":"推荐理由……"}}]}}"#
    )
}

fn single_prompt(article: &Article) -> String {
    format!(
        r#"You are a technical editor. Summarize this single article.

{INSTRUCTIONS} The titleZh and summary fields MUST be written in Chinese.

Title: {}
Source: {}
URL: {}
{}

Reply with strict JSON only:
{{"titleZh":"中文标题","summary":"4-6 句中文摘要","reason":"一句推荐理由"}}"#,
        article.title,
        article.source_name,
        article.link,
        truncate_chars(&article.description, 800)
    )
}

async fn summarize_batch(ai: &dyn Completion, batch: &[(usize, &Article)]) -> Vec<(usize, Summary)> {
    let reply = match ai.complete(&batch_prompt(batch)).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(size = batch.len(), error = %e, "Summary batch failed");
            return Vec::new();
        }
    };
    parse_batch(&reply, batch)
}

async fn summarize_one(ai: &dyn Completion, article: &Article) -> Option<Summary> {
    match ai.complete(&single_prompt(article)).await {
        Ok(reply) => match extract_json(&reply) {
            Ok(v) => Some(summary_from(&v)),
            Err(e) => {
                debug!(error = %e, link = %article.link, "Unparseable single summary");
                None
            }
        },
        Err(e) => {
            debug!(error = %e, link = %article.link, "Single summary failed");
            None
        }
    }
}

fn fallback(article: &Article) -> Summary {
    Summary {
        title_zh: article.title.clone(),
        summary: truncate_chars(&article.description, FALLBACK_SUMMARY_CHARS),
        reason: String::new(),
    }
}

/// Summarize `articles`; the result is index-aligned with the input.
///
/// `on_progress(batches_done, batches_total)` fires after each phase-1 group.
#[instrument(level = "info", skip_all, fields(articles = articles.len()))]
pub async fn summarize_articles<F>(
    ai: &dyn Completion,
    articles: &[Article],
    script: &TargetScript,
    mut on_progress: F,
) -> Vec<Summary>
where
    F: FnMut(usize, usize),
{
    let indexed: Vec<(usize, &Article)> = articles.iter().enumerate().collect();
    let batches: Vec<&[(usize, &Article)]> = indexed.chunks(BATCH_SIZE).collect();
    let total = batches.len();
    let mut results: Vec<Option<Summary>> = vec![None; articles.len()];

    // phase 1
    let mut done = 0usize;
    for group in batches.chunks(CONCURRENCY) {
        let replies = join_all(group.iter().map(|batch| summarize_batch(ai, batch))).await;
        for (index, summary) in replies.into_iter().flatten() {
            results[index] = Some(summary);
        }
        done += group.len();
        on_progress(done, total);
    }

    // phase 2
    let retry: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.as_ref().is_none_or(|s| script.rejects(s)))
        .map(|(i, _)| i)
        .collect();
    let mut recovered = 0usize;
    if !retry.is_empty() {
        info!(count = retry.len(), "Retrying summaries individually");
        for group in retry.chunks(CONCURRENCY) {
            let replies = join_all(group.iter().map(|&i| summarize_one(ai, &articles[i]))).await;
            for (&index, reply) in group.iter().zip(replies) {
                let Some(candidate) = reply else { continue };
                let take = results[index].is_none() || !script.rejects(&candidate);
                if take {
                    results[index] = Some(candidate);
                    recovered += 1;
                }
            }
        }
    }

    // phase 3
    let mut fallbacks = 0usize;
    let summaries: Vec<Summary> = results
        .into_iter()
        .zip(articles)
        .map(|(r, a)| {
            r.unwrap_or_else(|| {
                fallbacks += 1;
                fallback(a)
            })
        })
        .collect();
    info!(retried = retry.len(), recovered, fallbacks, "Summaries finished");
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedAi;
    use chrono::Utc;

    fn article(title: &str) -> Article {
        Article {
            title: title.to_string(),
            link: format!("https://a.test/{}", title.replace(' ', "-")),
            pub_date: Utc::now(),
            description: "x".repeat(300),
            source_name: "Test".to_string(),
            source_url: String::new(),
        }
    }

    #[test]
    fn test_target_script_default() {
        let script = TargetScript::default();
        assert!(script.matches("Rust 编译器"));
        assert!(!script.matches("Hello World"));
        let custom = TargetScript::new(r"[\p{Hiragana}\p{Katakana}]").unwrap();
        assert!(custom.matches("ラスト"));
        assert!(!custom.matches("Rust"));
    }

    #[tokio::test]
    async fn test_english_title_triggers_single_retry() {
        let input = vec![article("Alpha post"), article("Beta post")];
        let ai = ScriptedAi::new()
            .on(
                "Summarize this single article",
                r#"{"titleZh":"贝塔文章","summary":"中文摘要","reason":"值得一读"}"#,
            )
            .on(
                "For each article",
                r#"{"results":[
                    {"index":0,"titleZh":"阿尔法文章","summary":"这是摘要","reason":"好"},
                    {"index":1,"titleZh":"Hello World","summary":"这是摘要","reason":"好"}
                ]}"#,
            );

        let out = summarize_articles(&ai, &input, &TargetScript::default(), |_, _| {}).await;

        assert_eq!(ai.prompts_containing("Summarize this single article"), 1);
        assert_eq!(ai.prompts_containing("Title: Beta post"), 1);
        assert_eq!(ai.prompts_containing("Title: Alpha post"), 0);
        assert_eq!(out[0].title_zh, "阿尔法文章");
        assert_eq!(out[1].title_zh, "贝塔文章");
        assert_eq!(out[1].summary, "中文摘要");
    }

    #[tokio::test]
    async fn test_failed_retry_keeps_phase_one_result() {
        let input = vec![article("Gamma post")];
        let ai = ScriptedAi::new()
            .on("Summarize this single article", r#"{"titleZh":"Still English","summary":"nope"}"#)
            .on(
                "For each article",
                r#"{"results":[{"index":0,"titleZh":"Gamma","summary":"中文","reason":"r"}]}"#,
            );

        let out = summarize_articles(&ai, &input, &TargetScript::default(), |_, _| {}).await;
        assert_eq!(out[0].title_zh, "Gamma");
        assert_eq!(out[0].summary, "中文");
    }

    #[tokio::test]
    async fn test_gaps_fall_back_to_original() {
        let input: Vec<Article> = (0..7).map(|i| article(&format!("Post {i}"))).collect();
        let ai = ScriptedAi::new()
            .fail_on("Summarize this single article", 500)
            .fail_on("For each article", 503);

        let mut progress = Vec::new();
        let out = summarize_articles(&ai, &input, &TargetScript::default(), |d, t| progress.push((d, t))).await;

        assert_eq!(out.len(), 7);
        assert_eq!(progress, vec![(2, 2)]);
        assert_eq!(ai.prompts_containing("Summarize this single article"), 7);
        for (summary, article) in out.iter().zip(&input) {
            assert_eq!(summary.title_zh, article.title);
            assert_eq!(summary.summary.chars().count(), FALLBACK_SUMMARY_CHARS);
            assert_eq!(summary.reason, "");
        }
    }

    #[tokio::test]
    async fn test_retry_result_taken_when_no_phase_one_result() {
        let input = vec![article("Delta post")];
        let ai = ScriptedAi::new()
            .on("Summarize this single article", r#"{"titleZh":"Delta","summary":"English only","reason":""}"#)
            .on("For each article", r#"{"results":[]}"#);

        let out = summarize_articles(&ai, &input, &TargetScript::default(), |_, _| {}).await;
        assert_eq!(out[0].title_zh, "Delta");
        assert_eq!(out[0].summary, "English only");
    }

    #[tokio::test]
    async fn test_null_field_only_affects_its_entry() {
        let input = vec![article("Alpha post"), article("Beta post")];
        let ai = ScriptedAi::new()
            .on(
                "Summarize this single article",
                r#"{"titleZh":"重试标题","summary":"重试摘要","reason":"r"}"#,
            )
            .on(
                "For each article",
                r#"{"results":[
                    {"index":0,"titleZh":"阿尔法文章","summary":"这是摘要","reason":"好"},
                    {"index":"1","titleZh":"贝塔文章","summary":"另一个摘要","reason":null}
                ]}"#,
            );

        let out = summarize_articles(&ai, &input, &TargetScript::default(), |_, _| {}).await;

        assert_eq!(ai.prompts_containing("Summarize this single article"), 0);
        assert_eq!(out[0].title_zh, "阿尔法文章");
        assert_eq!(out[1].title_zh, "贝塔文章");
        assert_eq!(out[1].reason, "");
    }
}
