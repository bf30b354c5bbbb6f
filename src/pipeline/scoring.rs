//! Batched relevance/quality/timeliness scoring.
//!
//! Every input article receives exactly one [`Score`]: a failed call, an
//! unparseable reply or an index the model forgot all fall back to
//! [`Score::fallback`].

use crate::ai::{extract_json, Completion};
use crate::models::{Article, Category, Score};
use crate::utils::{truncate_chars, truncate_for_log};
use futures::future::join_all;
use serde_json::Value;
use tracing::{info, instrument, warn};

pub const BATCH_SIZE: usize = 10;
pub const CONCURRENCY: usize = 2;
const MAX_KEYWORDS: usize = 4;

/// Round and clamp a model-provided score into `1..=10`.
pub fn clamp_score(v: f64) -> u8 {
    if v.is_nan() {
        return 5;
    }
    v.round().clamp(1.0, 10.0) as u8
}

fn scoring_prompt(batch: &[(usize, &Article)]) -> String {
    let list = batch
        .iter()
        .map(|(i, a)| {
            format!(
                "Index {i}: [{}] {}\n{}",
                a.source_name,
                a.title,
                truncate_chars(&a.description, 300)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        r#"You are a technical content curator selecting articles for a daily digest read by software engineers.

Score each article below on three dimensions, each an integer from 1 to 10 (10 is best):
- relevance: value to people working in software, AI and the internet
- quality: depth and quality of the writing
- timeliness: how worth reading it is right now

Assign exactly one category: ai-ml, security, engineering, tools, opinion, other.
Extract 2-4 English keywords that best represent the topic.

## Articles
{list}

Reply with strict JSON only:
{{"results":[{{"index":0,"relevance":8,"quality":7,"timeliness":9,"category":"engineering","keywords":["Rust","compiler"]}}]}}"#
    )
}

fn number(v: &Value, key: &str) -> f64 {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn score_from(v: &Value) -> Score {
    let keywords = v
        .get("keywords")
        .and_then(Value::as_array)
        .map(|ks| {
            ks.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .take(MAX_KEYWORDS)
                .collect()
        })
        .unwrap_or_default();
    Score {
        relevance: clamp_score(number(v, "relevance")),
        quality: clamp_score(number(v, "quality")),
        timeliness: clamp_score(number(v, "timeliness")),
        category: Category::from_label(v.get("category").and_then(Value::as_str).unwrap_or("")),
        keywords,
    }
}

/// Pull `(index, score)` pairs out of a batch reply, keeping only indices
/// that belong to the batch.
fn parse_batch(reply: &str, batch: &[(usize, &Article)]) -> Option<Vec<(usize, Score)>> {
    let value = match extract_json(reply) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, reply = %truncate_for_log(reply, 200), "Unparseable scoring reply");
            return None;
        }
    };
    let results = value.get("results").and_then(Value::as_array)?;
    Some(
        results
            .iter()
            .filter_map(|r| {
                let index = r.get("index").and_then(Value::as_u64)? as usize;
                batch
                    .iter()
                    .any(|(i, _)| *i == index)
                    .then(|| (index, score_from(r)))
            })
            .collect(),
    )
}

async fn score_batch(ai: &dyn Completion, batch: &[(usize, &Article)]) -> Option<Vec<(usize, Score)>> {
    match ai.complete(&scoring_prompt(batch)).await {
        Ok(reply) => parse_batch(&reply, batch),
        Err(e) => {
            warn!(size = batch.len(), error = %e, "Scoring batch failed");
            None
        }
    }
}

/// Score every article. The result is index-aligned with `articles`.
///
/// `on_progress(batches_done, batches_total)` fires after each concurrency
/// group.
#[instrument(level = "info", skip_all, fields(articles = articles.len()))]
pub async fn score_articles<F>(ai: &dyn Completion, articles: &[Article], mut on_progress: F) -> Vec<Score>
where
    F: FnMut(usize, usize),
{
    let indexed: Vec<(usize, &Article)> = articles.iter().enumerate().collect();
    let batches: Vec<&[(usize, &Article)]> = indexed.chunks(BATCH_SIZE).collect();
    let total = batches.len();
    let mut scores: Vec<Option<Score>> = vec![None; articles.len()];
    let mut done = 0usize;
    let mut failed_batches = 0usize;

    for group in batches.chunks(CONCURRENCY) {
        let replies = join_all(group.iter().map(|batch| score_batch(ai, batch))).await;
        for reply in replies {
            match reply {
                Some(pairs) => {
                    for (index, score) in pairs {
                        scores[index] = Some(score);
                    }
                }
                None => failed_batches += 1,
            }
        }
        done += group.len();
        on_progress(done, total);
    }

    let missing = scores.iter().filter(|s| s.is_none()).count();
    info!(batches = total, failed_batches, fallback = missing, "Scoring finished");
    scores
        .into_iter()
        .map(|s| s.unwrap_or_else(Score::fallback))
        .collect()
}
