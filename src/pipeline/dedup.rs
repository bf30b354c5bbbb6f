//! Duplicate collapsing and recency windowing.

use crate::models::Article;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;

/// Dedup identity: trailing slashes stripped, case-folded.
pub fn normalize_link(link: &str) -> String {
    link.trim().trim_end_matches('/').to_lowercase()
}

/// Drop repeated links, keeping the first occurrence and input order.
/// Articles whose link normalizes to nothing are dropped too.
pub fn dedupe(articles: Vec<Article>) -> Vec<Article> {
    articles
        .into_iter()
        .filter(|a| !normalize_link(&a.link).is_empty())
        .unique_by(|a| normalize_link(&a.link))
        .collect()
}

/// Keep articles published strictly after `now - hours`.
pub fn within_window(articles: Vec<Article>, hours: u32, now: DateTime<Utc>) -> Vec<Article> {
    let cutoff = now - Duration::hours(i64::from(hours));
    articles.into_iter().filter(|a| a.pub_date > cutoff).collect()
}
