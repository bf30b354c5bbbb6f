//! Data models shared by the digest pipeline, storage and HTTP surface.
//!
//! - [`FeedSource`]: one RSS/Atom source to poll
//! - [`Article`]: a normalized feed entry, pipeline-scoped
//! - [`Score`] / [`Category`]: scoring output for one article
//! - [`Summary`]: summarization output for one article
//! - [`Digest`] / [`DigestArticle`]: the persisted daily artifact
//! - [`Translation`]: a cached full-article translation
//!
//! Persisted types serialize with camelCase field names because that is the
//! shape the browser client reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feed to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    /// Display name, also stamped on every article from this feed.
    pub name: String,
    /// URL of the RSS/Atom document.
    pub xml_url: String,
    /// Homepage of the site.
    #[serde(default)]
    pub html_url: String,
}

impl FeedSource {
    pub fn new(name: &str, xml_url: &str, html_url: &str) -> Self {
        Self {
            name: name.to_string(),
            xml_url: xml_url.to_string(),
            html_url: html_url.to_string(),
        }
    }
}

/// A normalized feed entry.
///
/// Articles without a parseable date carry [`DateTime::UNIX_EPOCH`] so that
/// they sort last and fall outside any recency window.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub description: String,
    pub source_name: String,
    pub source_url: String,
}

/// Topic bucket assigned during scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    AiMl,
    Security,
    Engineering,
    Tools,
    Opinion,
    #[default]
    Other,
}

impl Category {
    /// Map a model-provided label onto the fixed set; anything unknown is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "ai-ml" => Self::AiMl,
            "security" => Self::Security,
            "engineering" => Self::Engineering,
            "tools" => Self::Tools,
            "opinion" => Self::Opinion,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiMl => "ai-ml",
            Self::Security => "security",
            Self::Engineering => "engineering",
            Self::Tools => "tools",
            Self::Opinion => "opinion",
            Self::Other => "other",
        }
    }
}

/// Scores for one article. Each dimension is an integer in `1..=10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub relevance: u8,
    pub quality: u8,
    pub timeliness: u8,
    pub category: Category,
    pub keywords: Vec<String>,
}

impl Score {
    /// The score given to articles whose batch failed.
    pub fn fallback() -> Self {
        Self {
            relevance: 5,
            quality: 5,
            timeliness: 5,
            category: Category::Other,
            keywords: Vec::new(),
        }
    }

    pub fn total(&self) -> u32 {
        u32::from(self.relevance) + u32::from(self.quality) + u32::from(self.timeliness)
    }
}

/// Translated title, summary and "why read it" line for one article.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(default)]
    pub title_zh: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reason: String,
}

/// Lifecycle of a persisted digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestStatus {
    Generating,
    Done,
    Error,
}

/// A ranked, summarized article as stored in a digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestArticle {
    pub title: String,
    pub title_zh: String,
    pub link: String,
    pub source_name: String,
    pub source_url: String,
    /// RFC 3339 publication time.
    pub pub_date: String,
    pub description: String,
    pub summary: String,
    pub reason: String,
    pub category: Category,
    pub keywords: Vec<String>,
    pub score: u32,
    pub score_relevance: u8,
    pub score_quality: u8,
    pub score_timeliness: u8,
}

impl DigestArticle {
    pub fn assemble(article: &Article, score: &Score, summary: Summary) -> Self {
        Self {
            title: article.title.clone(),
            title_zh: summary.title_zh,
            link: article.link.clone(),
            source_name: article.source_name.clone(),
            source_url: article.source_url.clone(),
            pub_date: article.pub_date.to_rfc3339(),
            description: article.description.clone(),
            summary: summary.summary,
            reason: summary.reason,
            category: score.category,
            keywords: score.keywords.clone(),
            score: score.total(),
            score_relevance: score.relevance,
            score_quality: score.quality,
            score_timeliness: score.timeliness,
        }
    }
}

/// The persisted artifact of one generation run, keyed by calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub status: DigestStatus,
    /// Recency window used for the run, in hours.
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub total_feeds: usize,
    #[serde(default)]
    pub success_feeds: usize,
    #[serde(default)]
    pub total_articles: usize,
    #[serde(default)]
    pub filtered_articles: usize,
    #[serde(default)]
    pub highlights: String,
    #[serde(default)]
    pub articles: Vec<DigestArticle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Digest {
    /// A fresh `generating` placeholder for `date`.
    pub fn placeholder(date: &str, hours: u32, total_feeds: usize, now: DateTime<Utc>) -> Self {
        Self {
            date: date.to_string(),
            status: DigestStatus::Generating,
            hours,
            total_feeds,
            success_feeds: 0,
            total_articles: 0,
            filtered_articles: 0,
            highlights: String::new(),
            articles: Vec::new(),
            share_token: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Row of the digest history listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestListing {
    pub date: String,
    pub status: DigestStatus,
    pub total_articles: usize,
    pub filtered_articles: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Digest> for DigestListing {
    fn from(d: &Digest) -> Self {
        Self {
            date: d.date.clone(),
            status: d.status,
            total_articles: d.total_articles,
            filtered_articles: d.filtered_articles,
            created_at: d.created_at,
        }
    }
}

/// Aggregate counters over all stored digests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestStats {
    pub total_digests: usize,
    pub total_articles: usize,
    pub latest_date: Option<String>,
    pub latest_status: Option<DigestStatus>,
}

/// A cached full-article translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub title_zh: String,
    pub summary: String,
    pub content: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
