//! The AI-mediated digest stages.
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Dedup / window | [`dedup`] | filtered `Vec<Article>` |
//! | Scoring | [`scoring`] | one `Score` per article |
//! | Ranking | [`rank`] | top-N `(Article, Score)` pairs |
//! | Summarization | [`summarize`] | one `Summary` per ranked article |
//! | Highlights | [`highlights`] | narrative paragraph |

pub mod dedup;
pub mod highlights;
pub mod scoring;
pub mod summarize;

use crate::models::{Article, Score};

/// Order by total score, highest first, and keep `top_n`.
///
/// The sort is stable, so ties keep their feed order.
pub fn rank(articles: Vec<Article>, scores: Vec<Score>, top_n: usize) -> Vec<(Article, Score)> {
    let mut scored: Vec<(Article, Score)> = articles.into_iter().zip(scores).collect();
    scored.sort_by(|a, b| b.1.total().cmp(&a.1.total()));
    scored.truncate(top_n);
    scored
}
