//! The "today's highlights" paragraph.

use crate::ai::Completion;
use crate::models::DigestArticle;
use crate::utils::truncate_chars;
use tracing::{instrument, warn};

const MAX_ARTICLES: usize = 10;

fn highlights_prompt(articles: &[DigestArticle]) -> String {
    let list = articles
        .iter()
        .take(MAX_ARTICLES)
        .enumerate()
        .map(|(i, a)| {
            let title = if a.title_zh.is_empty() { &a.title } else { &a.title_zh };
            format!(
                "{}. [{}] {} - {}",
                i + 1,
                a.category.as_str(),
                title,
                truncate_chars(&a.summary, 100)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Based on today's selected technology articles below, write a 3-5 sentence \"today's highlights\" \
overview in Simplified Chinese. Identify the 2-3 main trends or topics instead of listing articles one \
by one, in a concise news-lede style.\n\nArticles:\n{list}\n\nReturn plain text only: no JSON, no Markdown."
    )
}

/// One call over the top articles. Any failure yields an empty string.
#[instrument(level = "info", skip_all, fields(articles = articles.len()))]
pub async fn generate_highlights(ai: &dyn Completion, articles: &[DigestArticle]) -> String {
    if articles.is_empty() {
        return String::new();
    }
    match ai.complete(&highlights_prompt(articles)).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(error = %e, "Highlights failed");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedAi;
    use crate::models::{Article, Score, Summary};
    use chrono::Utc;

    fn rows(n: usize) -> Vec<DigestArticle> {
        (0..n)
            .map(|i| {
                let article = Article {
                    title: format!("Story {i}"),
                    link: format!("https://a.test/{i}"),
                    pub_date: Utc::now(),
                    description: String::new(),
                    source_name: "Test".to_string(),
                    source_url: String::new(),
                };
                let summary = Summary {
                    title_zh: format!("故事 {i}"),
                    summary: "摘要".to_string(),
                    reason: String::new(),
                };
                DigestArticle::assemble(&article, &Score::fallback(), summary)
            })
            .collect()
    }

    #[test]
    fn test_prompt_uses_first_ten() {
        let prompt = highlights_prompt(&rows(12));
        assert!(prompt.contains("10. [other] 故事 9"));
        assert!(!prompt.contains("故事 10"));
    }

    #[tokio::test]
    async fn test_trimmed_reply() {
        let ai = ScriptedAi::new().on("highlights", "  今天的重点是 Rust。\n");
        assert_eq!(generate_highlights(&ai, &rows(3)).await, "今天的重点是 Rust。");
    }

    #[tokio::test]
    async fn test_failure_is_empty() {
        let ai = ScriptedAi::new().fail_on("highlights", 500);
        assert_eq!(generate_highlights(&ai, &rows(3)).await, "");
        assert_eq!(generate_highlights(&ai, &[]).await, "");
    }
}
