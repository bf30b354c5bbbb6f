//! Recovering JSON from model replies.
//!
//! Models wrap JSON in Markdown fences or surround it with prose. These
//! helpers peel that away but never invent a value: when nothing parses the
//! caller gets a [`JsonExtractError`] to fall back on.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z]*[ \t]*\r?\n?").unwrap());
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("reply contained no JSON value")]
    NotFound,

    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Remove a surrounding ```` ```json ... ``` ```` fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    if !t.starts_with("```") {
        return t;
    }
    let start = FENCE_OPEN.find(t).map_or(0, |m| m.end());
    let body = &t[start..];
    let end = FENCE_CLOSE.find(body).map_or(body.len(), |m| m.start());
    body[..end].trim()
}

/// Parse the JSON value in a model reply.
///
/// Tries the fence-stripped text first, then the span from the first `{`/`[`
/// to the last matching closer.
pub fn extract_json(text: &str) -> Result<Value, JsonExtractError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(JsonExtractError::NotFound);
    }
    let direct = serde_json::from_str::<Value>(body);
    if let Ok(value) = direct {
        return Ok(value);
    }

    let Some(start) = body.find(['{', '[']) else {
        return Err(JsonExtractError::NotFound);
    };
    let closer = if body[start..].starts_with('{') { '}' } else { ']' };
    let Some(end) = body.rfind(closer).filter(|&end| end > start) else {
        return Err(JsonExtractError::NotFound);
    };
    Ok(serde_json::from_str(&body[start..=end])?)
}

/// [`extract_json`] followed by a typed conversion.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, JsonExtractError> {
    let value = extract_json(text)?;
    Ok(serde_json::from_value(value)?)
}
