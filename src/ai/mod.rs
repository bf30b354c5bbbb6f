//! Uniform LLM client over Gemini-shaped and OpenAI-shaped endpoints.
//!
//! # Architecture
//!
//! - [`Completion`]: the single capability every backend offers, a one-shot
//!   `complete` and an incremental `stream`
//! - [`client::HttpCompletion`]: talks to the wire, enforces the hard timeout
//! - [`retry::RetryCompletion`]: decorator that retries transient failures on a
//!   fixed backoff schedule
//! - [`Backend`]: which request shape to use, chosen by [`Backend::select`]
//!
//! Callers normally go through [`connect`], which stacks the pieces.

pub mod client;
pub mod json;
pub mod retry;
pub mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use json::{extract_json, parse_json, JsonExtractError};

/// Hard ceiling on a single AI call, including streamed responses.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Key prefix used to recognize Google API keys when no preset is given.
pub const GEMINI_KEY_PREFIX: &str = "AIza";

/// Incremental text deltas from a streamed completion.
pub type TextStream = mpsc::Receiver<Result<String, AiError>>;

/// Errors surfaced by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("AI request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl AiError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Timeouts, refused/reset connections, DNS failures and HTTP
    /// 429/500/502/503 qualify; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503),
            Self::Transport(e) => {
                e.is_timeout() || e.is_connect() || io_kind(e).is_some_and(is_transient_io)
            }
            Self::MissingApiKey | Self::Decode(_) => false,
        }
    }
}

fn io_kind(e: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }
    None
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

/// Something that turns a prompt into model text.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Send `prompt` and wait for the whole reply.
    async fn complete(&self, prompt: &str) -> Result<String, AiError>;

    /// Send `prompt` and receive the reply as it is generated.
    async fn stream(&self, prompt: &str) -> Result<TextStream, AiError>;
}

/// Caller-facing backend options. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOptions {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ApiOptions {
    pub fn new(preset: &str, base_url: &str, model: &str) -> Self {
        Self {
            preset: non_empty(preset).filter(|p| p != "auto"),
            base_url: non_empty(base_url),
            model: non_empty(model),
        }
    }

    fn preset(&self) -> Option<&str> {
        self.preset
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "auto")
    }

    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Request shape a preset speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Gemini,
    OpenAi,
}

/// A named backend with its defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    #[serde(rename = "baseURL")]
    pub base_url: &'static str,
    pub default_model: &'static str,
    #[serde(rename = "type")]
    pub shape: Shape,
}

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const PRESETS: &[Preset] = &[
    Preset {
        id: "gemini",
        name: "Google Gemini",
        base_url: GEMINI_BASE_URL,
        default_model: GEMINI_DEFAULT_MODEL,
        shape: Shape::Gemini,
    },
    Preset {
        id: "doubao",
        name: "Doubao",
        base_url: "https://ark.cn-beijing.volces.com/api/v3",
        default_model: "doubao-seed-1-6-251015",
        shape: Shape::OpenAi,
    },
    Preset {
        id: "openai",
        name: "OpenAI",
        base_url: OPENAI_BASE_URL,
        default_model: OPENAI_DEFAULT_MODEL,
        shape: Shape::OpenAi,
    },
    Preset {
        id: "custom",
        name: "Custom OpenAI-compatible",
        base_url: "",
        default_model: "",
        shape: Shape::OpenAi,
    },
];

pub fn preset(id: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// Resolved endpoint for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Gemini { base_url: String, model: String },
    OpenAiCompatible { base_url: String, model: String },
}

impl Backend {
    /// Pick the backend for a key and options.
    ///
    /// `gemini` preset, or no preset with a Google-style key, selects Gemini.
    /// Everything else is OpenAI-compatible, with named presets supplying the
    /// base URL and model when the options leave them unset.
    pub fn select(api_key: &str, opts: &ApiOptions) -> Self {
        let preset_id = opts.preset();
        let gemini = match preset_id {
            Some(id) => id == "gemini",
            None => api_key.starts_with(GEMINI_KEY_PREFIX),
        };

        if gemini {
            return Self::Gemini {
                base_url: opts.base_url().unwrap_or(GEMINI_BASE_URL).to_string(),
                model: opts.model().unwrap_or(GEMINI_DEFAULT_MODEL).to_string(),
            };
        }

        let defaults = preset_id
            .and_then(preset)
            .filter(|p| p.shape == Shape::OpenAi && !p.base_url.is_empty());
        let base_url = opts
            .base_url()
            .or(defaults.map(|p| p.base_url))
            .unwrap_or(OPENAI_BASE_URL);
        let model = opts
            .model()
            .or(defaults.map(|p| p.default_model))
            .unwrap_or(OPENAI_DEFAULT_MODEL);
        Self::OpenAiCompatible {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Gemini { model, .. } | Self::OpenAiCompatible { model, .. } => model,
        }
    }
}

/// Build the production gateway: HTTP backend wrapped in the retry policy.
pub fn connect(api_key: &str, opts: &ApiOptions) -> Result<Arc<dyn Completion>, AiError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(AiError::MissingApiKey);
    }
    let backend = Backend::select(api_key, opts);
    let http = client::HttpCompletion::new(api_key, backend, REQUEST_TIMEOUT)?;
    Ok(Arc::new(retry::RetryCompletion::standard(http)))
}

/// Send a trivial prompt and report whether the backend answered.
pub async fn test_connection(ai: &dyn Completion) -> Result<(), AiError> {
    let reply = ai.complete("Hello, respond with \"OK\"").await?;
    if reply.trim().is_empty() {
        return Err(AiError::Decode("empty response from API".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process backend for pipeline tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies are matched to prompts by the first rule whose needle the
    /// prompt contains; rules may hold a queue of replies, the last of which
    /// repeats.
    #[derive(Default)]
    pub struct ScriptedAi {
        rules: Mutex<Vec<(String, VecDeque<Result<String, u16>>)>>,
        pub prompts: Mutex<Vec<String>>,
        pub stream_calls: AtomicUsize,
    }

    impl ScriptedAi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reply `text` to prompts containing `needle`.
        pub fn on(self, needle: &str, text: &str) -> Self {
            self.push(needle, Ok(text.to_string()))
        }

        /// Fail prompts containing `needle` with HTTP `status`.
        pub fn fail_on(self, needle: &str, status: u16) -> Self {
            self.push(needle, Err(status))
        }

        fn push(self, needle: &str, reply: Result<String, u16>) -> Self {
            {
                let mut rules = self.rules.lock().unwrap();
                match rules.iter_mut().find(|(n, _)| n == needle) {
                    Some((_, queue)) => queue.push_back(reply),
                    None => rules.push((needle.to_string(), VecDeque::from([reply]))),
                }
            }
            self
        }

        pub fn streams(&self) -> usize {
            self.stream_calls.load(Ordering::SeqCst)
        }

        pub fn prompts_containing(&self, needle: &str) -> usize {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.contains(needle))
                .count()
        }

        fn reply(&self, prompt: &str) -> Result<String, AiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut rules = self.rules.lock().unwrap();
            let Some((_, queue)) = rules.iter_mut().find(|(n, _)| prompt.contains(n.as_str()))
            else {
                return Err(AiError::Decode("no scripted reply".to_string()));
            };
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(status)) => Err(AiError::Http {
                    status,
                    body: "scripted failure".to_string(),
                }),
                None => Err(AiError::Decode("no scripted reply".to_string())),
            }
        }
    }

    #[async_trait]
    impl Completion for ScriptedAi {
        async fn complete(&self, prompt: &str) -> Result<String, AiError> {
            self.reply(prompt)
        }

        /// Streams the scripted reply in 7-character pieces.
        async fn stream(&self, prompt: &str) -> Result<TextStream, AiError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let text = self.reply(prompt)?;
            let (tx, rx) = mpsc::channel(1024);
            let chars: Vec<char> = text.chars().collect();
            for piece in chars.chunks(7) {
                let _ = tx.try_send(Ok(piece.iter().collect()));
            }
            Ok(rx)
        }
    }
}
