//! Wire-level clients for the two request shapes.
//!
//! Every call runs under a hard deadline; when it fires the in-flight request
//! is dropped and the caller sees [`AiError::Timeout`].

use super::sse::{gemini_delta, openai_delta, SseData, SseDecoder};
use super::{AiError, Backend, Completion, TextStream};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, info, instrument, warn};

#[derive(Serialize, Debug)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize, Debug)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Direct HTTP client for one resolved [`Backend`].
#[derive(Clone)]
pub struct HttpCompletion {
    http: Client,
    api_key: String,
    backend: Backend,
    deadline: Duration,
}

impl std::fmt::Debug for HttpCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletion")
            .field("backend", &self.backend)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl HttpCompletion {
    pub fn new(api_key: &str, backend: Backend, deadline: Duration) -> Result<Self, AiError> {
        let http = Client::builder()
            .user_agent(concat!("daily-digest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            backend,
            deadline,
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn request(&self, prompt: &str, stream: bool) -> RequestBuilder {
        match &self.backend {
            Backend::Gemini { base_url, model } => {
                let base = base_url.trim_end_matches('/');
                let (method, temperature, top_p, top_k, max_tokens) = if stream {
                    ("streamGenerateContent", 0.4, 0.9, None, Some(8192))
                } else {
                    ("generateContent", 0.3, 0.8, Some(40), None)
                };
                let url = format!("{base}/models/{model}:{method}");
                let mut req = self.http.post(url).query(&[("key", self.api_key.as_str())]);
                if stream {
                    req = req.query(&[("alt", "sse")]);
                }
                req.json(&GeminiRequest {
                    contents: vec![GeminiContent {
                        parts: vec![GeminiPart { text: prompt }],
                    }],
                    generation_config: GeminiGenerationConfig {
                        temperature,
                        top_p,
                        top_k,
                        max_output_tokens: max_tokens,
                    },
                })
            }
            Backend::OpenAiCompatible { base_url, model } => {
                let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
                let (temperature, max_tokens) = if stream { (0.4, 8192) } else { (0.3, 4096) };
                self.http.post(url).bearer_auth(&self.api_key).json(&ChatRequest {
                    model,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: prompt,
                    }],
                    temperature,
                    max_tokens,
                    stream,
                })
            }
        }
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<Response, AiError> {
        let response = self.request(prompt, stream).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Http {
                status: status.as_u16(),
                body: truncate_for_log(&body, 200),
            });
        }
        Ok(response)
    }

    async fn complete_inner(&self, prompt: &str) -> Result<String, AiError> {
        let response = self.send(prompt, false).await?;
        match &self.backend {
            Backend::Gemini { .. } => {
                let body: Value = response.json().await?;
                Ok(body
                    .pointer("/candidates/0/content/parts/0/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string())
            }
            Backend::OpenAiCompatible { .. } => {
                let body: ChatResponse = response.json().await?;
                Ok(body
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default())
            }
        }
    }
}

#[async_trait]
impl Completion for HttpCompletion {
    #[instrument(level = "info", skip_all, fields(model = %self.backend.model()))]
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        let t0 = Instant::now();
        let res = match timeout(self.deadline, self.complete_inner(prompt)).await {
            Ok(res) => res,
            Err(_) => Err(AiError::Timeout(self.deadline)),
        };
        let dt = t0.elapsed();
        match &res {
            Ok(text) => debug!(elapsed_ms = dt.as_millis() as u64, bytes = text.len(), "AI call succeeded"),
            Err(e) => warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "AI call failed"),
        }
        res
    }

    #[instrument(level = "info", skip_all, fields(model = %self.backend.model()))]
    async fn stream(&self, prompt: &str) -> Result<TextStream, AiError> {
        let deadline = tokio::time::Instant::now() + self.deadline;
        let response = match timeout_at(deadline, self.send(prompt, true)).await {
            Ok(res) => res?,
            Err(_) => return Err(AiError::Timeout(self.deadline)),
        };

        let extract: fn(&str) -> Option<String> = match self.backend {
            Backend::Gemini { .. } => gemini_delta,
            Backend::OpenAiCompatible { .. } => openai_delta,
        };
        let limit = self.deadline;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let pump = pump_sse(response, extract, &tx);
            match timeout_at(deadline, pump).await {
                Ok(Ok(pieces)) => info!(pieces, "AI stream finished"),
                Ok(Err(e)) => {
                    warn!(error = %e, "AI stream failed");
                    let _ = tx.send(Err(e)).await;
                }
                Err(_) => {
                    warn!(?limit, "AI stream timed out");
                    let _ = tx.send(Err(AiError::Timeout(limit))).await;
                }
            }
        });
        Ok(rx)
    }
}

/// Read the SSE body, forwarding each text delta. Returns the delta count.
async fn pump_sse(
    response: Response,
    extract: fn(&str) -> Option<String>,
    tx: &mpsc::Sender<Result<String, AiError>>,
) -> Result<usize, AiError> {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut sent = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for data in decoder.push(&chunk) {
            match data {
                SseData::Done => return Ok(sent),
                SseData::Payload(payload) => {
                    if let Some(delta) = extract(&payload) {
                        if tx.send(Ok(delta)).await.is_err() {
                            debug!("Stream receiver dropped; stopping");
                            return Ok(sent);
                        }
                        sent += 1;
                    }
                }
            }
        }
    }
    if let Some(SseData::Payload(payload)) = decoder.finish() {
        if let Some(delta) = extract(&payload) {
            let _ = tx.send(Ok(delta)).await;
            sent += 1;
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ApiOptions, GEMINI_DEFAULT_MODEL};
    use httpmock::prelude::*;
    use serde_json::json;

    fn gemini_at(server: &MockServer) -> HttpCompletion {
        let opts = ApiOptions::new("", &server.url("/v1beta"), "");
        let backend = Backend::select("AIzaFAKE", &opts);
        HttpCompletion::new("AIzaFAKE", backend, Duration::from_secs(5)).unwrap()
    }

    fn openai_at(server: &MockServer) -> HttpCompletion {
        let opts = ApiOptions::new("custom", &server.url("/v1"), "test-model");
        let backend = Backend::select("sk-test", &opts);
        HttpCompletion::new("sk-test", backend, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_gemini_key_routes_to_gemini_endpoint() {
        let server = MockServer::start_async().await;
        let path = format!("/v1beta/models/{GEMINI_DEFAULT_MODEL}:generateContent");
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(path.as_str()).query_param("key", "AIzaFAKE");
                then.status(200).json_body(json!({
                    "candidates": [{"content": {"parts": [{"text": "OK"}]}}]
                }));
            })
            .await;

        let client = gemini_at(&server);
        assert!(matches!(client.backend(), Backend::Gemini { .. }));
        let text = client.complete("ping").await.unwrap();
        assert_eq!(text, "OK");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_shape_and_bearer_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_includes(r#"{"model":"test-model"}"#);
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "hi"}}]
                }));
            })
            .await;

        let text = openai_at(&server).complete("ping").await.unwrap();
        assert_eq!(text, "hi");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_carries_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let err = openai_at(&server).complete("ping").await.unwrap_err();
        match err {
            AiError::Http { status, ref body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"choices": []}));
            })
            .await;

        let opts = ApiOptions::new("custom", &server.url("/v1"), "m");
        let client = HttpCompletion::new("sk", Backend::select("sk", &opts), Duration::from_millis(50)).unwrap();
        let err = client.complete("ping").await.unwrap_err();
        assert!(matches!(err, AiError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_openai_stream_skips_malformed_fragments() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {broken\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .json_body_includes(r#"{"stream":true}"#);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let mut rx = openai_at(&server).stream("ping").await.unwrap();
        let mut text = String::new();
        while let Some(piece) = rx.recv().await {
            text.push_str(&piece.unwrap());
        }
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_gemini_stream_uses_sse_endpoint() {
        let server = MockServer::start_async().await;
        let path = format!("/v1beta/models/{GEMINI_DEFAULT_MODEL}:streamGenerateContent");
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"你\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"好\"}]}}]}\r\n\r\n",
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path(path.as_str()).query_param("alt", "sse");
                then.status(200).body(body);
            })
            .await;

        let mut rx = gemini_at(&server).stream("ping").await.unwrap();
        let mut text = String::new();
        while let Some(piece) = rx.recv().await {
            text.push_str(&piece.unwrap());
        }
        assert_eq!(text, "你好");
    }
}
