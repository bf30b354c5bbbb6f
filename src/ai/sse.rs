//! Incremental server-sent-events decoding for streamed completions.
//!
//! Network reads split lines (and UTF-8 sequences) at arbitrary points, so
//! bytes are buffered until a newline arrives and only complete lines are
//! decoded.

use serde_json::Value;
use tracing::debug;

/// Line-buffering SSE decoder yielding `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

/// One decoded SSE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Payload(String),
    Done,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns payloads from every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = decode_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<SseData> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<SseData> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseData::Done);
    }
    Some(SseData::Payload(payload.to_string()))
}

/// Text delta from an OpenAI chat-completions chunk.
///
/// Malformed fragments yield `None` instead of aborting the stream.
pub fn openai_delta(payload: &str) -> Option<String> {
    delta_at(payload, "/choices/0/delta/content")
}

/// Text delta from a Gemini `streamGenerateContent` chunk.
pub fn gemini_delta(payload: &str) -> Option<String> {
    delta_at(payload, "/candidates/0/content/parts/0/text")
}

fn delta_at(payload: &str, pointer: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, bytes = payload.len(), "Skipping malformed stream fragment");
            return None;
        }
    };
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
