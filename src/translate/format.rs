//! The line-delimited translation reply format.
//!
//! ```text
//! TITLE_ZH: <translated title>
//! SUMMARY_ZH: <2-3 sentence summary>
//! ---CONTENT---
//! <translated body ...>
//! ```
//!
//! [`StructuredParser`] consumes the reply incrementally: until the content
//! marker arrives it buffers, afterwards every delta passes straight through.

pub const TITLE_PREFIX: &str = "TITLE_ZH:";
pub const SUMMARY_PREFIX: &str = "SUMMARY_ZH:";
pub const CONTENT_MARKER: &str = "---CONTENT---";

/// Something the parser can report as soon as it is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatEvent {
    Meta { title_zh: String, summary: String },
    Chunk(String),
}

/// A fully parsed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Structured {
    pub title_zh: String,
    pub summary: String,
    pub content: String,
}

#[derive(Debug)]
enum ParseState {
    AwaitingMeta,
    InContent,
}

#[derive(Debug)]
pub struct StructuredParser {
    state: ParseState,
    /// Unconsumed header bytes while awaiting the marker.
    pending: String,
    title_zh: String,
    summary: String,
    content: String,
    /// Content arrived but a leading newline may still need stripping.
    at_content_start: bool,
}

impl Default for StructuredParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::AwaitingMeta,
            pending: String::new(),
            title_zh: String::new(),
            summary: String::new(),
            content: String::new(),
            at_content_start: false,
        }
    }

    pub fn has_meta(&self) -> bool {
        matches!(self.state, ParseState::InContent)
    }

    /// Feed a delta and collect whatever became known.
    pub fn push(&mut self, delta: &str) -> Vec<FormatEvent> {
        match self.state {
            ParseState::InContent => self.content_delta(delta).into_iter().collect(),
            ParseState::AwaitingMeta => {
                // only the tail that could still hold a partial marker is rescanned
                let mut from = self.pending.len().saturating_sub(CONTENT_MARKER.len() - 1);
                while !self.pending.is_char_boundary(from) {
                    from -= 1;
                }
                self.pending.push_str(delta);
                let Some(pos) = self.pending[from..].find(CONTENT_MARKER).map(|p| p + from) else {
                    return Vec::new();
                };

                let rest = self.pending.split_off(pos + CONTENT_MARKER.len());
                self.pending.truncate(pos);
                let (title_zh, summary) = parse_header(&self.pending);
                self.pending.clear();
                self.title_zh = title_zh.clone();
                self.summary = summary.clone();
                self.state = ParseState::InContent;
                self.at_content_start = true;

                let mut events = vec![FormatEvent::Meta { title_zh, summary }];
                events.extend(self.content_delta(&rest));
                events
            }
        }
    }

    fn content_delta(&mut self, delta: &str) -> Option<FormatEvent> {
        let piece = if self.at_content_start {
            let trimmed = delta.trim_start_matches([' ', '\t', '\r', '\n']);
            if trimmed.is_empty() {
                return None;
            }
            self.at_content_start = false;
            trimmed
        } else {
            delta
        };
        if piece.is_empty() {
            return None;
        }
        self.content.push_str(piece);
        Some(FormatEvent::Chunk(piece.to_string()))
    }

    /// End of input. A reply that never produced the marker is parsed as a
    /// header followed by free text.
    pub fn finish(self) -> Structured {
        match self.state {
            ParseState::InContent => Structured {
                title_zh: self.title_zh,
                summary: self.summary,
                content: self.content.trim_end().to_string(),
            },
            ParseState::AwaitingMeta => parse_unmarked(&self.pending),
        }
    }
}

/// Parse a complete reply.
pub fn parse_structured(text: &str) -> Structured {
    let mut parser = StructuredParser::new();
    parser.push(text);
    parser.finish()
}

#[derive(Clone, Copy)]
enum Field {
    None,
    Title,
    Summary,
}

fn strip_field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let key = prefix.trim_end_matches(':');
    let rest = line.strip_prefix(key)?;
    rest.strip_prefix(':')
        .or_else(|| rest.strip_prefix('\u{FF1A}'))
        .map(|v| v.trim_start_matches('*').trim())
}

fn parse_header(header: &str) -> (String, String) {
    let (title, summary, _) = scan_header(header);
    (title, summary)
}

/// Returns title, summary and every line that belonged to neither.
fn scan_header(text: &str) -> (String, String, Vec<&str>) {
    let mut title = String::new();
    let mut summary = String::new();
    let mut other = Vec::new();
    let mut field = Field::None;

    for line in text.lines() {
        let trimmed = line.trim().trim_start_matches(['*', '#', ' ']);
        if let Some(v) = strip_field(trimmed, TITLE_PREFIX) {
            title = v.to_string();
            field = Field::Title;
        } else if let Some(v) = strip_field(trimmed, SUMMARY_PREFIX) {
            summary = v.to_string();
            field = Field::Summary;
        } else if trimmed.is_empty() {
            if !matches!(field, Field::None) {
                field = Field::None;
            } else {
                other.push(line);
            }
        } else {
            match field {
                Field::Summary => {
                    summary.push(' ');
                    summary.push_str(trimmed);
                }
                Field::Title | Field::None => {
                    field = Field::None;
                    other.push(line);
                }
            }
        }
    }
    (title, summary, other)
}

fn parse_unmarked(text: &str) -> Structured {
    let (title_zh, summary, other) = scan_header(text);
    Structured {
        title_zh,
        summary,
        content: other.join("\n").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "TITLE_ZH: 用 Rust 重写\nSUMMARY_ZH: 第一句。\n第二句。\n---CONTENT---\n第一段。\n\n第二段。\n";

    fn chunks(events: &[FormatEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                FormatEvent::Chunk(c) => Some(c.as_str()),
                FormatEvent::Meta { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_structured() {
        let s = parse_structured(REPLY);
        assert_eq!(s.title_zh, "用 Rust 重写");
        assert_eq!(s.summary, "第一句。 第二句。");
        assert_eq!(s.content, "第一段。\n\n第二段。");
    }

    #[test]
    fn test_incremental_matches_whole() {
        // feed three characters at a time so the marker and multi-byte
        // characters straddle pushes
        let chars: Vec<char> = REPLY.chars().collect();
        let mut parser = StructuredParser::new();
        let mut events = Vec::new();
        for piece in chars.chunks(3) {
            events.extend(parser.push(&piece.iter().collect::<String>()));
        }
        let metas: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, FormatEvent::Meta { .. }))
            .collect();
        assert_eq!(metas.len(), 1);
        assert!(matches!(&events[0], FormatEvent::Meta { title_zh, .. } if title_zh == "用 Rust 重写"));
        assert_eq!(chunks(&events).trim_end(), "第一段。\n\n第二段。");
        assert_eq!(parser.finish(), parse_structured(REPLY));
    }

    #[test]
    fn test_meta_emitted_before_any_chunk() {
        let mut parser = StructuredParser::new();
        assert!(parser.push("TITLE_ZH: 标题\nSUMMARY_ZH: 摘要\n---CONT").is_empty());
        assert!(!parser.has_meta());
        let events = parser.push("ENT---\n正文");
        assert_eq!(
            events,
            vec![
                FormatEvent::Meta {
                    title_zh: "标题".to_string(),
                    summary: "摘要".to_string()
                },
                FormatEvent::Chunk("正文".to_string()),
            ]
        );
        assert_eq!(parser.push("继续"), vec![FormatEvent::Chunk("继续".to_string())]);
    }

    #[test]
    fn test_full_width_colon_and_markdown_noise() {
        let s = parse_structured("**TITLE_ZH：** 标题\nSUMMARY_ZH：摘要\n---CONTENT---\n正文");
        assert_eq!(s.title_zh, "标题");
        assert_eq!(s.summary, "摘要");
        assert_eq!(s.content, "正文");
    }

    #[test]
    fn test_missing_marker() {
        let s = parse_structured("TITLE_ZH: 标题\nSUMMARY_ZH: 摘要\n\n正文第一段\n\n正文第二段");
        assert_eq!(s.title_zh, "标题");
        assert_eq!(s.summary, "摘要");
        assert_eq!(s.content, "正文第一段\n\n正文第二段");

        let plain = parse_structured("只有正文");
        assert_eq!(plain.title_zh, "");
        assert_eq!(plain.content, "只有正文");
    }
}
