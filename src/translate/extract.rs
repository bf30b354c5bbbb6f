//! Readable-text extraction from article pages.

use scraper::{ElementRef, Html, Selector};

/// Boilerplate skipped during the text walk.
const NOISE: &[&str] = &[
    "script",
    "style",
    "noscript",
    "iframe",
    "svg",
    "form",
    "nav",
    "header",
    "footer",
    "aside",
    ".nav",
    ".header",
    ".footer",
    ".sidebar",
    ".ad",
    ".ads",
    ".advertisement",
    ".cookie",
    "#cookie",
    "[class*=\"banner\"]",
    "[class*=\"popup\"]",
    "[class*=\"subscribe\"]",
    "[class*=\"newsletter\"]",
];

/// Content containers, most specific first.
const CONTAINERS: &[&str] = &[
    "article",
    "[itemprop=\"articleBody\"]",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".content-body",
    ".post-body",
    ".article-body",
    "main",
    ".main-content",
    "#content",
    ".content",
];

/// Elements that end a paragraph in the extracted text.
const BLOCKS: &[&str] = &[
    "p", "div", "section", "li", "ul", "ol", "pre", "blockquote", "br", "h1", "h2", "h3", "h4",
    "h5", "h6", "tr", "figcaption",
];

/// A container must yield more than this many characters to be trusted.
pub const MIN_CONTAINER_CHARS: usize = 300;

/// Default size budget for text sent to the model.
pub const TRUNCATE_BUDGET: usize = 12_000;

const ELISION: &str = "\n\n[...]\n\n";

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

/// Main text of an HTML page, paragraphs separated by blank lines.
///
/// The first container from the priority list holding more than
/// [`MIN_CONTAINER_CHARS`] wins; otherwise the whole `<body>` is used.
pub fn extract_content(html: &str) -> String {
    let document = Html::parse_document(html);
    let noise = selectors(NOISE);

    for selector in selectors(CONTAINERS) {
        if let Some(el) = document.select(&selector).find(|el| !is_noise(el, &noise)) {
            let text = element_text(el, &noise);
            if text.chars().count() > MIN_CONTAINER_CHARS {
                return text;
            }
        }
    }

    let Ok(body) = Selector::parse("body") else {
        return String::new();
    };
    document
        .select(&body)
        .next()
        .map(|el| element_text(el, &noise))
        .unwrap_or_default()
}

fn is_noise(el: &ElementRef<'_>, noise: &[Selector]) -> bool {
    noise.iter().any(|s| s.matches(el))
}

fn element_text(el: ElementRef<'_>, noise: &[Selector]) -> String {
    let mut raw = String::new();
    push_text(el, noise, &mut raw);
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn push_text(el: ElementRef<'_>, noise: &[Selector], out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&text.replace('\n', " "));
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if is_noise(&child_el, noise) {
                continue;
            }
            let block = BLOCKS.contains(&child_el.value().name());
            if block {
                out.push('\n');
            }
            push_text(child_el, noise, out);
            if block {
                out.push('\n');
            }
        }
    }
}

/// Keep the head and tail of long text.
///
/// Text over `budget` characters becomes its first 65 % and last 25 % joined
/// by an elision marker.
pub fn smart_truncate(text: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let head = budget * 65 / 100;
    let tail = budget * 25 / 100;
    let mut out: String = chars[..head].iter().collect();
    out.push_str(ELISION);
    out.extend(&chars[chars.len() - tail..]);
    out
}
