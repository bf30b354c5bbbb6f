//! Tolerant RSS 2.0 / Atom item extraction.
//!
//! Feeds in the wild are frequently not well-formed XML (unescaped `&`,
//! stray HTML, truncated documents), so items are located with regexes rather
//! than a strict parser. A broken item costs only that item.

use crate::models::{Article, FeedSource};
use crate::utils::truncate_chars;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use regex::{Captures, Regex};
use std::borrow::Cow;

/// Descriptions are cut to this many characters.
pub const DESCRIPTION_LIMIT: usize = 500;

static ATOM_ROOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<feed[\s>]").unwrap());
static RSS_ITEM: Lazy<Regex> = Lazy::new(|| block("item"));
static ATOM_ENTRY: Lazy<Regex> = Lazy::new(|| block("entry"));
static LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b([^>]*)>").unwrap());
static ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static CDATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static TAGS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        "title",
        "link",
        "guid",
        "pubDate",
        "dc:date",
        "date",
        "description",
        "content:encoded",
        "published",
        "updated",
        "summary",
        "content",
    ]
    .into_iter()
    .map(|name| (name, block(name)))
    .collect()
});

fn block(name: &str) -> Regex {
    let name = regex::escape(name);
    Regex::new(&format!(r"(?is)<{name}(?:\s[^>]*)?>(.*?)</{name}\s*>")).unwrap()
}

/// Which syndication format a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

/// Atom when the document has a `<feed>` root element, RSS otherwise.
///
/// RSS documents that merely declare the Atom namespace (for `atom:link`)
/// stay RSS.
pub fn detect_kind(xml: &str) -> FeedKind {
    if ATOM_ROOT.is_match(xml) {
        FeedKind::Atom
    } else {
        FeedKind::Rss
    }
}

/// Extract every item of an RSS or Atom document as an [`Article`] attributed
/// to `source`.
///
/// Items with neither a title nor a link are skipped. Missing fields become
/// empty strings and unparseable dates become the Unix epoch.
pub fn parse_feed_items(xml: &str, source: &FeedSource) -> Vec<Article> {
    let kind = detect_kind(xml);
    let blocks = match kind {
        FeedKind::Atom => &*ATOM_ENTRY,
        FeedKind::Rss => &*RSS_ITEM,
    };

    blocks
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .filter_map(|body| {
            let item = match kind {
                FeedKind::Atom => atom_entry(body.as_str()),
                FeedKind::Rss => rss_item(body.as_str()),
            };
            (!item.title.is_empty() || !item.link.is_empty()).then(|| Article {
                title: item.title,
                link: item.link,
                pub_date: parse_date(&item.date).unwrap_or(DateTime::UNIX_EPOCH),
                description: truncate_chars(&item.description, DESCRIPTION_LIMIT),
                source_name: source.name.clone(),
                source_url: source.html_url.clone(),
            })
        })
        .collect()
}

struct RawItem {
    title: String,
    link: String,
    date: String,
    description: String,
}

fn rss_item(body: &str) -> RawItem {
    RawItem {
        title: to_text(&first_tag(body, &["title"])),
        link: to_plain(&first_tag(body, &["link", "guid"])),
        date: first_tag(body, &["pubDate", "dc:date", "date"]),
        description: to_body_text(&first_tag(body, &["description", "content:encoded"])),
    }
}

fn atom_entry(body: &str) -> RawItem {
    RawItem {
        title: to_text(&first_tag(body, &["title"])),
        link: to_plain(&atom_link(body)),
        date: first_tag(body, &["published", "updated"]),
        description: to_body_text(&first_tag(body, &["summary", "content"])),
    }
}

/// Content of the first listed tag that is present and non-empty, CDATA removed.
fn first_tag(body: &str, names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| TAGS.iter().find(|(n, _)| n == name))
        .filter_map(|(_, re)| re.captures(body))
        .filter_map(|cap| cap.get(1))
        .map(|m| strip_cdata(m.as_str()).trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// `href` of the `rel="alternate"` link, else of the first link without a
/// `rel`, else of any link.
fn atom_link(body: &str) -> String {
    let links: Vec<(Option<String>, String)> = LINK_TAG
        .captures_iter(body)
        .filter_map(|cap| {
            let attrs = cap.get(1)?.as_str();
            let mut rel = None;
            let mut href = None;
            for a in ATTR.captures_iter(attrs) {
                let value = a.get(2).or(a.get(3)).map_or("", |m| m.as_str());
                match &a[1] {
                    "rel" => rel = Some(value.to_string()),
                    "href" => href = Some(value.to_string()),
                    _ => {}
                }
            }
            Some((rel, href?))
        })
        .collect();

    links
        .iter()
        .find(|(rel, _)| rel.as_deref() == Some("alternate"))
        .or_else(|| links.iter().find(|(rel, _)| rel.is_none()))
        .or_else(|| links.first())
        .map(|(_, href)| href.clone())
        .unwrap_or_default()
}

fn strip_cdata(s: &str) -> Cow<'_, str> {
    CDATA.replace_all(s, "$1")
}

/// Markup-free, entity-decoded, whitespace-collapsed text.
fn to_text(raw: &str) -> String {
    let stripped = HTML_TAG.replace_all(raw, " ");
    let decoded = decode_entities(&stripped);
    collapse(&decoded)
}

/// Like [`to_text`], but also strips entity-escaped HTML (`&lt;p&gt;`),
/// which descriptions routinely carry.
fn to_body_text(raw: &str) -> String {
    let stripped = HTML_TAG.replace_all(raw, " ");
    let decoded = decode_entities(&stripped);
    collapse(&HTML_TAG.replace_all(&decoded, " "))
}

fn collapse(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

fn to_plain(raw: &str) -> String {
    decode_entities(raw.trim()).trim().to_string()
}

/// Decode the predefined XML entities, numeric character references and a
/// few HTML entities common in feeds. Unknown or invalid references are left
/// untouched.
pub fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |cap: &Captures| {
            let raw = &cap[0];
            match unescape_with(raw, resolve_entity) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => raw.to_string(),
            }
        })
        .into_owned()
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    resolve_predefined_entity(name).or(match name {
        "nbsp" => Some(" "),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "hellip" => Some("\u{2026}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201C}"),
        "rdquo" => Some("\u{201D}"),
        _ => None,
    })
}

/// Best-effort date parsing: RFC 2822, RFC 3339, then a few zone-less
/// layouts read as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
