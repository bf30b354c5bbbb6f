//! Built-in feed list used when no custom sources are stored.

use crate::models::FeedSource;

const DEFAULT_FEEDS: &[(&str, &str, &str)] = &[
    ("Simon Willison", "https://simonwillison.net/atom/everything/", "https://simonwillison.net"),
    ("Julia Evans", "https://jvns.ca/atom.xml", "https://jvns.ca"),
    ("Dan Luu", "https://danluu.com/atom.xml", "https://danluu.com"),
    ("Krebs on Security", "https://krebsonsecurity.com/feed/", "https://krebsonsecurity.com"),
    ("Schneier on Security", "https://www.schneier.com/feed/atom/", "https://www.schneier.com"),
    ("The Cloudflare Blog", "https://blog.cloudflare.com/rss/", "https://blog.cloudflare.com"),
    ("Rust Blog", "https://blog.rust-lang.org/feed.xml", "https://blog.rust-lang.org"),
    ("Go Blog", "https://go.dev/blog/feed.atom", "https://go.dev/blog"),
    ("GitHub Blog", "https://github.blog/feed/", "https://github.blog"),
    ("Hacker News Best", "https://hnrss.org/best", "https://news.ycombinator.com"),
    ("LWN.net", "https://lwn.net/headlines/rss", "https://lwn.net"),
    ("Martin Fowler", "https://martinfowler.com/feed.atom", "https://martinfowler.com"),
    ("Paul Graham", "http://www.aaronsw.com/2002/feeds/pgessays.rss", "https://paulgraham.com"),
    ("Lil'Log", "https://lilianweng.github.io/index.xml", "https://lilianweng.github.io"),
    ("Hugging Face Blog", "https://huggingface.co/blog/feed.xml", "https://huggingface.co/blog"),
    ("Chips and Cheese", "https://chipsandcheese.com/feed/", "https://chipsandcheese.com"),
    ("Fasterthanli.me", "https://fasterthanli.me/index.xml", "https://fasterthanli.me"),
    ("Mitchell Hashimoto", "https://mitchellh.com/feed.xml", "https://mitchellh.com"),
    ("Xe Iaso", "https://xeiaso.net/blog.rss", "https://xeiaso.net"),
    ("antirez", "https://antirez.com/rss", "https://antirez.com"),
];

pub fn default_feeds() -> Vec<FeedSource> {
    DEFAULT_FEEDS
        .iter()
        .map(|(name, xml, html)| FeedSource::new(name, xml, html))
        .collect()
}

/// Stored custom sources win when non-empty.
pub fn active_feeds(custom: Option<Vec<FeedSource>>) -> Vec<FeedSource> {
    match custom {
        Some(list) if !list.is_empty() => list,
        _ => default_feeds(),
    }
}
