use std::cmp::Ordering;
use std::collections::HashSet;

use ego_tree::iter::Edge;
use scraper::{Html, Node};

use super::parser::build_dedup_key;
use super::types::{Article, FeedMeta, FetchedFeed, ParsedEntry, ParsedFeed};

pub const MAX_ARTICLES: usize = 20;
pub const SUMMARY_MAX_CHARS: usize = 1_000;
pub const CONTENT_MAX_CHARS: usize = 10_000;

/// Turns a parsed feed into the articles handed to callers: markup stripped,
/// duplicates dropped, newest first, capped at [`MAX_ARTICLES`].
pub fn normalize_feed(parsed: ParsedFeed, fallback_source_name: &str) -> FetchedFeed {
    let source_name = parsed
        .title
        .clone()
        .unwrap_or_else(|| fallback_source_name.to_string());

    let total_entries = parsed.entries.len();
    let mut seen = HashSet::new();
    let mut articles: Vec<Article> = parsed
        .entries
        .into_iter()
        .filter(|entry| match build_dedup_key(entry) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .map(|entry| article_from_entry(entry, &source_name))
        .collect();

    // sort_by is stable, so equal dates keep feed order
    articles.sort_by(|a, b| newest_first(a, b));
    articles.truncate(MAX_ARTICLES);

    FetchedFeed {
        meta: FeedMeta {
            title: source_name,
            description: parsed
                .description
                .map(|text| html_to_text(&text))
                .filter(|text| !text.is_empty()),
            site_link: parsed.home_page_url,
            language: parsed.language,
            updated: parsed.updated,
            total_entries,
        },
        articles,
    }
}

fn article_from_entry(entry: ParsedEntry, source_name: &str) -> Article {
    let summary_text = entry
        .summary
        .as_deref()
        .map(html_to_text)
        .unwrap_or_default();
    let content_text = entry
        .content
        .as_deref()
        .map(html_to_text)
        .unwrap_or_default();

    let summary = if summary_text.is_empty() {
        truncate_chars(&content_text, SUMMARY_MAX_CHARS)
    } else {
        truncate_chars(&summary_text, SUMMARY_MAX_CHARS)
    };
    let content = if content_text.is_empty() {
        truncate_chars(&summary_text, CONTENT_MAX_CHARS)
    } else {
        truncate_chars(&content_text, CONTENT_MAX_CHARS)
    };
    let link = build_dedup_key(&entry).unwrap_or_default();

    Article {
        title: collapse_whitespace(&entry.title),
        link,
        summary,
        content,
        published_at: entry.published_at,
        author: entry.author,
        source_name: source_name.to_string(),
        tags: entry.tags,
    }
}

fn newest_first(a: &Article, b: &Article) -> Ordering {
    match (a.published_at, b.published_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Plain text of an HTML fragment. Block elements become paragraph breaks,
/// `<br>` a line break; scripts and styles are dropped.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut buf = String::new();
    // depth inside script-like elements whose text is dropped
    let mut skipped = 0usize;

    for edge in fragment.tree.root().traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Text(text) if skipped == 0 => buf.push_str(text),
                Node::Element(element) => {
                    let name = element.name();
                    if is_hidden(name) {
                        skipped += 1;
                    } else if skipped == 0 && name == "br" {
                        buf.push('\n');
                    } else if skipped == 0 && is_block(name) {
                        buf.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(element) = node.value() {
                    let name = element.name();
                    if is_hidden(name) {
                        skipped = skipped.saturating_sub(1);
                    } else if skipped == 0 && is_block(name) {
                        buf.push_str("\n\n");
                    }
                }
            }
        }
    }
    tidy_lines(&buf)
}

fn is_hidden(name: &str) -> bool {
    matches!(name, "script" | "style" | "noscript" | "template")
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "blockquote"
            | "pre"
            | "ul"
            | "ol"
            | "li"
            | "table"
            | "tr"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "figure"
            | "figcaption"
            | "hr"
    )
}

/// Collapses runs of whitespace inside each line and keeps at most one blank
/// line between paragraphs.
fn tidy_lines(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_break = false;
    for line in raw.lines() {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        pending_break = false;
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feed::parser::parse_feed_bytes;
    use crate::core::feed::types::FeedFormat;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(link: &str, published_offset_hours: Option<i64>) -> ParsedEntry {
        let base = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .expect("valid base date");
        ParsedEntry {
            id: link.to_string(),
            title: format!("Entry {link}"),
            link: link.to_string(),
            summary: Some(format!("<p>Summary of {link}</p>")),
            content: None,
            author: None,
            published_at: published_offset_hours.map(|hours| base + Duration::hours(hours)),
            tags: Vec::new(),
        }
    }

    fn feed(entries: Vec<ParsedEntry>) -> ParsedFeed {
        ParsedFeed {
            format: FeedFormat::XmlFeed,
            title: Some("Test Feed".to_string()),
            description: None,
            home_page_url: None,
            language: None,
            updated: None,
            entries,
        }
    }

    #[test]
    fn strips_markup_and_keeps_paragraphs() {
        let text = html_to_text(
            "<p>The <b>2.0</b> release&nbsp;is here.</p><script>alert(1)</script><p>Second<br>line</p>",
        );
        assert_eq!(text, "The 2.0 release is here.\n\nSecond\nline");
    }

    #[test]
    fn deeply_nested_markup_does_not_exhaust_the_stack() {
        let depth = 100_000;
        let html = format!("{}x{}", "<span>".repeat(depth), "</span>".repeat(depth));
        let text = std::thread::Builder::new()
            .stack_size(4 * 1024 * 1024)
            .spawn(move || html_to_text(&html))
            .expect("spawn worker")
            .join()
            .expect("worker finished");
        assert_eq!(text, "x");
    }

    #[test]
    fn nested_blocks_and_hidden_elements() {
        let text = html_to_text(
            "<div><ul><li>One</li><li>Two<style>li{}</style></li></ul></div>\
             <noscript><p>enable js</p></noscript><blockquote>Quoted</blockquote>",
        );
        assert_eq!(text, "One\n\nTwo\n\nQuoted");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_text("  just   plain text "), "just plain text");
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn long_multibyte_fields_are_capped_by_characters() {
        let mut long = entry("https://example.com/long", Some(1));
        long.summary = Some(format!("<p>{}</p>", "é".repeat(SUMMARY_MAX_CHARS + 500)));
        long.content = Some(format!("<div>{}</div>", "ü".repeat(CONTENT_MAX_CHARS + 2_000)));
        let fetched = normalize_feed(feed(vec![long]), "fallback");
        let article = &fetched.articles[0];

        assert_eq!(article.summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(article.summary.chars().all(|c| c == 'é'));
        assert_eq!(article.content.chars().count(), CONTENT_MAX_CHARS);
        assert_eq!(article.content.len(), CONTENT_MAX_CHARS * 'ü'.len_utf8());
    }

    #[test]
    fn summary_falls_back_to_truncated_content() {
        let mut bare = entry("https://example.com/bare", Some(1));
        bare.summary = None;
        bare.content = Some("ä".repeat(SUMMARY_MAX_CHARS * 2));
        let fetched = normalize_feed(feed(vec![bare]), "fallback");
        let article = &fetched.articles[0];

        assert_eq!(article.summary.chars().count(), SUMMARY_MAX_CHARS);
        assert_eq!(article.content.chars().count(), SUMMARY_MAX_CHARS * 2);
    }

    #[test]
    fn duplicate_links_keep_first_occurrence() {
        let mut duplicate = entry("https://example.com/a", Some(5));
        duplicate.title = "Duplicate".to_string();
        let fetched = normalize_feed(
            feed(vec![
                entry("https://example.com/a", Some(1)),
                duplicate,
                entry("https://example.com/b", Some(2)),
            ]),
            "fallback",
        );

        assert_eq!(fetched.articles.len(), 2);
        let first = fetched
            .articles
            .iter()
            .find(|article| article.link == "https://example.com/a")
            .expect("article a present");
        assert_eq!(first.title, "Entry https://example.com/a");
    }

    #[test]
    fn caps_at_twenty_most_recent() {
        let entries = (0..25)
            .map(|index| entry(&format!("https://example.com/{index}"), Some(index)))
            .collect();
        let fetched = normalize_feed(feed(entries), "fallback");

        assert_eq!(fetched.articles.len(), MAX_ARTICLES);
        assert_eq!(fetched.meta.total_entries, 25);
        assert_eq!(fetched.articles[0].link, "https://example.com/24");
        assert_eq!(fetched.articles[19].link, "https://example.com/5");
        assert!(fetched
            .articles
            .windows(2)
            .all(|pair| pair[0].published_at >= pair[1].published_at));
    }

    #[test]
    fn ties_and_undated_entries_keep_feed_order() {
        let fetched = normalize_feed(
            feed(vec![
                entry("https://example.com/undated-1", None),
                entry("https://example.com/tie-1", Some(3)),
                entry("https://example.com/tie-2", Some(3)),
                entry("https://example.com/undated-2", None),
            ]),
            "fallback",
        );
        let links: Vec<&str> = fetched
            .articles
            .iter()
            .map(|article| article.link.as_str())
            .collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/tie-1",
                "https://example.com/tie-2",
                "https://example.com/undated-1",
                "https://example.com/undated-2",
            ]
        );
    }

    #[test]
    fn source_name_falls_back_when_feed_has_no_title() {
        let mut untitled = feed(vec![entry("https://example.com/a", Some(1))]);
        untitled.title = None;
        let fetched = normalize_feed(untitled, "Catalog Name");
        assert_eq!(fetched.meta.title, "Catalog Name");
        assert_eq!(fetched.articles[0].source_name, "Catalog Name");
    }

    #[test]
    fn normalizes_rss_fixture() {
        let parsed = parse_feed_bytes(include_bytes!("../../../fixtures/feeds/sample.rss.xml"))
            .expect("fixture parses");
        let fetched = normalize_feed(parsed, "fallback");

        assert_eq!(fetched.meta.title, "Example Engineering Blog");
        assert_eq!(fetched.meta.total_entries, 4);
        assert_eq!(fetched.articles.len(), 3);
        assert_eq!(fetched.articles[0].title, "Hiring update");
        let release = &fetched.articles[1];
        assert_eq!(release.title, "Release 2.0 is out");
        assert_eq!(
            release.content,
            "The 2.0 release brings a faster parser.\n\nUpgrading is simple."
        );
        assert_eq!(release.summary, "The 2.0 release is here.");
        assert_eq!(release.source_name, "Example Engineering Blog");
        let undated = &fetched.articles[2];
        assert_eq!(undated.content, "First paragraph.\n\nSecond paragraph.");
    }
}
