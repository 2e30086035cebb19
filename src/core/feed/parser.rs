use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Deserialize;

use super::types::{FeedFormat, ParsedEntry, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("xml feed parse error: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    #[error("json feed parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("json document is not a JSON Feed (version {0:?})")]
    NotJsonFeed(String),
}

const JSON_FEED_VERSION_PREFIX: &str = "https://jsonfeed.org/version/";

#[derive(Debug, Clone, Deserialize)]
struct JsonFeed {
    #[serde(default)]
    version: String,
    title: Option<String>,
    description: Option<String>,
    home_page_url: Option<String>,
    language: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedItem {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    summary: Option<String>,
    content_text: Option<String>,
    content_html: Option<String>,
    date_published: Option<String>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
}

/// Parses RSS, Atom or JSON Feed bytes into a format-neutral [`ParsedFeed`].
pub fn parse_feed_bytes(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let trimmed = raw.trim_ascii_start();
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    if trimmed[0] == b'{' {
        return parse_json_feed(trimmed);
    }
    parse_xml_feed(trimmed)
}

/// Key used to drop repeated entries within one fetch. The link wins, the
/// entry id stands in when a feed omits links.
pub fn build_dedup_key(entry: &ParsedEntry) -> Option<String> {
    let link = entry.link.trim();
    if !link.is_empty() {
        return Some(link.to_string());
    }
    let id = entry.id.trim();
    if !id.is_empty() {
        return Some(id.to_string());
    }
    None
}

fn parse_xml_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed = feed_rs::parser::parse(raw)?;
    let title = feed
        .title
        .as_ref()
        .map(|text| text.content.trim().to_string())
        .filter(|title| !title.is_empty());
    let description = feed
        .description
        .as_ref()
        .map(|text| text.content.clone());
    let home_page_url = feed.links.first().map(|link| link.href.clone());
    let entries = feed.entries.iter().map(entry_from_xml).collect();

    Ok(ParsedFeed {
        format: FeedFormat::XmlFeed,
        title,
        description,
        home_page_url,
        language: feed.language.clone(),
        // lastBuildDate, or the channel pubDate when a feed only declares that
        updated: feed.updated.or(feed.published),
        entries,
    })
}

fn parse_json_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed: JsonFeed = serde_json::from_slice(raw)?;
    if !feed.version.starts_with(JSON_FEED_VERSION_PREFIX) {
        return Err(FeedParseError::NotJsonFeed(feed.version));
    }
    let entries = feed
        .items
        .into_iter()
        .map(|item| {
            let author = item
                .authors
                .into_iter()
                .chain(item.author)
                .find_map(|author| author.name);
            ParsedEntry {
                id: item
                    .id
                    .or_else(|| item.url.clone())
                    .unwrap_or_default(),
                title: item.title.unwrap_or_else(|| "Untitled".to_string()),
                link: item.url.unwrap_or_default(),
                summary: item.summary,
                content: item.content_html.or(item.content_text),
                author,
                published_at: item.date_published.as_deref().and_then(parse_timestamp),
                tags: item.tags,
            }
        })
        .collect::<Vec<_>>();
    let updated = entries.iter().filter_map(|entry| entry.published_at).max();

    Ok(ParsedFeed {
        format: FeedFormat::JsonFeed,
        title: feed.title.filter(|title| !title.trim().is_empty()),
        description: feed.description,
        home_page_url: feed.home_page_url,
        language: feed.language,
        updated,
        entries,
    })
}

fn entry_from_xml(entry: &Entry) -> ParsedEntry {
    let title = entry
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled".to_string());
    let link = entry
        .links
        .first()
        .map(|entry_link| entry_link.href.clone())
        .unwrap_or_default();
    let summary = entry.summary.as_ref().map(|text| text.content.clone());
    let content = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone());
    let author = entry
        .authors
        .first()
        .map(|person| person.name.trim().to_string())
        .filter(|name| !name.is_empty());
    let tags = entry
        .categories
        .iter()
        .map(|category| category.label.clone().unwrap_or_else(|| category.term.clone()))
        .filter(|tag| !tag.trim().is_empty())
        .collect();

    ParsedEntry {
        id: entry.id.clone(),
        title,
        link,
        summary,
        content,
        author,
        published_at: entry.published.or(entry.updated),
        tags,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .or_else(|_| DateTime::parse_from_rfc2822(raw.trim()))
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}
