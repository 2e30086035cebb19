use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::feed::fetcher::validate_feed_url;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported catalog file {0}, expected .opml, .xml or .json")]
    UnsupportedFormat(String),
    #[error("invalid OPML subscription list: {0}")]
    Opml(String),
    #[error("invalid JSON catalog: {0}")]
    Json(#[from] serde_json::Error),
}

/// A feed offered by a catalog file before its URL has been checked.
#[derive(Debug, Deserialize)]
struct Candidate {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Identity of a feed URL inside the catalog. Scheme, host case, a trailing
/// slash and default ports do not distinguish two sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey(String);

impl SourceKey {
    fn of(url: &Url) -> Self {
        let mut key = url.host_str().unwrap_or_default().to_string();
        if let Some(port) = url.port() {
            key.push(':');
            key.push_str(&port.to_string());
        }
        key.push_str(url.path().trim_end_matches('/'));
        if let Some(query) = url.query() {
            key.push('?');
            key.push_str(query);
        }
        Self(key)
    }
}

/// Immutable list of known feeds, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct FeedCatalog {
    sources: Vec<FeedSource>,
    index: HashMap<SourceKey, usize>,
}

impl FeedCatalog {
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for (name, url, description, category) in BUILTIN_SOURCES {
            catalog.admit(Candidate {
                url: url.to_string(),
                name: Some(name.to_string()),
                description: Some(description.to_string()),
                category: Some(category.to_string()),
            });
        }
        catalog
    }

    /// Built-in sources followed by the subscriptions in `path`, if given.
    /// Entries with unusable URLs or already listed feeds are skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let mut catalog = Self::builtin();
        let Some(path) = path else {
            return Ok(catalog);
        };

        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_lowercase);
        let candidates = match extension.as_deref() {
            Some("opml") | Some("xml") => opml_subscriptions(&content)?,
            Some("json") => serde_json::from_str::<Vec<Candidate>>(&content)?,
            _ => return Err(CatalogError::UnsupportedFormat(path.display().to_string())),
        };

        let offered = candidates.len();
        let added = candidates
            .into_iter()
            .map(|candidate| catalog.admit(candidate))
            .filter(|&admitted| admitted)
            .count();
        info!(path = %path.display(), offered, added, "loaded feed catalog file");
        Ok(catalog)
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn lookup(&self, url: &str) -> Option<&FeedSource> {
        let key = SourceKey::of(&validate_feed_url(url).ok()?);
        self.index.get(&key).map(|&position| &self.sources[position])
    }

    fn admit(&mut self, candidate: Candidate) -> bool {
        let url = match validate_feed_url(&candidate.url) {
            Ok(url) => url,
            Err(error) => {
                warn!(url = %candidate.url, error = %error, "skipping catalog entry");
                return false;
            }
        };
        let key = SourceKey::of(&url);
        if self.index.contains_key(&key) {
            debug!(url = %url, "catalog already lists this feed");
            return false;
        }

        let name = non_blank(candidate.name)
            .unwrap_or_else(|| url.host_str().unwrap_or_default().to_string());
        self.index.insert(key, self.sources.len());
        self.sources.push(FeedSource {
            name,
            url: url.to_string(),
            description: non_blank(candidate.description).unwrap_or_default(),
            category: non_blank(candidate.category).unwrap_or_default(),
        });
        true
    }
}

const BUILTIN_SOURCES: [(&str, &str, &str, &str); 4] = [
    (
        "BBC News",
        "http://feeds.bbci.co.uk/news/rss.xml",
        "Latest news from BBC",
        "News",
    ),
    (
        "TechCrunch",
        "https://techcrunch.com/feed/",
        "Latest technology news and startup information",
        "Technology",
    ),
    (
        "Hacker News",
        "https://hnrss.org/frontpage",
        "Top stories from Hacker News",
        "Technology",
    ),
    (
        "Python.org News",
        "https://www.python.org/jobs/feed/rss/",
        "Python job listings and news",
        "Programming",
    ),
];

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Feed outlines of an OPML subscription export in document order. A feed
/// takes its `category` attribute, else the label of the innermost folder
/// outline around it.
fn opml_subscriptions(content: &str) -> Result<Vec<Candidate>, CatalogError> {
    let doc = roxmltree::Document::parse(content).map_err(|error| CatalogError::Opml(error.to_string()))?;
    let body = doc
        .descendants()
        .find(|node| node.has_tag_name("body"))
        .ok_or_else(|| CatalogError::Opml("document has no <body>".to_string()))?;

    let mut subscriptions = Vec::new();
    let mut pending: Vec<(roxmltree::Node, Option<String>)> = body
        .children()
        .filter(|node| node.has_tag_name("outline"))
        .rev()
        .map(|node| (node, None))
        .collect();

    while let Some((outline, folder)) = pending.pop() {
        let label = outline
            .attribute("title")
            .or_else(|| outline.attribute("text"))
            .map(str::to_string);
        match outline.attribute("xmlUrl") {
            Some(url) => subscriptions.push(Candidate {
                url: url.to_string(),
                name: label,
                description: outline.attribute("description").map(str::to_string),
                category: outline
                    .attribute("category")
                    .and_then(opml_category)
                    .or(folder),
            }),
            None => {
                let folder = non_blank(label).or(folder);
                pending.extend(
                    outline
                        .children()
                        .filter(|node| node.has_tag_name("outline"))
                        .rev()
                        .map(|child| (child, folder.clone())),
                );
            }
        }
    }
    Ok(subscriptions)
}

/// Last segment of the first path in an OPML `category` value such as
/// `/Tech/Rust,/News`.
fn opml_category(raw: &str) -> Option<String> {
    raw.split(',')
        .next()?
        .split('/')
        .map(str::trim)
        .rfind(|segment| !segment.is_empty())
        .map(str::to_string)
}
