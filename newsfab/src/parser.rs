use crate::types::{Entry, Feed, FetchError, SourceId};
use feed_rs::model;
use feed_rs::parser;
use std::sync::Arc;
use tracing::debug;

/// Turns a response body into a [`Feed`]. Handles RSS, Atom and JSON Feed.
pub struct FeedParser;

impl FeedParser {
    pub fn parse(source: &SourceId, content: &[u8]) -> Result<Feed, FetchError> {
        debug!("Parsing feed content for {} ({} bytes)", source, content.len());

        let feed = parser::parse(content)
            .map_err(|e| FetchError::Malformed(format!("{}: {}", source, e)))?;

        let entries: Vec<Arc<Entry>> = feed
            .entries
            .into_iter()
            .map(|entry| Arc::new(Self::parse_entry(entry)))
            .collect();

        debug!("Parsed {} entries from {}", entries.len(), source);

        Ok(Feed {
            source: source.clone(),
            title: feed.title.map(|t| t.content).unwrap_or_default(),
            link: Self::site_link(&feed.links),
            description: feed.description.map(|d| d.content),
            updated: feed.updated,
            entries,
        })
    }

    fn parse_entry(entry: model::Entry) -> Entry {
        let id = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id)
        };

        // Prefer the short summary; fall back to the full content body.
        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body));

        Entry {
            id,
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry.links.first().map(|l| l.href.clone()),
            summary,
            author: entry.authors.first().map(|a| a.name.clone()),
            published: entry.published,
            updated: entry.updated,
        }
    }

    /// The feed's home page: the first link that does not point back at the feed itself.
    fn site_link(links: &[model::Link]) -> Option<String> {
        links
            .iter()
            .find(|l| l.rel.as_deref() != Some("self"))
            .or_else(|| links.first())
            .map(|l| l.href.clone())
    }
}
