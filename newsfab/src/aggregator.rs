use crate::types::{Feed, Record};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

/// Effective timestamp of entries that carry neither an updated nor a published
/// time. Sorts after every real timestamp.
pub const MIN_TIMESTAMP: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

impl Record {
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(MIN_TIMESTAMP)
    }
}

/// The merged, ordered view produced by one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    feeds: Vec<Arc<Feed>>,
    records: Vec<Record>,
    generated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Feeds sorted by title, ties broken by source.
    pub fn feeds(&self) -> &[Arc<Feed>] {
        &self.feeds
    }

    /// Every entry of every feed, newest first.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

pub fn aggregate(feeds: Vec<Feed>) -> Snapshot {
    aggregate_at(feeds, Utc::now())
}

/// Builds a snapshot stamped with `generated_at`.
pub fn aggregate_at(feeds: Vec<Feed>, generated_at: DateTime<Utc>) -> Snapshot {
    let mut feeds: Vec<Arc<Feed>> = feeds.into_iter().map(Arc::new).collect();
    feeds.sort_by(|a, b| compare_feeds(a, b));

    let mut positioned: Vec<(usize, Record)> = feeds
        .iter()
        .flat_map(|feed| {
            feed.entries.iter().enumerate().map(move |(position, entry)| {
                let record = Record {
                    feed: feed.clone(),
                    entry: entry.clone(),
                    timestamp: entry.timestamp(),
                };
                (position, record)
            })
        })
        .collect();

    positioned.sort_by(|(pa, a), (pb, b)| compare_records(a, b).then(pa.cmp(pb)));

    Snapshot {
        feeds,
        records: positioned.into_iter().map(|(_, record)| record).collect(),
        generated_at,
    }
}

fn compare_feeds(a: &Feed, b: &Feed) -> Ordering {
    a.title
        .cmp(&b.title)
        .then_with(|| a.source.cmp(&b.source))
}

// Newest first; equal timestamps fall back to ascending feed title, entry title,
// then source.
fn compare_records(a: &Record, b: &Record) -> Ordering {
    b.effective_timestamp()
        .cmp(&a.effective_timestamp())
        .then_with(|| a.feed.title.cmp(&b.feed.title))
        .then_with(|| a.entry.title.cmp(&b.entry.title))
        .then_with(|| a.feed.source.cmp(&b.feed.source))
}
