use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Identifies one feed origin. In practice this is the feed URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The set of sources fetched by one cycle.
///
/// Cloning is cheap and never copies the identifiers, so a running cycle can hold
/// its own list while the scheduler swaps in a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceList(Arc<[SourceId]>);

impl Default for SourceList {
    fn default() -> Self {
        Self(Vec::new().into())
    }
}

impl SourceList {
    /// Builds a list, keeping the first occurrence of each identifier.
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SourceId>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<SourceId> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &SourceId| seen.insert(id.clone()))
            .collect();
        Self(ids.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.0.contains(id)
    }
}

impl<T: Into<SourceId>> FromIterator<T> for SourceList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for SourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(id.as_str())?;
        }
        f.write_str("]")
    }
}

/// One item of a feed, as parsed. Never mutated after parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            link: None,
            summary: None,
            author: None,
            published: None,
            updated: None,
        }
    }

    /// Updated time if present, else published time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.published)
    }
}

/// One fetched feed. Produced fresh every cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub source: SourceId,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub entries: Vec<Arc<Entry>>,
}

impl Feed {
    pub fn new(source: impl Into<SourceId>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            link: None,
            description: None,
            updated: None,
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(Arc::new(entry));
        self
    }
}

/// A feed/entry pair plus the timestamp used to order it.
#[derive(Debug, Clone)]
pub struct Record {
    pub feed: Arc<Feed>,
    pub entry: Arc<Entry>,
    pub timestamp: Option<DateTime<Utc>>,
}

// Templates get the feed header only; serializing every sibling entry once per
// record would make the context quadratic in the number of entries.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct FeedHeader<'a> {
            source: &'a SourceId,
            title: &'a str,
            link: Option<&'a str>,
            description: Option<&'a str>,
            updated: Option<DateTime<Utc>>,
        }

        let feed = FeedHeader {
            source: &self.feed.source,
            title: &self.feed.title,
            link: self.feed.link.as_deref(),
            description: self.feed.description.as_deref(),
            updated: self.feed.updated,
        };

        let mut state = serializer.serialize_struct("Record", 3)?;
        state.serialize_field("feed", &feed)?;
        state.serialize_field("entry", self.entry.as_ref())?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Overall deadline for the network phase of one cycle.
    pub timeout: Duration,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("newsfab/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Run a single cycle, then stop.
    pub once: bool,
    /// How long a stop request lets the running cycle keep fetching. The cycle's own
    /// deadline still applies when it comes first.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            once: false,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid source {id}: {reason}")]
    InvalidSource { id: SourceId, reason: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("deadline exceeded")]
    Timeout,

    #[error("malformed feed: {0}")]
    Malformed(String),
}

/// Failure raised by a renderer while producing output.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct RenderError(pub String);

impl From<minijinja::Error> for RenderError {
    fn from(e: minijinja::Error) -> Self {
        // `{:#}` includes the template name and line in the message.
        Self(format!("{:#}", e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid template {name}: {message}")]
    Syntax { name: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to move output into place: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("renderer failed: {0}")]
    Upstream(RenderError),

    #[error("byte stream ended before the renderer finished")]
    Incomplete,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("config {path} has no `urls` list")]
    MissingUrls { path: PathBuf },
}
