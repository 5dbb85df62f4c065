use crate::aggregator::Snapshot;
use crate::types::{Feed, FetchError, RenderError, SourceId};
use async_trait::async_trait;
use std::io::Write;
use tokio::time::Instant;

/// Retrieves and parses one feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch `source`, giving up with [`FetchError::Timeout`] once `deadline` passes.
    async fn fetch(&self, source: &SourceId, deadline: Instant) -> Result<Feed, FetchError>;
}

/// Turns a snapshot into bytes.
///
/// Rendering is synchronous and writes as it goes; callers run it on a blocking
/// thread and stream the output to the publisher.
pub trait Renderer: Send + Sync {
    fn render(&self, snapshot: &Snapshot, out: &mut dyn Write) -> Result<(), RenderError>;
}
