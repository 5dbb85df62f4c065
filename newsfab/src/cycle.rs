use crate::aggregator::aggregate;
use crate::orchestrator::fetch_all;
use crate::publisher::Publisher;
use crate::render::render_stream;
use crate::traits::{FeedSource, Renderer};
use crate::types::{CycleError, PublishError, SourceId, SourceList};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub feeds: usize,
    pub records: usize,
    pub failed_sources: Vec<SourceId>,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Runs one fetch → aggregate → render → publish pass.
#[derive(Clone)]
pub struct CycleController {
    fetcher: Arc<dyn FeedSource>,
    renderer: Arc<dyn Renderer>,
    publisher: Publisher,
    fetch_timeout: Duration,
}

impl CycleController {
    pub fn new(
        fetcher: Arc<dyn FeedSource>,
        renderer: Arc<dyn Renderer>,
        publisher: Publisher,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            publisher,
            fetch_timeout,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Runs a cycle over `sources`.
    ///
    /// Sources that fail to fetch are left out; only render and publish failures
    /// fail the cycle. `cancel` cuts the fetch phase short but the cycle still
    /// renders and publishes what it has.
    pub async fn run(
        &self,
        sources: &SourceList,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        let started = Instant::now();

        let fetched = fetch_all(self.fetcher.clone(), sources, self.fetch_timeout, cancel).await;
        let failed_sources: Vec<SourceId> =
            fetched.failures.into_iter().map(|f| f.source).collect();

        let snapshot = Arc::new(aggregate(fetched.feeds));
        let feeds = snapshot.feeds().len();
        let records = snapshot.records().len();

        let stream = render_stream(self.renderer.clone(), snapshot);
        let bytes_written = self.publisher.publish(stream).await.map_err(|e| match e {
            PublishError::Upstream(e) => CycleError::Render(e),
            other => CycleError::Publish(other),
        })?;

        let report = CycleReport {
            feeds,
            records,
            failed_sources,
            bytes_written,
            elapsed: started.elapsed(),
        };

        info!(
            feeds = report.feeds,
            records = report.records,
            failed = report.failed_sources.len(),
            bytes = report.bytes_written,
            "Cycle finished in {:?}",
            report.elapsed
        );

        Ok(report)
    }
}
