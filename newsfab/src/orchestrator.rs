use crate::traits::FeedSource;
use crate::types::{Feed, FetchError, SourceId, SourceList};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A source that did not make it into this cycle.
#[derive(Debug)]
pub struct FetchFailure {
    pub source: SourceId,
    pub error: FetchError,
}

/// Outcome of fetching one source list.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Successfully parsed feeds, in source-list order.
    pub feeds: Vec<Feed>,
    pub failures: Vec<FetchFailure>,
}

/// Fetches every source concurrently under one shared deadline.
///
/// Never fails as a whole: failed or timed-out sources are logged and left out of
/// the report's feeds. Cancelling `cancel` ends the network phase early, as if the
/// deadline had passed; feeds that already arrived are kept.
pub async fn fetch_all(
    fetcher: Arc<dyn FeedSource>,
    sources: &SourceList,
    overall_deadline: Duration,
    cancel: &CancellationToken,
) -> FetchReport {
    let deadline = Instant::now() + overall_deadline;
    let total = sources.len();

    info!("Fetching {} feeds (deadline {:?})", total, overall_deadline);

    let mut tasks = JoinSet::new();
    for (index, source) in sources.iter().cloned().enumerate() {
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = tokio::select! {
                result = tokio::time::timeout_at(deadline, fetcher.fetch(&source, deadline)) => {
                    result.unwrap_or(Err(FetchError::Timeout))
                }
                _ = cancel.cancelled() => Err(FetchError::Timeout),
            };
            (index, source, result)
        });
    }

    // Each task owns its result until this single join point.
    let mut slots: Vec<Option<Feed>> = (0..total).map(|_| None).collect();
    let mut failures = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, _, Ok(feed))) => slots[index] = Some(feed),
            Ok((_, source, Err(e))) => {
                warn!(source = %source, "Failed to fetch feed: {}", e);
                failures.push(FetchFailure { source, error: e });
            }
            Err(e) => error!("Fetch task failed: {}", e),
        }
    }

    let feeds: Vec<Feed> = slots.into_iter().flatten().collect();

    info!("Successfully fetched {}/{} feeds", feeds.len(), total);

    FetchReport { feeds, failures }
}
