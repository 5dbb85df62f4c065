#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use newsfab::{Entry, Feed, FeedSource, FetchError, RenderError, Renderer, Snapshot, SourceId};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

pub fn entry(title: &str, updated: Option<DateTime<Utc>>, published: Option<DateTime<Utc>>) -> Entry {
    Entry {
        id: Some(format!("id:{}", title)),
        title: title.to_string(),
        link: Some(format!("https://example.com/{}", title.replace(' ', "-"))),
        summary: None,
        author: None,
        published,
        updated,
    }
}

pub fn feed(source: &str, title: &str, entries: Vec<Entry>) -> Feed {
    entries
        .into_iter()
        .fold(Feed::new(source, title), |feed, e| feed.with_entry(e))
}

#[derive(Clone)]
pub enum Behavior {
    Ok(Feed),
    Fail,
    Delay(Duration, Feed),
    Hang,
}

/// Scripted [`FeedSource`]: each source answers with a fixed behavior.
pub struct MockSource {
    behaviors: HashMap<SourceId, Behavior>,
    calls: Mutex<Vec<SourceId>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn with(mut self, source: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(SourceId::from(source), behavior);
        self
    }

    /// Every fetch waits for a permit from `gate` after recording the call.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<SourceId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for MockSource {
    async fn fetch(&self, source: &SourceId, _deadline: Instant) -> Result<Feed, FetchError> {
        self.calls.lock().unwrap().push(source.clone());

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        match self.behaviors.get(source).cloned() {
            Some(Behavior::Ok(feed)) => Ok(feed),
            Some(Behavior::Delay(delay, feed)) => {
                tokio::time::sleep(delay).await;
                Ok(feed)
            }
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Fail) | None => Err(FetchError::Status { status: 500 }),
        }
    }
}

/// Writes one line per feed and per record, and remembers the feed titles of
/// every snapshot it rendered.
#[derive(Default)]
pub struct RecordingRenderer {
    rendered: Mutex<Vec<Vec<String>>>,
}

impl RecordingRenderer {
    pub fn rendered(&self) -> Vec<Vec<String>> {
        self.rendered.lock().unwrap().clone()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, snapshot: &Snapshot, out: &mut dyn Write) -> Result<(), RenderError> {
        let titles: Vec<String> = snapshot.feeds().iter().map(|f| f.title.clone()).collect();
        let io = |e: std::io::Error| RenderError(e.to_string());

        writeln!(out, "feeds: {}", titles.join(", ")).map_err(io)?;
        for record in snapshot.records() {
            writeln!(out, "{} | {}", record.entry.title, record.feed.title).map_err(io)?;
        }

        self.rendered.lock().unwrap().push(titles);
        Ok(())
    }
}

/// Writes some output, then fails.
pub struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(&self, _snapshot: &Snapshot, out: &mut dyn Write) -> Result<(), RenderError> {
        let _ = out.write_all(b"partial output");
        Err(RenderError("template exploded".to_string()))
    }
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
