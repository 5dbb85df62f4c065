pub mod types;
pub mod cache;
pub mod parser;
pub mod traits;
pub mod fetcher;
pub mod orchestrator;
pub mod aggregator;
pub mod render;
pub mod publisher;
pub mod cycle;
pub mod scheduler;
pub mod signals;
pub mod config;

pub use types::*;
pub use cache::{CacheStore, CachedResponse, DiskCache, MemoryCache};
pub use traits::{FeedSource, Renderer};
pub use fetcher::HttpFetcher;
pub use orchestrator::{fetch_all, FetchReport};
pub use aggregator::{aggregate, Snapshot, MIN_TIMESTAMP};
pub use render::{render_stream, ByteStream, TemplateRenderer};
pub use publisher::Publisher;
pub use cycle::{CycleController, CycleReport};
pub use scheduler::{Control, Scheduler, SchedulerReport, SchedulerState, StopSignal};
pub use config::load_sources;
