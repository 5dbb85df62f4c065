use anyhow::{bail, Context};
use clap::Parser;
use newsfab::scheduler::control_channel;
use newsfab::signals::spawn_signal_listener;
use newsfab::{
    load_sources, CacheStore, CycleController, DiskCache, FetchConfig, HttpFetcher, MemoryCache,
    Publisher, Scheduler, SchedulerConfig, TemplateRenderer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Periodically fetches syndication feeds, merges them into one time-ordered view
/// and publishes it through a template.
#[derive(Parser, Debug)]
#[command(name = "newsfab", version)]
struct Cli {
    /// Config file listing the feed URLs
    #[arg(short = 'c', long, default_value = "newsfab.toml")]
    config: PathBuf,

    /// Output file; empty writes to stdout
    #[arg(short = 'o', long, default_value = "newsfab.html")]
    output: String,

    /// Template file
    #[arg(short = 't', long, default_value = "html.tmpl")]
    template: PathBuf,

    /// Seconds between refreshes
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Seconds allowed for fetching all feeds in one refresh
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    fetch_timeout: u64,

    /// HTTP cache directory; empty keeps the cache in memory
    #[arg(long, default_value = ".cache")]
    cache_dir: String,

    /// User-Agent header sent with feed requests
    #[arg(long)]
    user_agent: Option<String>,

    /// Seconds a stop request lets the running refresh keep fetching
    #[arg(long, default_value_t = 5)]
    shutdown_grace: u64,

    /// Refresh once and exit
    #[arg(long)]
    once: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsfab=info"));
    // stdout may carry the rendered output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let sources = load_sources(&cli.config).context("Failed to load configuration")?;
    info!("Loaded {} sources from {}", sources.len(), cli.config.display());

    let renderer = TemplateRenderer::from_file(&cli.template).context("Failed to load template")?;

    let cache: Arc<dyn CacheStore> = if cli.cache_dir.is_empty() {
        Arc::new(MemoryCache::new())
    } else {
        match DiskCache::new(&cli.cache_dir) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!("Cannot use cache directory {}: {}; caching in memory", cli.cache_dir, e);
                Arc::new(MemoryCache::new())
            }
        }
    };

    let mut fetch_config = FetchConfig {
        timeout: Duration::from_secs(cli.fetch_timeout),
        ..FetchConfig::default()
    };
    if let Some(user_agent) = cli.user_agent {
        fetch_config.user_agent = user_agent;
    }
    let timeout = fetch_config.timeout;
    let fetcher = HttpFetcher::new(fetch_config, cache).context("Failed to create HTTP client")?;

    let destination = (!cli.output.is_empty()).then(|| PathBuf::from(&cli.output));
    let controller = CycleController::new(
        Arc::new(fetcher),
        Arc::new(renderer),
        Publisher::new(destination),
        timeout,
    );

    let (control_tx, control_rx) = control_channel();
    let config_path = cli.config.clone();
    let listener = spawn_signal_listener(move || load_sources(&config_path), control_tx)
        .context("Failed to install signal handlers")?;

    let scheduler_config = SchedulerConfig {
        interval: Duration::from_secs(cli.interval),
        once: cli.once,
        shutdown_grace: Duration::from_secs(cli.shutdown_grace),
    };
    let report = Scheduler::new(controller, scheduler_config, sources, control_rx)
        .run()
        .await;

    listener.abort();
    info!("Exiting");

    if cli.once && report.failed_cycles > 0 {
        bail!("refresh failed");
    }
    Ok(())
}
