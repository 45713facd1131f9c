mod render;

use adfeed_client::{ControllerConfig, FeedController, FeedItem, FeedUpdate};
use clap::Parser;
use render::{collect_params, parse_param, render_row};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

/// Builds a sponsored feed over a synthetic story list and prints it.
#[derive(Parser)]
#[command(name = "feed-demo")]
struct Args {
    /// TOML controller config. Command line options are ignored when set.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ad request endpoint
    #[arg(long, default_value = "http://127.0.0.1:3000/mj/auction?invType=app")]
    endpoint: String,

    /// Placement key (inventory code)
    #[arg(long, default_value = "feed_top")]
    placement: String,

    /// Number of host content items
    #[arg(long, default_value_t = 30)]
    items: usize,

    /// First ad slot positions, comma separated
    #[arg(long, value_delimiter = ',', default_value = "3")]
    initial: Vec<usize>,

    /// Distance between repeated ad slots (0 = initial positions only)
    #[arg(long, default_value_t = 10)]
    interval: usize,

    /// Extra targeting parameter, name=value. Repeatable.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Mark requests as test traffic
    #[arg(long)]
    debug: bool,

    /// How long to wait for ads before printing
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,

    /// Fire impression beacons for every ad shown
    #[arg(long)]
    fire_impressions: bool,

    /// Print Prometheus metrics at exit
    #[arg(long)]
    metrics: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_config(args: &Args) -> Result<ControllerConfig, adfeed_client::ConfigError> {
    if let Some(path) = &args.config {
        let config = ControllerConfig::load(path)?;
        tracing::info!(path = %path.display(), "loaded controller config");
        return Ok(config);
    }
    let mut config = ControllerConfig::default_for(args.placement.clone());
    config.request.endpoint = args.endpoint.clone();
    config.request.params = collect_params(&args.params);
    config.request.debug = args.debug;
    config.placement.initial_positions = args.initial.clone();
    config.placement.repeat_interval = args.interval;
    config.validate()?;
    Ok(config)
}

/// Resolve every merged position, binding cached ads and requesting more.
/// Returns how many ad slots are still unfilled.
fn walk(controller: &mut FeedController<Vec<String>>) -> usize {
    let mut position = 0;
    while position < controller.merged_count() {
        let _ = controller.get_item(position);
        position += 1;
    }
    controller.unfilled_slot_count()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let prometheus = if args.metrics {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
        adfeed_client::metrics::describe();
        Some(handle)
    } else {
        None
    };

    let config = build_config(&args)?;
    let stories: Vec<String> = (0..args.items).map(|i| format!("Story #{i}")).collect();
    let mut controller = FeedController::new(&config, stories)?;

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    controller.set_refresh_hook(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    tracing::info!(
        placement = %controller.placement_key(),
        items = args.items,
        wait_secs = args.wait_secs,
        "building feed"
    );

    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    loop {
        let unfilled = walk(&mut controller);
        if unfilled == 0 {
            break;
        }
        match tokio::time::timeout_at(deadline, controller.next_update()).await {
            Ok(Some(FeedUpdate::Fetched { key, completion })) => {
                tracing::info!(placement = %key, ?completion, unfilled, "ad request finished");
            }
            Ok(Some(FeedUpdate::RetryDue { key })) => {
                tracing::info!(placement = %key, "retrying ad request");
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(unfilled, "gave up waiting for ads");
                break;
            }
        }
    }

    let mut shown = Vec::new();
    for position in 0..controller.merged_count() {
        let item = controller.item_at(position)?;
        println!("{}", render_row(position, &item));
        if let FeedItem::Ad(ad) = item {
            shown.push(ad);
        }
    }

    if args.fire_impressions && !shown.is_empty() {
        let fired: usize = shown.iter().map(|ad| controller.fire_impression(ad)).sum();
        tracing::info!(ads = shown.len(), beacons = fired, "impressions fired");
        // Beacons run on their own tasks; give them a moment before exit.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let stats = controller.cache_stats();
    tracing::info!(
        live_ads = controller.live_ad_count(),
        refreshes = refreshes.load(Ordering::Relaxed),
        fetches = stats.fetches,
        retries = stats.retries,
        abandoned = stats.abandoned,
        hits = stats.hits,
        misses = stats.misses,
        expired = stats.expired,
        "feed built"
    );

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }
    controller.shutdown();
    Ok(())
}
