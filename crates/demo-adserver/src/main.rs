mod auction;

use auction::{AuctionSettings, AuctionState};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Mock ad decision service. Answers `/mj/auction` with a creative, a
/// no-fill or a 503 at the configured rates.
#[derive(Parser)]
#[command(name = "demo-adserver")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:3000")]
    addr: String,

    /// Share of auctions that return an ad
    #[arg(long, default_value_t = 0.8)]
    fill_rate: f64,

    /// Share of auctions that fail with 503
    #[arg(long, default_value_t = 0.05)]
    error_rate: f64,

    /// Lower bound of simulated latency
    #[arg(long, default_value_t = 5)]
    min_latency_ms: u64,

    /// Upper bound of simulated latency
    #[arg(long, default_value_t = 40)]
    max_latency_ms: u64,

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

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let settings = AuctionSettings {
        fill_rate: args.fill_rate,
        error_rate: args.error_rate,
        min_latency_ms: args.min_latency_ms,
        max_latency_ms: args.max_latency_ms,
    };
    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "invalid settings");
        std::process::exit(2);
    }

    let app = auction::router(Arc::new(AuctionState::new(settings)));

    tracing::info!(
        addr = %args.addr,
        fill_rate = settings.fill_rate,
        error_rate = settings.error_rate,
        "demo ad server starting"
    );

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", args.addr));
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
    }
}
