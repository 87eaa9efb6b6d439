//! StormSlide - unified tornadic signature feed
//!
//! Serves merged Level II couplets and Level III vendor signatures to the
//! map frontend.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the configured address (default 0.0.0.0:5000)
//! AERIS_CLIENT_ID=... AERIS_CLIENT_SECRET=... ./stormslide
//!
//! # One aggregation cycle printed as JSON
//! ./stormslide --once --config stormslide.toml
//! ```
//!
//! # Environment Variables
//!
//! - `STORMSLIDE_CONFIG`: Path to the TOML config file
//! - `STORMSLIDE_SERVER_ADDR`: Bind address override
//! - `STORMSLIDE_CORS_ORIGINS`: Comma-separated allowed origins
//! - `AERIS_CLIENT_ID` / `AERIS_CLIENT_SECRET`: Level III vendor credentials
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stormslide::api::{create_app, ApiState};
use stormslide::cache::{CachePolicy, RateLimitedCache};
use stormslide::config::AppConfig;
use stormslide::sources::{
    ObjectStoreFetcher, RetryPolicy, VendorCredentials, VendorFetcher, VolumeDecoder,
};
use stormslide::Aggregator;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "stormslide")]
#[command(about = "Unified Level II / Level III tornadic signature feed")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides the STORMSLIDE_CONFIG search)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:5000")
    #[arg(short, long, env = "STORMSLIDE_SERVER_ADDR", value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Run one aggregation, print it as JSON and exit
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Task Supervisor
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    CacheWarmer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::CacheWarmer => write!(f, "CacheWarmer"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the background task that keeps both source caches warm.
fn spawn_cache_warmer(
    task_set: &mut JoinSet<Result<TaskName>>,
    aggregator: Arc<Aggregator>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!(interval_secs = interval.as_secs(), "[CacheWarmer] Task starting");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => aggregator.prefetch(&cancel_token).await,
            }
        }

        info!("[CacheWarmer] Stopped");
        Ok(TaskName::CacheWarmer)
    });
}

async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the server drain in-flight requests.
    while let Some(result) = task_set.join_next().await {
        if let Ok(Err(e)) = result {
            warn!("Supervisor: task failed during shutdown: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(AppConfig::load()),
    }
}

/// Build both fetchers, their caches and the aggregator.
fn build_aggregator(config: &AppConfig) -> Result<Aggregator> {
    let http = reqwest::Client::builder()
        .timeout(config.cache.call_timeout())
        .user_agent(concat!("stormslide/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let retry = RetryPolicy::from(&config.retry);
    let cache_policy = CachePolicy::from(&config.cache);

    let level2 = ObjectStoreFetcher::new(http.clone(), &config.level2, retry.clone());
    let level3 = VendorFetcher::new(http, &config.level3, VendorCredentials::from_env(), retry);
    if !level3.has_credentials() {
        warn!("Level III credentials not set (AERIS_CLIENT_ID / AERIS_CLIENT_SECRET); Level III fetches will fail");
    }

    Ok(Aggregator::new(
        Arc::new(RateLimitedCache::new(Arc::new(level2), cache_policy.clone())),
        Arc::new(RateLimitedCache::new(Arc::new(level3), cache_policy)),
        Arc::new(VolumeDecoder),
    )
    .with_scan_config(config.scan.clone())
    .with_level2_failure(config.aggregator.level2_failure))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = load_config(args.config.as_ref())?;
    let server_addr = args.addr.clone().unwrap_or_else(|| config.server.addr.clone());

    info!(
        site = %config.level2.site,
        location = %config.level3.location,
        level2_failure = ?config.aggregator.level2_failure,
        "StormSlide starting"
    );

    let aggregator = Arc::new(build_aggregator(&config)?);

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    if args.once {
        let signatures = aggregator
            .get_signatures_with_cancel(&cancel_token)
            .await
            .context("Aggregation failed")?;
        println!("{}", serde_json::to_string_pretty(&signatures)?);
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_addr))?;
    info!("HTTP server listening on {}", server_addr);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    let app = create_app(ApiState::new(Arc::clone(&aggregator)));
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    if config.server.prefetch_interval_secs > 0 {
        spawn_cache_warmer(
            &mut task_set,
            Arc::clone(&aggregator),
            Duration::from_secs(config.server.prefetch_interval_secs),
            cancel_token.clone(),
        );
    }

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("StormSlide shutdown complete");
    Ok(())
}
