//! Archway - adaptive client gateway for a remote rewriting proxy

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archway::{
    config::Args,
    orchestrator::{ProxyGateway, RequestOptions},
    persist::StateStore,
    transport::ReqwestTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("archway={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Archway - rewriting proxy gateway");
    info!("======================================");
    info!("Instance: {}", args.instance_id);
    info!("Proxy origin: {}", args.proxy_origin);
    info!("Max concurrent: {}", args.max_concurrent);
    info!("Fallback: {}", if args.fallback_enabled { "enabled" } else { "disabled" });
    info!(
        "Version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown")
    );

    // Durable local state
    let store = match &args.state_file {
        Some(path) => StateStore::open(path.clone()),
        None => StateStore::in_memory(),
    };

    // Wire the services together
    let transport = Arc::new(ReqwestTransport::new()?);
    let gateway = Arc::new(ProxyGateway::new(
        args.gateway_config(),
        transport,
        store.clone(),
    )?);

    if gateway.persisted_enabled() {
        info!("Proxy was enabled on last run");
    }

    match gateway.enable().await {
        Ok(()) => info!("Proxy enabled"),
        Err(e) => {
            // Requests still work: unsupported routing degrades to
            // direct fetches when fallback is configured
            warn!(error = %e, "Proxy unreachable, continuing degraded");
        }
    }

    if args.urls.is_empty() {
        warn!("No URLs given, nothing to fetch");
    }

    // Fetch every URL concurrently; the queue enforces the cap and the
    // priority order
    let fetches = args.urls.iter().map(|url| {
        let gateway = Arc::clone(&gateway);
        let url = url.clone();
        async move {
            let result = gateway.request(&url, RequestOptions::default()).await;
            (url, result)
        }
    });
    let outcomes = futures::future::join_all(fetches).await;

    let mut failures = 0usize;
    for (url, result) in outcomes {
        match result {
            Ok(response) => {
                info!(
                    url = %url,
                    status = response.status,
                    bytes = response.body.len(),
                    resource_type = %response.resource_type,
                    from_cache = response.from_cache,
                    via_proxy = response.via_proxy,
                    "Fetched"
                );
            }
            Err(e) => {
                failures += 1;
                error!(url = %url, error = %e, "Fetch failed");
            }
        }
    }

    // Summary
    let stats = gateway.stats();
    info!("======================================");
    info!("Status: {}", stats.status);
    info!(
        "Requests: {} total, {} ok, {} failed, {} fallback",
        stats.usage.total_requests,
        stats.usage.successful_requests,
        stats.usage.failed_requests,
        stats.usage.fallback_successes
    );
    info!(
        "Cache: {} entries, {} hits, {} misses ({:.1}% hit rate)",
        stats.cache.entries,
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.hit_rate()
    );
    info!(
        "Latency: {:.1} ms avg, {:.0}% success rate",
        stats.performance.avg_response_time_ms,
        stats.performance.success_rate * 100.0
    );

    gateway.disable();
    // Spawned saves race with shutdown; flush once explicitly
    if let Err(e) = store.save().await {
        warn!(error = %e, "Final state save failed");
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
