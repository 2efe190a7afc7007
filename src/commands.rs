use std::sync::Arc;

use anyhow::Result;
use crawlcore_types::config::AppConfig;
use crawlcore_types::Health;

use crate::orchestrator::Orchestrator;

/// `crawlcore crawl`: seeds the queue if needed, then runs until shutdown.
pub async fn run_crawl(
    config: AppConfig,
    seeds: Option<String>,
    seed: Option<String>,
    _depth: Option<u32>,
) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::bootstrap(config).await?);

    let mut extra = Vec::new();
    if let Some(path_or_list) = seeds {
        if let Ok(contents) = std::fs::read_to_string(&path_or_list) {
            extra.extend(contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from));
        } else {
            extra.extend(path_or_list.split(',').map(str::trim).filter(|l| !l.is_empty()).map(String::from));
        }
    }
    if let Some(url) = seed {
        extra.push(url);
    }

    orchestrator.seed(&extra).await?;
    orchestrator.run().await
}

/// `crawlcore status`: one-shot snapshot of queue depth, error rate, and health.
pub async fn run_status(config: AppConfig) -> Result<()> {
    let orchestrator = Orchestrator::bootstrap(config).await?;
    let report = orchestrator.health().await?;

    let symbol = match report.health {
        Health::Healthy => "OK",
        Health::Degraded => "DEGRADED",
        Health::Unhealthy => "UNHEALTHY",
    };

    println!("crawlcore status: {symbol}");
    println!("  domains tracked:  {}", report.domain_count);
    println!("  active fetches:   {}", report.active_fetches);
    println!("  queue pending:    {}", report.queue_pending);
    println!("  error rate:       {:.1}%", report.error_rate * 100.0);
    match report.rss_bytes {
        Some(bytes) => println!("  resident memory:  {} MiB", bytes / (1024 * 1024)),
        None => println!("  resident memory:  unavailable"),
    }

    Ok(())
}

/// `crawlcore unblock-domain <host>`: operator override for a domain stuck
/// in `error` status after too many consecutive failures.
pub async fn run_unblock_domain(config: AppConfig, host: String) -> Result<()> {
    let orchestrator = Orchestrator::bootstrap(config).await?;
    orchestrator.unblock_domain(&host).await
}
