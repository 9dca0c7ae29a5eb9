use anyhow::Result;
use config_manager::TrackerConfig;
use poll_orchestrator::PollingOrchestrator;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vault_tracker=debug".into()),
        )
        .init();

    info!("Starting vault tracker...");

    let config = TrackerConfig::load()?;
    info!(
        "Tracking wallet {} on {}",
        config.wallet.address, config.rpc.url
    );

    let orchestrator = PollingOrchestrator::new(config)?;
    let mut channels = orchestrator.subscribe();
    let tasks = orchestrator.spawn();

    // Log every published update until shutdown.
    let reporter = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = channels.core.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(snapshot) = channels.core.borrow_and_update().clone() {
                        info!(
                            "Portfolio: ${:.2} total ({:+.2}% 24h), {} fee events in window",
                            snapshot.total_value_usd,
                            snapshot.change_24h_percent,
                            snapshot.recent_fees.len()
                        );
                    }
                }
                changed = channels.core_error.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(message) = channels.core_error.borrow_and_update().clone() {
                        warn!("{}", message);
                    }
                }
                changed = channels.large_buys.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let feed = channels.large_buys.borrow_and_update().clone();
                    if let Some(top) = feed.buys.first() {
                        info!(
                            "Large buys: {} in window (top ${:.0} by {}), {} new",
                            feed.buys.len(),
                            top.usd_value,
                            top.buyer,
                            feed.new_buy_count
                        );
                    }
                }
                changed = channels.other_tokens.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let others = channels.other_tokens.borrow_and_update().clone();
                    info!(
                        "Other holdings: {} tokens worth ${:.2} (+ {:.4} ETH)",
                        others.others_token_count, others.others_value_usd, others.eth_balance
                    );
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    for task in tasks {
        task.abort();
    }
    reporter.abort();

    Ok(())
}
