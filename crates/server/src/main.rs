mod bootstrap;
mod demand;
mod health;
mod sink;

use std::time::Duration;

use anyhow::Result;
use arbiter_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

use crate::demand::DemandGenerator;

fn init_logging(config: &AppConfig) {
    use arbiter_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.runtime.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let demand = app.config.demand.enabled.then(|| {
        DemandGenerator::new(app.runtime.clone(), Duration::from_secs(app.config.demand.interval_secs))
            .spawn(shutdown_rx)
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        demand_enabled = app.config.demand.enabled,
        kill_switch = app.config.inference.kill_switch,
        "arbiter-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "arbiter-server stopping"
    );

    let _ = shutdown_tx.send(true);
    if let Some(handle) = demand {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(submitted)) => tracing::info!(
                event_name = "system.demand.joined",
                correlation_id = "shutdown",
                submitted,
                "demand generator joined"
            ),
            Ok(Err(error)) => tracing::warn!(
                event_name = "system.demand.join_failed",
                correlation_id = "shutdown",
                error = %error,
                "demand generator task failed"
            ),
            Err(_) => tracing::warn!(
                event_name = "system.demand.join_timeout",
                correlation_id = "shutdown",
                "demand generator did not stop within the grace period"
            ),
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
