use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use sluice_core::app::{Harness, LogHandler};
use sluice_core::impls::NatsBroker;

use super::config::Effective;
use super::error::CliError;

pub async fn run(eff: Effective) -> Result<(), CliError> {
    let broker = Arc::new(NatsBroker::connect(&eff.connect).await?);
    info!("connected to jetstream");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            // Dropping the sender would read as a shutdown; park instead.
            Err(e) => {
                warn!("cannot listen for interrupt: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    let harness = Harness::new(broker.clone(), broker);
    let report = harness
        .run(&eff.plan, Arc::new(LogHandler), shutdown_rx)
        .await?;

    info!(
        stream = %report.stream.config.name(),
        consumer = %report.consumer.name,
        pulls = report.summary.pulls,
        handler_failures = report.summary.handler_failures,
        "consumer removed, exiting"
    );
    Ok(())
}
