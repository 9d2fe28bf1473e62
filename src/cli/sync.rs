use super::ui;
use crate::core::RateRefresher;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Keeps today's rates fresh until Ctrl-C, then stops the background tasks.
pub async fn run(refresher: RateRefresher, cancel: CancellationToken) -> Result<()> {
    let handle = refresher.start(cancel.clone()).await;
    println!(
        "{}",
        ui::style_text("Syncing rates, press Ctrl-C to stop", ui::StyleType::Subtle)
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    cancel.cancel();
    handle.await.context("Rate refresher task failed")?;
    Ok(())
}
