use anyhow::{Result, anyhow};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::OperatorConfig,
    crd::LoggingOverride,
    queue::event_queue,
    reconciler::{ConfigMapOverrideHandler, Reconciler},
    watch::{WatchClient, WatchEvent},
};

/// Watch the `LoggingOverride` resources and reconcile them until the watch
/// is over or the token is cancelled. The watch runs in its own task, the
/// reconciliation loop in the calling one.
pub async fn run(client: Client, config: OperatorConfig, cancel: CancellationToken) -> Result<()> {
    info!(
        config_map = config.config_map_name.as_str(),
        queue_capacity = ?config.queue.capacity,
        queue_overflow = %config.queue.overflow,
        reconnect = ?config.reconnect,
        "starting operator"
    );

    let (publisher, consumer) = event_queue::<WatchEvent<LoggingOverride>>(config.queue);
    let watch = WatchClient::new(Api::<LoggingOverride>::all(client.clone()), config.reconnect);
    let reconciler = Reconciler::new(ConfigMapOverrideHandler::new(
        client,
        config.config_map_name,
    ));

    let watch_task = tokio::spawn(watch.run(publisher, cancel.clone()));
    reconciler.run(consumer, cancel).await;
    watch_task
        .await
        .map_err(|e| anyhow!("watch task failed: {e}"))?;

    info!("operator stopped");
    Ok(())
}
