//! Applies desired-state updates to the controller, one at a time so that
//! updates for the same service are reconciled in the order they arrived.

use std::sync::Arc;

use log::{error, info};
use tokio::sync::mpsc;

use crate::controller::LoadBalancerController;
use crate::error::Result;
use crate::types::Update;

/// Runs until the update channel closes.  Failures are logged and left to
/// the source's next resync.
pub async fn run_reconciler(
    controller: Arc<LoadBalancerController>,
    cluster_name: String,
    mut update_rx: mpsc::Receiver<Update>,
) -> anyhow::Result<()> {
    while let Some(update) = update_rx.recv().await {
        if let Err(e) = apply(&controller, &cluster_name, update).await {
            error!("{}", e);
        }
    }
    info!("Update channel closed, shutting down reconciler");
    Ok(())
}

async fn apply(
    controller: &LoadBalancerController,
    cluster_name: &str,
    update: Update,
) -> Result<()> {
    match update {
        Update::Ensure { service, nodes } => {
            let status = controller
                .ensure_load_balancer(cluster_name, &service, &nodes)
                .await?;
            info!(
                "{}: load balancer ready at {}",
                controller.load_balancer_name(cluster_name, &service),
                status.advertised_address
            );
        }
        Update::UpdateHosts { service, nodes } => {
            controller
                .update_load_balancer(cluster_name, &service, &nodes)
                .await?;
        }
        Update::Delete { service } => {
            controller
                .ensure_load_balancer_deleted(cluster_name, &service)
                .await?;
        }
    }
    Ok(())
}
