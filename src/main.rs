//! edgelb daemon entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{error, info};
use reqwest::Url;
use tokio::signal;
use tokio::sync::mpsc;

use edgelb::config::Config;
use edgelb::gateway::{discovery, GatewayClient, GatewayIdentity, MemoryGateway, UpnpGateway};
use edgelb::reconciler::run_reconciler;
use edgelb::source::{ManifestSource, ServiceSource};
use edgelb::{LoadBalancerController, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting edgelb with config: {:?}", cfg);

    // Gateway and the addresses around it
    let (gateway, local_address) = match &cfg.control_url {
        Some(url) => {
            let url = Url::parse(url).map_err(|e| anyhow!("Invalid control_url: {}", e))?;
            let local = match cfg.local_address {
                Some(ip) => ip,
                None => discovery::local_address_to(&url).await?,
            };
            let gateway: Arc<dyn GatewayClient> = Arc::new(UpnpGateway::new(
                url,
                cfg.service_type.clone(),
                cfg.credentials(),
            )?);
            (gateway, local)
        }
        None => {
            info!("No control_url configured, running against an in-memory gateway");
            let local = cfg
                .local_address
                .ok_or_else(|| anyhow!("local_address is required without a control_url"))?;
            let gateway: Arc<dyn GatewayClient> = Arc::new(MemoryGateway::new());
            (gateway, local)
        }
    };
    let external_address = match cfg.external_address {
        Some(ip) => ip,
        None => discovery::external_address().await?,
    };
    let identity = GatewayIdentity {
        local_address,
        external_address,
    };

    let registry = Arc::new(Registry::new());
    let controller = Arc::new(LoadBalancerController::new(gateway, identity, registry));

    // Update channel
    let (update_tx, update_rx) = mpsc::channel(128);

    // Desired state source
    let source = ManifestSource::new(
        cfg.manifest_path.clone(),
        Duration::from_secs(cfg.poll_interval_secs),
        Duration::from_secs(cfg.resync_interval_secs),
    );
    let source_handle = tokio::spawn(async move {
        if let Err(e) = source.monitor(update_tx).await {
            error!("Manifest source failed: {}", e);
        }
    });

    // Reconciler
    let cluster_name = cfg.cluster_name.clone();
    let reconciler_handle = tokio::spawn(async move {
        if let Err(e) = run_reconciler(controller, cluster_name, update_rx).await {
            error!("Reconciler failed: {}", e);
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // Abort tasks
    source_handle.abort();
    reconciler_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
