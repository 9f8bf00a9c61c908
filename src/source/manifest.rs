//! Desired state read from a JSON manifest file.
//!
//! The manifest lists the services requesting a load balancer and the
//! cluster nodes:
//!
//! ```json
//! {
//!   "services": [{
//!     "metadata": {
//!       "name": "my-service",
//!       "namespace": "default",
//!       "annotations": { "midokura.com/load-balancer-type": "upnp-igd" }
//!     },
//!     "spec": {
//!       "type": "LoadBalancer",
//!       "ports": [{ "name": "http", "protocol": "TCP", "port": 8080, "nodePort": 30080 }]
//!     }
//!   }],
//!   "nodes": [{ "name": "node-1", "addresses": [{ "type": "InternalIP", "address": "192.168.1.20" }] }]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use super::ServiceSource;
use crate::types::{Node, Service, ServiceType, Update};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub services: Vec<Service>,
    pub nodes: Vec<Node>,
}

impl Manifest {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Invalid manifest {}: {}", path.display(), e))
    }
}

pub struct ManifestSource {
    path: PathBuf,
    poll_interval: Duration,
    resync_interval: Duration,
}

impl ManifestSource {
    pub fn new(path: PathBuf, poll_interval: Duration, resync_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
            resync_interval,
        }
    }
}

#[async_trait]
impl ServiceSource for ManifestSource {
    async fn monitor(&self, update_tx: mpsc::Sender<Update>) -> Result<()> {
        info!("Watching manifest {}", self.path.display());
        let mut previous: Option<Manifest> = None;
        let mut last_resync = Instant::now();

        loop {
            match Manifest::load(&self.path).await {
                Ok(current) => {
                    let resync = last_resync.elapsed() >= self.resync_interval;
                    if resync {
                        debug!("Resyncing all load balancers");
                        last_resync = Instant::now();
                    }
                    for update in plan(previous.as_ref(), &current, resync) {
                        if update_tx.send(update).await.is_err() {
                            return Err(anyhow!("Channel closed"));
                        }
                    }
                    previous = Some(current);
                }
                // Keep the previous state: a transient read error must not
                // look like every service was deleted.
                Err(e) => warn!(
                    "Failed to load manifest {}: {}. Skipping this poll",
                    self.path.display(),
                    e
                ),
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn key(service: &Service) -> (&str, &str) {
    (&service.metadata.namespace, &service.metadata.name)
}

fn wants_load_balancer(service: &Service) -> bool {
    service.spec.type_ == ServiceType::LoadBalancer
}

/// Updates moving from the `previous` manifest to `current`.  Without a
/// previous manifest, or on `resync`, every service of type `LoadBalancer`
/// is ensured.  A service that leaves the manifest or stops being a
/// `LoadBalancer` is deleted with its previous ports.
fn plan(previous: Option<&Manifest>, current: &Manifest, resync: bool) -> Vec<Update> {
    let before: HashMap<_, _> = previous
        .map(|m| m.services.iter().map(|s| (key(s), s)).collect())
        .unwrap_or_default();
    let nodes_changed = previous.map_or(true, |m| m.nodes != current.nodes);

    let mut updates = Vec::new();
    for service in &current.services {
        let old = before.get(&key(service)).copied();
        if !wants_load_balancer(service) {
            if let Some(old) = old.filter(|old| wants_load_balancer(old)) {
                updates.push(Update::Delete {
                    service: old.clone(),
                });
            }
            continue;
        }
        match old {
            Some(old) if !resync && old == service => {
                if nodes_changed {
                    updates.push(Update::UpdateHosts {
                        service: service.clone(),
                        nodes: current.nodes.clone(),
                    });
                }
            }
            _ => updates.push(Update::Ensure {
                service: service.clone(),
                nodes: current.nodes.clone(),
            }),
        }
    }

    if let Some(previous) = previous {
        for service in &previous.services {
            if wants_load_balancer(service)
                && !current.services.iter().any(|s| key(s) == key(service))
            {
                updates.push(Update::Delete {
                    service: service.clone(),
                });
            }
        }
    }
    updates
}
