//! Load balancer controller.
//!
//! Every entry point runs the same reconciliation: validate the service,
//! find the mapping target, look up what was installed before, diff against
//! what should be installed now, apply the diff to the gateway and commit
//! the result to the [`Registry`].
//!
//! Failures are returned as they happen.  There is no retry and no
//! rollback: if a gateway call fails halfway through a diff, the registry
//! keeps the previous record, and because gateway operations are idempotent
//! the next reconciliation replays the same diff and converges.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::diff::diff;
use crate::error::{Error, GatewayOp, Result};
use crate::gateway::{GatewayClient, GatewayIdentity};
use crate::registry::{LoadBalancerRecord, Registry};
use crate::types::{
    LoadBalancerName, LoadBalancerStatus, MappingRule, Node, NodeAddressType, Service,
};
use crate::validate::validate;

/// What a reconciliation is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create the load balancer if unknown, converge it otherwise.
    Ensure,
    /// Converge a load balancer that must already be known.
    Update,
    /// Remove every mapping of the load balancer.
    Delete,
}

pub struct LoadBalancerController {
    gateway: Arc<dyn GatewayClient>,
    identity: GatewayIdentity,
    registry: Arc<Registry>,
}

impl LoadBalancerController {
    pub fn new(
        gateway: Arc<dyn GatewayClient>,
        identity: GatewayIdentity,
        registry: Arc<Registry>,
    ) -> Self {
        info!(
            "Load balancer controller addresses: {{local: {}, external: {}}}",
            identity.local_address, identity.external_address
        );
        Self {
            gateway,
            identity,
            registry,
        }
    }

    pub fn load_balancer_name(&self, cluster_name: &str, service: &Service) -> LoadBalancerName {
        LoadBalancerName::new(cluster_name, service)
    }

    /// Returns the status of the load balancer if it is known.  No
    /// validation and no side effects.
    pub async fn get_load_balancer(
        &self,
        cluster_name: &str,
        service: &Service,
    ) -> Option<LoadBalancerStatus> {
        let name = self.load_balancer_name(cluster_name, service);
        self.registry.get(&name).await.map(|record| record.status)
    }

    /// Creates the load balancer, or converges the existing one.
    pub async fn ensure_load_balancer(
        &self,
        cluster_name: &str,
        service: &Service,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus> {
        let status = self
            .reconcile(Operation::Ensure, cluster_name, service, nodes)
            .await?;
        Ok(status.unwrap_or(LoadBalancerStatus {
            advertised_address: self.identity.external_address,
        }))
    }

    /// Converges a known load balancer, typically after the node set
    /// changed.  Fails with [`Error::NotFound`] if it was never ensured.
    pub async fn update_load_balancer(
        &self,
        cluster_name: &str,
        service: &Service,
        nodes: &[Node],
    ) -> Result<()> {
        self.reconcile(Operation::Update, cluster_name, service, nodes)
            .await
            .map(|_| ())
    }

    /// Removes every mapping of the load balancer.  Succeeds whether or not
    /// the load balancer was known.
    pub async fn ensure_load_balancer_deleted(
        &self,
        cluster_name: &str,
        service: &Service,
    ) -> Result<()> {
        self.reconcile(Operation::Delete, cluster_name, service, &[])
            .await
            .map(|_| ())
    }

    async fn reconcile(
        &self,
        op: Operation,
        cluster_name: &str,
        service: &Service,
        nodes: &[Node],
    ) -> Result<Option<LoadBalancerStatus>> {
        let name = self.load_balancer_name(cluster_name, service);
        debug!("{}: reconcile {:?}", name, op);

        let internal_host = if op == Operation::Delete {
            String::new()
        } else {
            let warnings = validate(service).map_err(|reason| Error::ValidationRejected {
                name: name.clone(),
                reason,
            })?;
            for warning in warnings {
                warn!("{}: {}", name, warning);
            }
            self.mapping_target(&name, nodes)?
        };

        let entry = self.registry.lock(&name).await;
        let installed = match entry.record() {
            Some(record) => record.installed.clone(),
            None => match op {
                Operation::Update => return Err(Error::NotFound(name)),
                // Unknown state: assume everything is installed, deleting
                // an absent mapping is harmless.
                Operation::Delete => desired_rules(&name, service, &internal_host),
                Operation::Ensure => Vec::new(),
            },
        };

        let desired = match op {
            Operation::Delete => Vec::new(),
            Operation::Ensure | Operation::Update => {
                desired_rules(&name, service, &internal_host)
            }
        };

        let patch = diff(&installed, &desired);
        if patch.is_empty() {
            debug!("{}: port mappings up to date", name);
        }
        for rule in &patch.to_remove {
            self.delete_port_mapping(&name, rule).await?;
        }
        for rule in &patch.to_add {
            self.add_port_mapping(&name, rule).await?;
        }

        if op == Operation::Delete {
            entry.remove();
            info!("{}: load balancer deleted", name);
            return Ok(None);
        }
        let status = LoadBalancerStatus {
            advertised_address: self.identity.external_address,
        };
        entry.commit(LoadBalancerRecord {
            installed: desired,
            status,
        });
        Ok(Some(status))
    }

    /// The node that must receive the traffic: the one this controller
    /// runs on, since the gateway only accepts mappings to the requester.
    fn mapping_target(&self, name: &LoadBalancerName, nodes: &[Node]) -> Result<String> {
        let local = self.identity.local_address.to_string();
        nodes
            .iter()
            .flat_map(|node| node.addresses.iter())
            .find(|a| a.type_ == NodeAddressType::InternalIp && a.address == local)
            .map(|a| a.address.clone())
            .ok_or_else(|| Error::AddressResolutionFailed {
                name: name.clone(),
                address: local,
            })
    }

    async fn add_port_mapping(&self, name: &LoadBalancerName, rule: &MappingRule) -> Result<()> {
        let local = self.identity.local_address.to_string();
        if rule.internal_host != local {
            return Err(Error::RefusedCrossHostMapping {
                name: name.clone(),
                local,
                target: rule.internal_host.clone(),
            });
        }
        info!("{}: adding port mapping {}", name, rule);
        self.gateway
            .add_port_mapping(rule)
            .await
            .map_err(|source| Error::Gateway {
                name: name.clone(),
                op: GatewayOp::Add,
                rule: rule.clone(),
                source,
            })
    }

    async fn delete_port_mapping(&self, name: &LoadBalancerName, rule: &MappingRule) -> Result<()> {
        info!("{}: deleting port mapping {}", name, rule);
        self.gateway
            .delete_port_mapping(rule.external_port, rule.protocol)
            .await
            .map_err(|source| Error::Gateway {
                name: name.clone(),
                op: GatewayOp::Delete,
                rule: rule.clone(),
                source,
            })
    }
}

/// One rule per mappable declared port.  Ports that cannot be mapped only
/// reach this point on delete, where validation is skipped.
fn desired_rules(name: &LoadBalancerName, service: &Service, internal_host: &str) -> Vec<MappingRule> {
    service
        .spec
        .ports
        .iter()
        .filter_map(|port| {
            let rule = MappingRule::for_service_port(name, port, internal_host);
            if rule.is_none() {
                debug!("{}: skipping unmappable port {:?}", name, port.name);
            }
            rule
        })
        .collect()
}
