//! Data structures used throughout the load balancer controller.
//!
//! The service and node types mirror the subset of the orchestration
//! platform's object model that the controller reads.  They are
//! deserialised from the desired-state manifest with
//! [`serde`](https://serde.rs/) using the platform's camelCase field names.
//! [`MappingRule`] is the controller's own value type: one port forward
//! installed on the gateway device.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Annotation selecting the load balancer implementation for a service.
pub const LOAD_BALANCER_TYPE_ANNOTATION: &str = "midokura.com/load-balancer-type";

/// The only supported value of [`LOAD_BALANCER_TYPE_ANNOTATION`].
pub const UPNP_IGD_LOAD_BALANCER_TYPE: &str = "upnp-igd";

/// Cluster IP sentinel marking a headless service.
pub const CLUSTER_IP_NONE: &str = "None";

/// Identifying metadata of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    #[serde(rename = "ClusterIP")]
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAffinity {
    #[default]
    None,
    #[serde(rename = "ClientIP")]
    ClientIp,
}

/// Protocol of a declared service port.  The platform accepts SCTP, the
/// gateway does not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceProtocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for ServiceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceProtocol::Tcp => "TCP",
            ServiceProtocol::Udp => "UDP",
            ServiceProtocol::Sctp => "SCTP",
        })
    }
}

/// Target port of a service port, either numeric or a named container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

/// One declared port of a service.
///
/// `port` is the external (WAN) port, `node_port` the internal (LAN) port
/// the mapping forwards to.  Zero means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicePort {
    pub name: String,
    pub protocol: ServiceProtocol,
    pub port: u16,
    pub node_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<TargetPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSpec {
    #[serde(rename = "type")]
    pub type_: ServiceType,
    #[serde(rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    pub publish_not_ready_addresses: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_family: Option<IpFamily>,
    pub session_affinity: SessionAffinity,
    #[serde(rename = "loadBalancerIP", skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
    pub load_balancer_source_ranges: Vec<String>,
    pub ports: Vec<ServicePort>,
}

/// A service requesting a load balancer.  Read-only to the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAddressType {
    Hostname,
    #[serde(rename = "InternalIP")]
    InternalIp,
    #[serde(rename = "ExternalIP")]
    ExternalIp,
    #[serde(rename = "InternalDNS")]
    InternalDns,
    #[serde(rename = "ExternalDNS")]
    ExternalDns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub type_: NodeAddressType,
    pub address: String,
}

/// A cluster node and the addresses it exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub name: String,
    pub addresses: Vec<NodeAddress>,
}

/// Identity of a load balancer: `cluster/namespace/name`.
///
/// Also used as the description prefix of the mappings installed on the
/// device, so operators can tell them apart in the router's own listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadBalancerName(String);

impl LoadBalancerName {
    pub fn new(cluster_name: &str, service: &Service) -> Self {
        Self(format!(
            "{}/{}/{}",
            cluster_name, service.metadata.namespace, service.metadata.name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoadBalancerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Name as spoken by the gateway (`NewProtocol` argument).
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<ServiceProtocol> for Protocol {
    type Error = ServiceProtocol;

    fn try_from(protocol: ServiceProtocol) -> Result<Self, Self::Error> {
        match protocol {
            ServiceProtocol::Tcp => Ok(Protocol::Tcp),
            ServiceProtocol::Udp => Ok(Protocol::Udp),
            other => Err(other),
        }
    }
}

/// One port forward on the gateway device:
/// `<external address>:<external_port>/<protocol> -> <internal_host>:<internal_port>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_host: String,
    pub internal_port: u16,
    pub description: String,
}

/// The fields deciding whether two rules are the same mapping.  The
/// description is carried on add but never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingKey<'a> {
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_host: &'a str,
    pub internal_port: u16,
}

impl MappingRule {
    /// Builds the rule for a declared service port, forwarding to
    /// `internal_host`.  Returns `None` when the port cannot be mapped
    /// (unsupported protocol or an unset port).
    pub fn for_service_port(
        name: &LoadBalancerName,
        port: &ServicePort,
        internal_host: &str,
    ) -> Option<Self> {
        let protocol = Protocol::try_from(port.protocol).ok()?;
        if port.port == 0 || port.node_port == 0 {
            return None;
        }
        Some(Self {
            protocol,
            external_port: port.port,
            internal_host: internal_host.to_string(),
            internal_port: port.node_port,
            description: format!("{}/{}", name, port.name),
        })
    }

    pub fn key(&self) -> MappingKey<'_> {
        MappingKey {
            protocol: self.protocol,
            external_port: self.external_port,
            internal_host: &self.internal_host,
            internal_port: self.internal_port,
        }
    }
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}:{} ({})",
            self.external_port, self.protocol, self.internal_host, self.internal_port, self.description
        )
    }
}

/// Status reported for an installed load balancer.  The advertised address
/// is the gateway's public address, shared by every load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    pub advertised_address: Ipv4Addr,
}

/// A change in the desired state, sent from a [`ServiceSource`] to the
/// reconciler task.
///
/// [`ServiceSource`]: crate::source::ServiceSource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Update {
    /// A service appeared or changed, or is due for a periodic resync.
    Ensure { service: Service, nodes: Vec<Node> },
    /// Only the node set changed for an already known service.
    UpdateHosts { service: Service, nodes: Vec<Node> },
    /// A service disappeared from the desired state.
    Delete { service: Service },
}
