//! Addresses the controller needs before it can reconcile anything: the
//! local address the gateway sees requests coming from, and the public
//! address advertised to clients.  Both are resolved once at startup.

use std::net::{IpAddr, Ipv4Addr};

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveError;
use hickory_resolver::TokioAsyncResolver;
use log::info;
use reqwest::Url;
use thiserror::Error;
use tokio::net::UdpSocket;

/// OpenDNS answers `myip.opendns.com` with the address the query came from.
const MYIP_NAME: &str = "myip.opendns.com.";
const OPENDNS_RESOLVERS: [IpAddr; 2] = [
    IpAddr::V4(Ipv4Addr::new(208, 67, 222, 222)),
    IpAddr::V4(Ipv4Addr::new(208, 67, 220, 220)),
];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("control URL '{0}' has no host or port")]
    InvalidControlUrl(Url),

    #[error("cannot determine the local address towards {host}: {source}")]
    LocalAddress {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external address lookup failed: {0}")]
    ExternalAddress(#[from] ResolveError),

    #[error("external address lookup returned no IPv4 address")]
    NoExternalAddress,

    #[error("{0} is not an IPv4 address")]
    NotIpv4(IpAddr),
}

/// Where the controller stands relative to the gateway.  Immutable for the
/// life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayIdentity {
    /// Address of this host on the interface towards the gateway.  Mapping
    /// targets must be this address.
    pub local_address: Ipv4Addr,
    /// Public address of the gateway, reported as the load balancer status.
    pub external_address: Ipv4Addr,
}

/// Returns the local address the kernel picks to reach the control URL's
/// host.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub async fn local_address_to(control_url: &Url) -> Result<Ipv4Addr, DiscoveryError> {
    let host = control_url
        .host_str()
        .ok_or_else(|| DiscoveryError::InvalidControlUrl(control_url.clone()))?;
    let port = control_url
        .port_or_known_default()
        .ok_or_else(|| DiscoveryError::InvalidControlUrl(control_url.clone()))?;
    let target = format!("{}:{}", host, port);

    let local = async {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(&target).await?;
        socket.local_addr()
    }
    .await
    .map_err(|source| DiscoveryError::LocalAddress {
        host: target.clone(),
        source,
    })?;

    match local.ip() {
        IpAddr::V4(ip) => Ok(ip),
        other => Err(DiscoveryError::NotIpv4(other)),
    }
}

/// Asks OpenDNS which address our queries come from.
pub async fn external_address() -> Result<Ipv4Addr, DiscoveryError> {
    let name_servers = NameServerConfigGroup::from_ips_clear(&OPENDNS_RESOLVERS, 53, true);
    let resolver = TokioAsyncResolver::tokio(
        ResolverConfig::from_parts(None, vec![], name_servers),
        ResolverOpts::default(),
    );
    let lookup = resolver.ipv4_lookup(MYIP_NAME).await?;
    let address = lookup
        .iter()
        .next()
        .map(|a| a.0)
        .ok_or(DiscoveryError::NoExternalAddress)?;
    info!("External address resolved via DNS: {}", address);
    Ok(address)
}
