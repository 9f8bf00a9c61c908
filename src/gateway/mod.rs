use async_trait::async_trait;
use thiserror::Error;

use crate::types::{MappingRule, Protocol};

pub mod discovery;
pub mod memory;
pub mod upnp;

pub use discovery::{DiscoveryError, GatewayIdentity};
pub use memory::MemoryGateway;
pub use upnp::UpnpGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request to the gateway failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The device answered with a UPnP error.
    #[error("UPnP error {code}: {description}")]
    Upnp { code: u16, description: String },

    #[error("unexpected response from the gateway (HTTP {status})")]
    UnexpectedResponse { status: u16 },
}

/// Port mapping operations of a gateway device.
///
/// Both operations must be idempotent: adding a mapping that is already
/// present succeeds without duplicating it, and deleting an absent mapping
/// succeeds.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn add_port_mapping(&self, rule: &MappingRule) -> Result<(), GatewayError>;

    /// The device identifies a mapping by its external port and protocol.
    async fn delete_port_mapping(
        &self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), GatewayError>;
}
