use std::fmt;

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::types::{LoadBalancerName, MappingRule};
use crate::validate::Rejection;

pub type Result<T> = std::result::Result<T, Error>;

/// Gateway operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOp {
    Add,
    Delete,
}

impl fmt::Display for GatewayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GatewayOp::Add => "add",
            GatewayOp::Delete => "delete",
        })
    }
}

/// Errors returned by the load balancer controller.
#[derive(Debug, Error)]
pub enum Error {
    /// The service is not eligible for a gateway load balancer.  Nothing
    /// was changed; retrying is pointless until the service changes.
    #[error("{name}: {reason}")]
    ValidationRejected {
        name: LoadBalancerName,
        reason: Rejection,
    },

    /// No node exposes the controller's own gateway-facing address.
    #[error("{name}: no nodes with internal IP '{address}'")]
    AddressResolutionFailed {
        name: LoadBalancerName,
        address: String,
    },

    #[error("cannot update load balancer '{0}': not found")]
    NotFound(LoadBalancerName),

    /// The device rejected an operation.  Operations of the same
    /// reconciliation that already succeeded are not rolled back.
    #[error("{name}: failed to {op} port mapping {rule}: {source}")]
    Gateway {
        name: LoadBalancerName,
        op: GatewayOp,
        rule: MappingRule,
        #[source]
        source: GatewayError,
    },

    #[error("{name}: the local client ({local}) can't be used to set up mappings to {target}")]
    RefusedCrossHostMapping {
        name: LoadBalancerName,
        local: String,
        target: String,
    },
}
