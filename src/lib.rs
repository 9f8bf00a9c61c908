//! Load balancers for edge clusters behind a UPnP Internet Gateway Device.
//!
//! Services annotated with `midokura.com/load-balancer-type: upnp-igd` get
//! one port mapping per declared port on the gateway:
//!
//! ```text
//! <external address>:<port> -> <this node>:<nodePort>
//! ```
//!
//! The [`LoadBalancerController`] converges the gateway's mappings to the
//! desired set, remembering in a [`Registry`] what it installed.

pub mod config;
pub mod controller;
pub mod diff;
pub mod error;
pub mod gateway;
pub mod reconciler;
pub mod registry;
pub mod source;
pub mod types;
pub mod validate;

pub use controller::{LoadBalancerController, Operation};
pub use error::{Error, GatewayOp, Result};
pub use gateway::{GatewayClient, GatewayError, GatewayIdentity};
pub use registry::{LoadBalancerRecord, Registry};
