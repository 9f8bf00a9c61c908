//! Gateway held in memory.  Backs dry runs, where mappings are logged but
//! no device is contacted, and serves as the test double.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use super::{GatewayClient, GatewayError};
use crate::types::{MappingRule, Protocol};

/// A call received by a [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Add(MappingRule),
    Delete { external_port: u16, protocol: Protocol },
}

#[derive(Debug, Default)]
struct State {
    // Keyed the way a device keys its table.
    mappings: BTreeMap<(u16, Protocol), MappingRule>,
    calls: Vec<GatewayCall>,
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently installed mappings, ordered by external port.
    pub async fn mappings(&self) -> Vec<MappingRule> {
        self.state.lock().await.mappings.values().cloned().collect()
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait]
impl GatewayClient for MemoryGateway {
    async fn add_port_mapping(&self, rule: &MappingRule) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        debug!("[dry-run] add port mapping {}", rule);
        state.calls.push(GatewayCall::Add(rule.clone()));
        state
            .mappings
            .insert((rule.external_port, rule.protocol), rule.clone());
        Ok(())
    }

    async fn delete_port_mapping(
        &self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        debug!("[dry-run] delete port mapping {}/{}", external_port, protocol);
        state.calls.push(GatewayCall::Delete {
            external_port,
            protocol,
        });
        state.mappings.remove(&(external_port, protocol));
        Ok(())
    }
}
