use crate::types::Update;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod manifest;
pub use manifest::{Manifest, ManifestSource};

#[async_trait]
pub trait ServiceSource {
    /// Start watching the desired state for load balancer changes.
    /// Updates should be sent to the provided channel.
    async fn monitor(&self, update_tx: mpsc::Sender<Update>) -> Result<()>;
}
