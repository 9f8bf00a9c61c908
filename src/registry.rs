//! In-memory record of what the controller believes is installed on the
//! gateway, per load balancer.
//!
//! The registry lives as long as the process and is never re-derived from
//! the device.  Each load balancer has its own lock: a reconciliation holds
//! its [`Entry`] from lookup to commit, so two reconciliations of the same
//! load balancer never interleave, while different load balancers proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::types::{LoadBalancerName, LoadBalancerStatus, MappingRule};

/// Last committed state of one load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerRecord {
    pub installed: Vec<MappingRule>,
    pub status: LoadBalancerStatus,
}

type Slot = Arc<Mutex<Option<LoadBalancerRecord>>>;

#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<LoadBalancerName, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the committed record, waiting for an in-flight
    /// reconciliation of the same load balancer to finish.
    pub async fn get(&self, name: &LoadBalancerName) -> Option<LoadBalancerRecord> {
        let slot = self.entries.read().await.get(name).cloned()?;
        let record = slot.lock().await;
        record.clone()
    }

    /// Takes exclusive access to the record of `name`, whether or not one
    /// exists yet.
    pub async fn lock(&self, name: &LoadBalancerName) -> Entry {
        let slot = {
            let mut entries = self.entries.write().await;
            // Drop empty slots nobody else is holding.  Slots are only
            // cloned under this write lock, so a count of one is final.
            entries.retain(|_, slot| {
                Arc::strong_count(slot) > 1 || slot.try_lock().map_or(true, |r| r.is_some())
            });
            Arc::clone(entries.entry(name.clone()).or_default())
        };
        Entry {
            record: slot.lock_owned().await,
        }
    }
}

/// Exclusive handle on one load balancer's record.  Changes are visible
/// as soon as they are made; dropping the handle without committing leaves
/// the previous record in place.
pub struct Entry {
    record: OwnedMutexGuard<Option<LoadBalancerRecord>>,
}

impl Entry {
    pub fn record(&self) -> Option<&LoadBalancerRecord> {
        self.record.as_ref()
    }

    /// Replaces the record wholesale.
    pub fn commit(mut self, record: LoadBalancerRecord) {
        *self.record = Some(record);
    }

    pub fn remove(mut self) {
        *self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use crate::types::Protocol;

    fn name(n: &str) -> LoadBalancerName {
        let service = crate::types::Service {
            metadata: crate::types::ObjectMeta {
                name: n.into(),
                namespace: "default".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        LoadBalancerName::new("cluster", &service)
    }

    fn record(port: u16) -> LoadBalancerRecord {
        LoadBalancerRecord {
            installed: vec![MappingRule {
                protocol: Protocol::Tcp,
                external_port: port,
                internal_host: "192.0.2.1".into(),
                internal_port: 30000,
                description: "cluster/default/svc/http".into(),
            }],
            status: LoadBalancerStatus {
                advertised_address: Ipv4Addr::new(203, 0, 113, 1),
            },
        }
    }

    #[tokio::test]
    async fn test_commit_and_get() {
        let registry = Registry::new();
        let a = name("a");
        assert_eq!(registry.get(&a).await, None);

        let entry = registry.lock(&a).await;
        assert!(entry.record().is_none());
        entry.commit(record(80));
        assert_eq!(registry.get(&a).await, Some(record(80)));

        let entry = registry.lock(&a).await;
        assert_eq!(entry.record(), Some(&record(80)));
        entry.commit(record(81));
        assert_eq!(registry.get(&a).await, Some(record(81)));
        assert_eq!(registry.get(&name("b")).await, None);
    }

    #[tokio::test]
    async fn test_drop_without_commit_keeps_previous() {
        let registry = Registry::new();
        let a = name("a");
        registry.lock(&a).await.commit(record(80));

        drop(registry.lock(&a).await);
        assert_eq!(registry.get(&a).await, Some(record(80)));
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = Registry::new();
        let a = name("a");
        registry.lock(&a).await.commit(record(80));
        registry.lock(&a).await.remove();
        assert_eq!(registry.get(&a).await, None);

        // Empty slots are pruned on the next lock.
        drop(registry.lock(&name("b")).await);
        assert!(!registry.entries.read().await.contains_key(&a));
    }

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let registry = Arc::new(Registry::new());
        let a = name("a");
        let held = registry.lock(&a).await;

        let waiter = {
            let registry = Arc::clone(&registry);
            let a = a.clone();
            tokio::spawn(async move { registry.lock(&a).await.commit(record(90)) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        held.commit(record(80));
        waiter.await.unwrap();
        assert_eq!(registry.get(&a).await, Some(record(90)));
    }

    #[tokio::test]
    async fn test_different_names_are_independent() {
        let registry = Registry::new();
        let _a = registry.lock(&name("a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), registry.lock(&name("b")))
            .await
            .expect("lock on another name must not wait");
        b.commit(record(80));
        assert_eq!(registry.get(&name("b")).await, Some(record(80)));
    }
}
