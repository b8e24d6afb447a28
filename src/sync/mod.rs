pub mod domain;
pub mod service;
pub mod supervisor;

use crate::{
    registry::{Domain, Registry, ServiceCluster},
    store::{Action, KvStore, Node},
};
use async_trait::async_trait;
use domain::DomainRegistrar;
use service::ServiceRegistrar;
use std::{sync::Arc, time::Duration};
use supervisor::Supervisor;
use tokio::task::JoinHandle;

/// Turns one change notification into an update of a registry.
#[async_trait]
pub trait Registrar: Send + Sync + 'static {
    type Key: Send;

    /// Classifies a store key; `None` for keys outside the subtree schema,
    /// which are then never registered.
    fn decode(&self, key: &str) -> Option<Self::Key>;

    /// Applies the change and reports whether the registry was modified.
    async fn register(&self, key: Self::Key, node: &Node, action: Action) -> bool;

    /// Forgets every entity that has no node among `nodes`, the direct
    /// children of a complete subtree read. Returns how many were dropped.
    fn prune(&self, nodes: &[Node]) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub domain_prefix: String,
    pub service_prefix: String,
    pub retry_delay: Duration,
    pub channel_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            domain_prefix: "/domains".to_string(),
            service_prefix: "/services".to_string(),
            retry_delay: Duration::from_secs(1),
            channel_size: 10,
        }
    }
}

/// Owns the domain and service registries and the two supervisors feeding
/// them. Dropping it stops the supervisors; registry handles given out
/// before stay readable.
pub struct Synchronizer {
    domains: Registry<Domain>,
    services: Registry<ServiceCluster>,
    tasks: Vec<JoinHandle<()>>,
}

impl Synchronizer {
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<dyn KvStore>, conf: &SyncConfig) -> Self {
        let domains = Registry::new();
        let services = Registry::new();

        let domain_supervisor = Supervisor::new(
            store.clone(),
            &conf.domain_prefix,
            DomainRegistrar::new(store.clone(), &conf.domain_prefix, domains.clone()),
            conf.retry_delay,
            conf.channel_size,
        );
        let service_supervisor = Supervisor::new(
            store.clone(),
            &conf.service_prefix,
            ServiceRegistrar::new(store, &conf.service_prefix, services.clone()),
            conf.retry_delay,
            conf.channel_size,
        );

        let tasks = vec![
            tokio::spawn(domain_supervisor.run()),
            tokio::spawn(service_supervisor.run()),
        ];
        tracing::info!(
            "Synchronizing domains from {} and services from {}",
            conf.domain_prefix,
            conf.service_prefix
        );

        Synchronizer {
            domains,
            services,
            tasks,
        }
    }

    pub fn domains(&self) -> Registry<Domain> {
        self.domains.clone()
    }

    pub fn services(&self) -> Registry<ServiceCluster> {
        self.services.clone()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Errors, registry::Endpoint, store::memory::MemoryStore};

    fn test_config() -> SyncConfig {
        SyncConfig {
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_initial_load_populates_both_registries() -> Result<(), Errors> {
        let store = Arc::new(MemoryStore::new());
        store.set("/domains/api/type", "service")?;
        store.set("/domains/api/value", "orders")?;
        store.set("/services/orders/1/location", r#"{"Host":"h1","Port":9000}"#)?;
        store.set("/services/orders/1/status/alive", "true")?;

        let sync = Synchronizer::start(store.clone(), &test_config());
        let domains = sync.domains();
        let services = sync.services();
        eventually("domain api", || domains.contains("api")).await;
        eventually("service orders", || services.contains("orders")).await;

        assert_eq!(
            domains.get("api"),
            Some(Domain {
                name: "api".to_string(),
                kind: "service".to_string(),
                target: "orders".to_string(),
                settings: Default::default(),
            })
        );
        let orders = services.get("orders").expect("orders");
        let first = orders.get("1").expect("instance 1");
        assert_eq!(
            first.endpoint,
            Some(Endpoint {
                host: "h1".to_string(),
                port: 9000
            })
        );
        assert_eq!(first.status.as_ref().map(|s| s.alive.as_str()), Some("true"));
        Ok(())
    }

    #[tokio::test]
    async fn test_live_changes_reach_registries() -> Result<(), Errors> {
        let store = Arc::new(MemoryStore::new());
        store.set("/domains/api/type", "service")?;
        store.set("/domains/api/value", "orders")?;
        store.set("/services/orders/1/location", r#"{"Host":"h1","Port":9000}"#)?;

        let sync = Synchronizer::start(store.clone(), &test_config());
        let domains = sync.domains();
        let services = sync.services();
        eventually("initial load", || {
            domains.contains("api") && services.contains("orders")
        })
        .await;

        store.set("/domains/api/settings/timeout", "30")?;
        eventually("timeout setting", || {
            domains
                .get("api")
                .map(|d| d.settings.get("timeout").map(String::as_str) == Some("30"))
                .unwrap_or(false)
        })
        .await;
        let api = domains.get("api").expect("api");
        assert_eq!((api.kind.as_str(), api.target.as_str()), ("service", "orders"));

        store.set("/services/orders/2/location", r#"{"Host":"h2","Port":9001}"#)?;
        eventually("second instance", || {
            services.get("orders").map(|c| c.len() == 2).unwrap_or(false)
        })
        .await;

        // a store outage is survived and changes made meanwhile are caught up
        store.disconnect();
        store.delete("/services/orders")?;
        store.delete("/domains/api/settings/timeout")?;
        eventually("orders removed", || !services.contains("orders")).await;
        eventually("timeout removed", || {
            domains
                .get("api")
                .map(|d| d.settings.is_empty())
                .unwrap_or(false)
        })
        .await;

        store.expire("/domains/api")?;
        eventually("api removed", || !domains.contains("api")).await;

        sync.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn test_registry_handles_outlive_shutdown() -> Result<(), Errors> {
        let store = Arc::new(MemoryStore::new());
        store.set("/domains/api/type", "service")?;
        store.set("/domains/api/value", "orders")?;
        let sync = Synchronizer::start(store.clone(), &test_config());
        let domains = sync.domains();
        eventually("domain api", || domains.contains("api")).await;

        drop(sync);
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.delete("/domains/api")?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(domains.contains("api"));
        Ok(())
    }
}
