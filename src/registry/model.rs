use crate::errors::Errors;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Routing rule for one hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub kind: String,
    pub target: String,
    pub settings: HashMap<String, String>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Domain {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Only complete domains are ever published.
    pub fn is_complete(&self) -> bool {
        !self.kind.is_empty() && !self.target.is_empty()
    }
}

/// Where an instance listens, as written in its `location` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, Errors> {
        serde_json::from_str(raw)
            .map_err(|e| Errors::DecodeError(format!("Invalid location {:?}: {}", raw, e)))
    }
}

/// Opaque per-service configuration, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceConfig(pub serde_json::Map<String, serde_json::Value>);

impl ServiceConfig {
    pub fn parse(raw: &str) -> Result<Self, Errors> {
        serde_json::from_str(raw)
            .map_err(|e| Errors::DecodeError(format!("Invalid service config: {}", e)))
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

/// Rollout flags, copied verbatim from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub alive: String,
    pub current: String,
    pub expected: String,
}

/// One running instance of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub index: String,
    pub path: String,
    pub endpoint: Option<Endpoint>,
    pub domain: String,
    pub settings: ServiceConfig,
    pub status: Option<Status>,
}

impl Service {
    pub fn new(name: &str, index: &str, path: &str) -> Self {
        Service {
            name: name.to_string(),
            index: index.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Registered instances without a location must not receive traffic.
    pub fn is_routable(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn url(&self) -> Option<String> {
        self.endpoint
            .as_ref()
            .map(|e| format!("http://{}:{}/", e.host, e.port))
    }
}

/// All instances registered under one service name, keyed by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCluster {
    instances: HashMap<String, Service>,
}

impl ServiceCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: &str) -> Option<&Service> {
        self.instances.get(index)
    }

    /// Inserts or replaces the instance with the same index.
    pub fn put(&mut self, service: Service) {
        self.instances.insert(service.index.clone(), service);
    }

    pub fn remove(&mut self, index: &str) -> Option<Service> {
        self.instances.remove(index)
    }

    pub fn indices(&self) -> impl Iterator<Item = &String> {
        self.instances.keys()
    }

    pub fn instances(&self) -> impl Iterator<Item = &Service> {
        self.instances.values()
    }

    pub fn routable(&self) -> impl Iterator<Item = &Service> {
        self.instances.values().filter(|s| s.is_routable())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_decoding() -> Result<(), Errors> {
        let endpoint = Endpoint::parse(r#"{"Host":"10.0.0.5","Port":8080}"#)?;
        assert_eq!(
            endpoint,
            Endpoint {
                host: "10.0.0.5".to_string(),
                port: 8080
            }
        );
        assert!(Endpoint::parse("not json").is_err());
        assert!(Endpoint::parse(r#"{"Host":"h","Port":"80"}"#).is_err());
        Ok(())
    }

    #[test]
    fn test_service_config_must_be_object() -> Result<(), Errors> {
        let conf = ServiceConfig::parse(r#"{"robots":"User-agent: *","timeout":30}"#)?;
        assert_eq!(conf.get("timeout"), Some(&serde_json::json!(30)));
        assert!(ServiceConfig::parse("[1,2]").is_err());
        Ok(())
    }

    #[test]
    fn test_cluster_lookup_on_empty() {
        let mut cluster = ServiceCluster::new();
        assert!(cluster.get("1").is_none());
        assert!(cluster.remove("1").is_none());

        let mut svc = Service::new("orders", "1", "/services/orders/1");
        cluster.put(svc.clone());
        assert_eq!(cluster.routable().count(), 0);

        svc.endpoint = Some(Endpoint {
            host: "h1".to_string(),
            port: 9000,
        });
        cluster.put(svc);
        assert_eq!(cluster.len(), 1);
        let routable: Vec<_> = cluster.routable().collect();
        assert_eq!(routable[0].url().as_deref(), Some("http://h1:9000/"));
    }

    #[test]
    fn test_domain_completeness() {
        let mut domain = Domain::new("api");
        assert!(!domain.is_complete());
        domain.kind = "service".to_string();
        assert!(!domain.is_complete());
        domain.target = "orders".to_string();
        assert!(domain.is_complete());
    }
}
