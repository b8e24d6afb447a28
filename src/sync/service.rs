use super::Registrar;
use crate::{
    errors::Errors,
    registry::{
        keys::{self, ServiceField, ServiceKey, StatusField, SERVICE_CONFIG_KEY},
        Endpoint, Registry, Service, ServiceCluster, ServiceConfig, Status,
    },
    store::{Action, KvStore, Node},
};
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};

/// Keeps the service registry in line with the service subtree.
///
/// Whatever key changed, the whole service is read again and every instance
/// compared with what is registered, so fields that belong together (the
/// status flags for instance) are never seen half updated.
pub struct ServiceRegistrar {
    store: Arc<dyn KvStore>,
    prefix: String,
    services: Registry<ServiceCluster>,
}

impl ServiceRegistrar {
    pub fn new(store: Arc<dyn KvStore>, prefix: &str, services: Registry<ServiceCluster>) -> Self {
        ServiceRegistrar {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
            services,
        }
    }

    fn remove_service(&self, name: &str) -> bool {
        match self.services.remove(name) {
            Some(_) => {
                tracing::info!("Removing service {}", name);
                true
            }
            None => false,
        }
    }

    async fn read_instance(
        &self,
        name: &str,
        index: &str,
        previous: Option<&Service>,
    ) -> Result<Service, Errors> {
        let path = keys::instance_key(&self.prefix, name, index);
        let response = self.store.get(&path, true).await?;
        let mut service = Service::new(name, index, &path);

        for node in response.node.walk() {
            let Some(key) = keys::parse_service_key(&self.prefix, &node.key) else {
                continue;
            };
            match key.field {
                ServiceField::Location if !node.dir => match Endpoint::parse(&node.value) {
                    Ok(endpoint) => service.endpoint = Some(endpoint),
                    Err(e) => tracing::warn!("Service {} instance {}: {}", name, index, e),
                },
                ServiceField::Settings(Some(entry)) if entry == SERVICE_CONFIG_KEY && !node.dir => {
                    match ServiceConfig::parse(&node.value) {
                        Ok(settings) => service.settings = settings,
                        Err(e) => {
                            tracing::warn!("Service {} instance {}: {}", name, index, e);
                            if let Some(previous) = previous {
                                service.settings = previous.settings.clone();
                            }
                        }
                    }
                }
                ServiceField::Domain if !node.dir => service.domain = node.value.clone(),
                ServiceField::Status(None) => {
                    service.status.get_or_insert_with(Status::default);
                }
                ServiceField::Status(Some(field)) => {
                    let status = service.status.get_or_insert_with(Status::default);
                    let value = node.value.clone();
                    match field {
                        StatusField::Alive => status.alive = value,
                        StatusField::Current => status.current = value,
                        StatusField::Expected => status.expected = value,
                    }
                }
                _ => {}
            }
        }
        Ok(service)
    }

    async fn resync(&self, name: &str) -> bool {
        let root = match self
            .store
            .get(&keys::service_key(&self.prefix, name), true)
            .await
        {
            Ok(response) => response.node,
            Err(Errors::KeyNotFound(_)) => return self.remove_service(name),
            Err(e) => {
                tracing::error!("Unable to get information for service {} from store: {}", name, e);
                return false;
            }
        };

        let current = self.services.get(name);
        let mut cluster = current.clone().unwrap_or_default();
        let mut present: HashSet<String> = HashSet::new();

        for index_node in root.nodes.iter().filter(|n| n.dir) {
            let Some(ServiceKey {
                index: Some(index), ..
            }) = keys::parse_service_key(&self.prefix, &index_node.key)
            else {
                continue;
            };
            present.insert(index.clone());

            let service = match self.read_instance(name, &index, cluster.get(&index)).await {
                Ok(service) => service,
                Err(Errors::KeyNotFound(_)) => {
                    present.remove(&index);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Unable to read instance {} of service {}: {}", index, name, e);
                    continue;
                }
            };
            if cluster.get(&index) == Some(&service) {
                continue;
            }
            match &service.endpoint {
                Some(endpoint) => tracing::info!(
                    service = %name,
                    host = %endpoint.host,
                    port = endpoint.port,
                    "Registering service {} with location : http://{}:{}/",
                    name,
                    endpoint.host,
                    endpoint.port
                ),
                None => tracing::info!(service = %name, "Registering service {} without location", name),
            }
            cluster.put(service);
        }

        let gone: Vec<String> = cluster
            .indices()
            .filter(|index| !present.contains(*index))
            .cloned()
            .collect();
        for index in gone {
            cluster.remove(&index);
            tracing::info!("Removed instance {} of service {}", index, name);
        }

        if cluster.is_empty() {
            return self.remove_service(name);
        }
        if current.as_ref() == Some(&cluster) {
            return false;
        }
        self.services.insert(name, cluster);
        true
    }
}

#[async_trait]
impl Registrar for ServiceRegistrar {
    type Key = ServiceKey;

    fn decode(&self, key: &str) -> Option<ServiceKey> {
        keys::parse_service_key(&self.prefix, key)
    }

    fn prune(&self, nodes: &[Node]) -> usize {
        let present: HashSet<String> = nodes
            .iter()
            .filter_map(|n| keys::parse_service_key(&self.prefix, &n.key))
            .map(|k| k.name)
            .collect();
        let dropped = self.services.retain(|name| present.contains(name));
        for name in dropped.iter() {
            tracing::info!("Removed service {}: no longer in store", name);
        }
        dropped.len()
    }

    async fn register(&self, key: ServiceKey, _node: &Node, action: Action) -> bool {
        // expire goes through resync: the store decides what is left
        if action.is_delete() {
            return self.remove_service(&key.name);
        }
        self.resync(&key.name).await
    }
}
