use super::Registrar;
use crate::{
    errors::Errors,
    registry::{
        keys::{self, DomainField, DomainKey},
        Domain, Registry,
    },
    store::{Action, KvStore, Node},
};
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};

/// Keeps the domain registry in line with the domain subtree.
pub struct DomainRegistrar {
    store: Arc<dyn KvStore>,
    prefix: String,
    domains: Registry<Domain>,
}

impl DomainRegistrar {
    pub fn new(store: Arc<dyn KvStore>, prefix: &str, domains: Registry<Domain>) -> Self {
        DomainRegistrar {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
            domains,
        }
    }

    fn remove_domain(&self, name: &str) -> bool {
        match self.domains.remove(name) {
            Some(_) => {
                tracing::info!("Removed domain {}", name);
                true
            }
            None => false,
        }
    }

    fn remove_setting(&self, name: &str, setting: Option<&str>) -> bool {
        let Some(domain) = self.domains.get(name) else {
            return false;
        };
        let changed = match setting {
            Some(setting) => domain.settings.contains_key(setting),
            None => !domain.settings.is_empty(),
        };
        if !changed {
            return false;
        }
        self.domains.update(|map| {
            if let Some(domain) = map.get_mut(name) {
                match setting {
                    Some(setting) => {
                        domain.settings.remove(setting);
                    }
                    None => domain.settings.clear(),
                }
            }
        });
        tracing::info!(
            "Removed setting {} of domain {}",
            setting.unwrap_or("*"),
            name
        );
        true
    }

    async fn read_domain(&self, name: &str, current: Option<&Domain>) -> Result<Domain, Errors> {
        let response = self
            .store
            .get(&keys::domain_key(&self.prefix, name), true)
            .await?;
        let mut domain = Domain::new(name);
        if let Some(current) = current {
            domain.settings = current.settings.clone();
        }
        for node in response.node.walk() {
            if node.dir {
                continue;
            }
            let Some(key) = keys::parse_domain_key(&self.prefix, &node.key) else {
                continue;
            };
            if key.name != name {
                continue;
            }
            match key.field {
                DomainField::Type => domain.kind = node.value.clone(),
                DomainField::Value => domain.target = node.value.clone(),
                DomainField::Setting(setting) => {
                    domain.settings.insert(setting, node.value.clone());
                }
                _ => {}
            }
        }
        Ok(domain)
    }
}

#[async_trait]
impl Registrar for DomainRegistrar {
    type Key = DomainKey;

    fn decode(&self, key: &str) -> Option<DomainKey> {
        keys::parse_domain_key(&self.prefix, key)
    }

    fn prune(&self, nodes: &[Node]) -> usize {
        let present: HashSet<String> = nodes
            .iter()
            .filter_map(|n| keys::parse_domain_key(&self.prefix, &n.key))
            .map(|k| k.name)
            .collect();
        let dropped = self.domains.retain(|name| present.contains(name));
        for name in dropped.iter() {
            tracing::info!("Removed domain {}: no longer in store", name);
        }
        dropped.len()
    }

    async fn register(&self, key: DomainKey, _node: &Node, action: Action) -> bool {
        if action.is_delete() || action.is_expire() {
            return match &key.field {
                DomainField::Setting(setting) => self.remove_setting(&key.name, Some(setting)),
                DomainField::Settings => self.remove_setting(&key.name, None),
                _ => self.remove_domain(&key.name),
            };
        }

        let current = self.domains.get(&key.name);
        let domain = match self.read_domain(&key.name, current.as_ref()).await {
            Ok(domain) => domain,
            Err(Errors::KeyNotFound(_)) => {
                tracing::debug!("Domain {} vanished before it could be read", key.name);
                return false;
            }
            Err(e) => {
                tracing::error!("Unable to read domain {}: {}", key.name, e);
                return false;
            }
        };

        if !domain.is_complete() {
            tracing::debug!("Domain {} is not complete yet", key.name);
            return false;
        }
        if current.as_ref() == Some(&domain) {
            return false;
        }

        tracing::info!(
            domain = %domain.name,
            kind = %domain.kind,
            target = %domain.target,
            "Registered domain {} with ({}) {}",
            domain.name,
            domain.kind,
            domain.target
        );
        self.domains.insert(&key.name, domain);
        true
    }
}
