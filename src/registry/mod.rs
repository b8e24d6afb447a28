pub mod keys;
pub mod model;

use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

pub use model::{Domain, Endpoint, Service, ServiceCluster, ServiceConfig, Status};

pub type Snapshot<V> = Arc<HashMap<String, V>>;

/// Named entities behind an atomically swapped snapshot.
///
/// Readers never block: they load the current snapshot and keep it for as
/// long as they need a consistent view. Each registry has a single writer
/// (its registrar), which publishes a modified copy.
pub struct Registry<V> {
    snap: Arc<ArcSwap<HashMap<String, V>>>,
}

impl<V> Clone for Registry<V> {
    fn clone(&self) -> Self {
        Registry {
            snap: self.snap.clone(),
        }
    }
}

impl<V: Clone> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Registry {
            snap: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    pub fn snapshot(&self) -> Snapshot<V> {
        self.snap.load_full()
    }

    /// Current value or `None`; never equal to a freshly built entity.
    pub fn get(&self, name: &str) -> Option<V> {
        self.snap.load().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snap.load().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.snap.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snap.load().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.snap.load().keys().cloned().collect()
    }

    pub(crate) fn insert(&self, name: &str, value: V) {
        self.update(|map| {
            map.insert(name.to_string(), value.clone());
        });
    }

    pub(crate) fn remove(&self, name: &str) -> Option<V> {
        let current = self.get(name)?;
        self.update(|map| {
            map.remove(name);
        });
        Some(current)
    }

    /// Drops every entry whose name fails `keep` and returns the dropped names.
    pub(crate) fn retain<F>(&self, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .snap
            .load()
            .keys()
            .filter(|name| !keep(name))
            .cloned()
            .collect();
        if !doomed.is_empty() {
            self.update(|map| {
                for name in doomed.iter() {
                    map.remove(name);
                }
            });
        }
        doomed
    }

    /// Applies `f` to a copy of the map and publishes the copy.
    pub(crate) fn update<F>(&self, f: F)
    where
        F: Fn(&mut HashMap<String, V>),
    {
        self.snap.rcu(|current| {
            let mut next = HashMap::clone(current);
            f(&mut next);
            next
        });
    }
}
