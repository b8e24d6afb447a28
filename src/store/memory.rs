//! In-process store with the same tree, revision and watch semantics as the
//! remote one. Used to drive the synchronizer without a running etcd.

use super::{Action, KvStore, Node, Response};
use crate::errors::Errors;
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};
use tokio::sync::{broadcast, mpsc};

// changes kept around for watches resuming from an older revision
const HISTORY_LIMIT: usize = 1000;
const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Feed {
    Change(Response),
    Disconnect,
}

#[derive(Debug, Default)]
struct Inner {
    // leaf key -> (value, modified index); directories are implicit
    data: BTreeMap<String, (String, u64)>,
    revision: u64,
    history: Vec<Response>,
    // every revision up to this one has been dropped from history
    cleared_upto: u64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    feed: broadcast::Sender<Feed>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn is_under(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        MemoryStore {
            inner: Mutex::new(Inner::default()),
            feed,
            unavailable: AtomicBool::new(false),
        }
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>, Errors> {
        self.inner
            .lock()
            .map_err(|e| Errors::StoreError(format!("Memory store poisoned: {}", e)))
    }

    fn check_available(&self) -> Result<(), Errors> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Errors::StoreError("Store unavailable".to_string()));
        }
        Ok(())
    }

    /// Simulates an outage: reads and new watches fail, live watches break.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
        if unavailable {
            self.disconnect();
        }
    }

    /// Breaks every live watch without touching the data.
    pub fn disconnect(&self) {
        let _ = self.feed.send(Feed::Disconnect);
    }

    pub fn revision(&self) -> Result<u64, Errors> {
        Ok(self.inner()?.revision)
    }

    /// Sets a leaf value and returns the revision of the change.
    pub fn set(&self, key: &str, value: &str) -> Result<u64, Errors> {
        let key = normalize(key);
        let mut inner = self.inner()?;
        let dir_prefix = format!("{}/", key);
        if inner
            .data
            .range(dir_prefix.clone()..)
            .next()
            .map(|(k, _)| k.starts_with(&dir_prefix))
            .unwrap_or(false)
        {
            return Err(Errors::StoreError(format!("Not a file: {}", key)));
        }
        let mut parent = key.as_str();
        while let Some((p, _)) = parent.rsplit_once('/') {
            if p.is_empty() {
                break;
            }
            if inner.data.contains_key(p) {
                return Err(Errors::StoreError(format!("Not a directory: {}", p)));
            }
            parent = p;
        }

        inner.revision += 1;
        let index = inner.revision;
        inner.data.insert(key.clone(), (value.to_string(), index));
        let response = Response {
            action: Action::Set,
            node: Node::leaf(key, value, index),
            index,
        };
        self.publish(&mut inner, response);
        Ok(index)
    }

    /// Deletes a leaf or, recursively, a directory.
    pub fn delete(&self, key: &str) -> Result<u64, Errors> {
        self.remove(key, Action::Delete)
    }

    /// Removes a key as if its TTL ran out.
    pub fn expire(&self, key: &str) -> Result<u64, Errors> {
        self.remove(key, Action::Expire)
    }

    fn remove(&self, key: &str, action: Action) -> Result<u64, Errors> {
        let key = normalize(key);
        let mut inner = self.inner()?;
        let doomed: Vec<String> = inner
            .data
            .keys()
            .filter(|k| is_under(k, &key))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Err(Errors::KeyNotFound(key));
        }
        let dir = !(doomed.len() == 1 && doomed[0] == key);
        for k in doomed.iter() {
            inner.data.remove(k);
        }

        inner.revision += 1;
        let index = inner.revision;
        let response = Response {
            action,
            node: Node {
                key,
                dir,
                modified_index: index,
                ..Default::default()
            },
            index,
        };
        self.publish(&mut inner, response);
        Ok(index)
    }

    fn publish(&self, inner: &mut Inner, response: Response) {
        inner.history.push(response.clone());
        if inner.history.len() > HISTORY_LIMIT {
            let dropped = inner.history.remove(0);
            inner.cleared_upto = dropped.index;
        }
        // no live watch is fine
        let _ = self.feed.send(Feed::Change(response));
    }

    fn build_dir(data: &BTreeMap<String, (String, u64)>, key: &str, recursive: bool) -> Node {
        let prefix = format!("{}/", key);
        let mut children: BTreeMap<String, Node> = BTreeMap::new();
        for (k, (v, index)) in data
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
        {
            let rest = &k[prefix.len()..];
            match rest.split_once('/') {
                None => {
                    children.insert(rest.to_string(), Node::leaf(k.clone(), v.clone(), *index));
                }
                Some((child, _)) => {
                    if children.contains_key(child) {
                        continue;
                    }
                    let child_key = format!("{}{}", prefix, child);
                    let node = if recursive {
                        Self::build_dir(data, &child_key, true)
                    } else {
                        Node {
                            key: child_key,
                            dir: true,
                            ..Default::default()
                        }
                    };
                    children.insert(child.to_string(), node);
                }
            }
        }
        let nodes: Vec<Node> = children.into_values().collect();
        Node {
            key: key.to_string(),
            dir: true,
            modified_index: nodes.iter().map(|n| n.modified_index).max().unwrap_or(0),
            nodes,
            ..Default::default()
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Response, Errors> {
        self.check_available()?;
        let key = normalize(key);
        let inner = self.inner()?;
        if let Some((value, index)) = inner.data.get(&key) {
            return Ok(Response {
                action: Action::Get,
                node: Node::leaf(key.clone(), value.clone(), *index),
                index: inner.revision,
            });
        }
        let node = Self::build_dir(&inner.data, &key, recursive);
        if node.nodes.is_empty() && key != "/" {
            return Err(Errors::KeyNotFound(key));
        }
        Ok(Response {
            action: Action::Get,
            node,
            index: inner.revision,
        })
    }

    async fn watch(
        &self,
        prefix: &str,
        wait_index: u64,
        sender: mpsc::Sender<Response>,
    ) -> Result<(), Errors> {
        self.check_available()?;
        let prefix = normalize(prefix);
        let (mut rx, backlog, mut next) = {
            let inner = self.inner()?;
            if wait_index != 0 && wait_index <= inner.cleared_upto {
                return Err(Errors::IndexCleared(format!(
                    "requested {}, oldest available {}",
                    wait_index,
                    inner.cleared_upto + 1
                )));
            }
            let rx = self.feed.subscribe();
            let backlog: Vec<Response> = if wait_index == 0 {
                Vec::new()
            } else {
                inner
                    .history
                    .iter()
                    .filter(|r| r.index >= wait_index && is_under(&r.node.key, &prefix))
                    .cloned()
                    .collect()
            };
            (rx, backlog, wait_index.max(inner.revision + 1))
        };

        for response in backlog {
            sender
                .send(response)
                .await
                .map_err(|e| Errors::WatchClosed(e.to_string()))?;
        }

        loop {
            match rx.recv().await {
                Ok(Feed::Change(response)) => {
                    if response.index < next || !is_under(&response.node.key, &prefix) {
                        continue;
                    }
                    next = response.index + 1;
                    sender
                        .send(response)
                        .await
                        .map_err(|e| Errors::WatchClosed(e.to_string()))?;
                }
                Ok(Feed::Disconnect) => {
                    return Err(Errors::StoreError(format!("Watch on {} interrupted", prefix)));
                }
                Err(e) => {
                    return Err(Errors::StoreError(format!("Watch on {} broken: {}", prefix, e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_builds_tree() -> Result<(), Errors> {
        let store = MemoryStore::new();
        store.set("/services/orders/1/location", r#"{"Host":"h1","Port":9000}"#)?;
        store.set("/services/orders/1/status/alive", "true")?;
        store.set("/services/orders/2/domain", "api")?;

        let res = store.get("/services", true).await?;
        assert_eq!(res.action, Action::Get);
        assert_eq!(res.index, 3);
        assert_eq!(res.node.nodes.len(), 1);
        let orders = &res.node.nodes[0];
        assert_eq!(orders.key, "/services/orders");
        assert!(orders.dir);
        assert_eq!(orders.nodes.len(), 2);
        let status = orders.nodes[0]
            .nodes
            .iter()
            .find(|n| n.key == "/services/orders/1/status")
            .expect("status dir");
        assert_eq!(status.nodes[0].value, "true");

        let shallow = store.get("/services/orders", false).await?;
        assert!(shallow.node.nodes.iter().all(|n| n.nodes.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_key_and_conflicts() -> Result<(), Errors> {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("/domains", true).await,
            Err(Errors::KeyNotFound(_))
        ));
        store.set("/domains/api/type", "service")?;
        assert!(store.set("/domains/api", "x").is_err());
        assert!(store.set("/domains/api/type/deeper", "x").is_err());
        assert!(matches!(store.delete("/nope"), Err(Errors::KeyNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_resumes_from_index() -> Result<(), Errors> {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.set("/domains/api/type", "service")?;
        let second = store.set("/domains/api/value", "orders")?;
        store.set("/services/orders/1/domain", "api")?;

        let (tx, mut rx) = mpsc::channel(10);
        let watcher = store.clone();
        let handle = tokio::spawn(async move { watcher.watch("/domains", second, tx).await });

        let first = rx.recv().await.expect("backlog event");
        assert_eq!(first.node.key, "/domains/api/value");
        assert_eq!(first.index, second);

        store.delete("/domains/api")?;
        let removed = rx.recv().await.expect("live event");
        assert_eq!(removed.action, Action::Delete);
        assert!(removed.node.dir);

        store.disconnect();
        let result = handle.await.expect("watch task");
        assert!(matches!(result, Err(Errors::StoreError(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() -> Result<(), Errors> {
        let store = MemoryStore::new();
        store.set("/domains/api/type", "service")?;
        store.set_unavailable(true);
        assert!(store.get("/domains", true).await.is_err());
        let (tx, _rx) = mpsc::channel(1);
        assert!(store.watch("/domains", 0, tx).await.is_err());
        store.set_unavailable(false);
        assert!(store.get("/domains", true).await.is_ok());
        Ok(())
    }
}
