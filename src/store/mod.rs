pub mod etcd;
pub mod memory;

use crate::errors::Errors;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What the store did to produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "get")]
    Get,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "compareAndSwap")]
    CompareAndSwap,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "compareAndDelete")]
    CompareAndDelete,
    #[serde(rename = "expire")]
    Expire,
}

impl Action {
    pub fn from_str(s: &str) -> Result<Self, Errors> {
        match s {
            "get" => Ok(Action::Get),
            "set" => Ok(Action::Set),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "compareAndSwap" => Ok(Action::CompareAndSwap),
            "delete" => Ok(Action::Delete),
            "compareAndDelete" => Ok(Action::CompareAndDelete),
            "expire" => Ok(Action::Expire),
            _ => Err(Errors::StoreError(format!("Unknown action: {}", s))),
        }
    }

    /// `delete` and `compareAndDelete` both remove a key on request.
    pub fn is_delete(&self) -> bool {
        matches!(self, Action::Delete | Action::CompareAndDelete)
    }

    pub fn is_expire(&self) -> bool {
        matches!(self, Action::Expire)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Get => "get",
            Action::Set => "set",
            Action::Create => "create",
            Action::Update => "update",
            Action::CompareAndSwap => "compareAndSwap",
            Action::Delete => "delete",
            Action::CompareAndDelete => "compareAndDelete",
            Action::Expire => "expire",
        };
        write!(f, "{}", s)
    }
}

/// A key of the store, with its children when it is a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub modified_index: u64,
}

impl Node {
    pub fn leaf(key: impl Into<String>, value: impl Into<String>, modified_index: u64) -> Self {
        Node {
            key: key.into(),
            value: value.into(),
            dir: false,
            nodes: Vec::new(),
            modified_index,
        }
    }

    /// Every descendant of this node, depth first, parents before children.
    pub fn walk(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = self.nodes.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.nodes.iter().rev());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub action: Action,
    pub node: Node,
    /// Store revision the response was produced at.
    pub index: u64,
}

/// The two capabilities the synchronizer needs from the remote store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads `key` and, when `recursive`, its whole subtree.
    async fn get(&self, key: &str, recursive: bool) -> Result<Response, Errors>;

    /// Sends every change under `prefix` whose revision is at least
    /// `wait_index` (0 means "from now") into `sender`, in store order.
    /// Only returns once the subscription breaks.
    async fn watch(
        &self,
        prefix: &str,
        wait_index: u64,
        sender: mpsc::Sender<Response>,
    ) -> Result<(), Errors>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() -> Result<(), Errors> {
        for action in [
            Action::Get,
            Action::Set,
            Action::Create,
            Action::Update,
            Action::CompareAndSwap,
            Action::Delete,
            Action::CompareAndDelete,
            Action::Expire,
        ] {
            assert_eq!(Action::from_str(&action.to_string())?, action);
        }
        assert!(Action::from_str("bogus").is_err());
        assert!(Action::CompareAndDelete.is_delete());
        assert!(!Action::Expire.is_delete());
        Ok(())
    }

    #[test]
    fn test_walk_visits_parents_first() {
        let tree = Node {
            key: "/services".to_string(),
            dir: true,
            nodes: vec![Node {
                key: "/services/orders".to_string(),
                dir: true,
                nodes: vec![
                    Node::leaf("/services/orders/1/domain", "api", 3),
                    Node::leaf("/services/orders/1/location", "{}", 4),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let keys: Vec<&str> = tree.walk().iter().map(|n| n.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "/services/orders",
                "/services/orders/1/domain",
                "/services/orders/1/location"
            ]
        );
    }
}
