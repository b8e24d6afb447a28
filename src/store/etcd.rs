use super::{Action, KvStore, Node, Response};
use crate::errors::Errors;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

// etcd v2 error codes
const ERROR_KEY_NOT_FOUND: u32 = 100;
const ERROR_EVENT_INDEX_CLEARED: u32 = 401;

#[derive(Debug, Deserialize)]
struct WireResponse {
    action: String,
    node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    error_code: u32,
    message: String,
    #[serde(default)]
    cause: String,
}

/// Client for the etcd v2 keys API.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: reqwest::Client,
    endpoint: String,
}

impl EtcdStore {
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Result<Self, Errors> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Errors::ConfigError(format!("Unable to build etcd client: {}", e)))?;
        Ok(EtcdStore {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v2/keys{}", self.endpoint, key)
    }

    async fn fetch(&self, key: &str, query: &[(&str, String)]) -> Result<Response, Errors> {
        let res = self
            .client
            .get(self.url(key))
            .query(query)
            .send()
            .await
            .map_err(|e| Errors::StoreError(format!("Request to {} failed: {}", key, e)))?;
        let success = res.status().is_success();
        let etcd_index = res
            .headers()
            .get("X-Etcd-Index")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.parse::<u64>().ok());
        let body = res
            .text()
            .await
            .map_err(|e| Errors::StoreError(format!("Unable to read body for {}: {}", key, e)))?;
        parse_response(success, etcd_index, &body)
    }
}

fn parse_response(success: bool, etcd_index: Option<u64>, body: &str) -> Result<Response, Errors> {
    if !success {
        let err: WireError = serde_json::from_str(body)
            .map_err(|_| Errors::StoreError(format!("Unexpected etcd answer: {}", body)))?;
        return Err(match err.error_code {
            ERROR_KEY_NOT_FOUND => Errors::KeyNotFound(err.cause),
            ERROR_EVENT_INDEX_CLEARED => Errors::IndexCleared(err.message),
            code => Errors::StoreError(format!("etcd error {}: {} ({})", code, err.message, err.cause)),
        });
    }
    let wire: WireResponse = serde_json::from_str(body)
        .map_err(|e| Errors::StoreError(format!("Unable to parse etcd response: {}", e)))?;
    let action = Action::from_str(&wire.action)?;
    let index = etcd_index.unwrap_or(wire.node.modified_index);
    Ok(Response {
        action,
        node: wire.node,
        index,
    })
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Response, Errors> {
        self.fetch(
            key,
            &[
                ("recursive", recursive.to_string()),
                ("sorted", "true".to_string()),
            ],
        )
        .await
    }

    async fn watch(
        &self,
        prefix: &str,
        wait_index: u64,
        sender: mpsc::Sender<Response>,
    ) -> Result<(), Errors> {
        let mut wait_index = wait_index;
        loop {
            let mut query = vec![
                ("wait", "true".to_string()),
                ("recursive", "true".to_string()),
            ];
            if wait_index > 0 {
                query.push(("waitIndex", wait_index.to_string()));
            }
            let mut response = self.fetch(prefix, &query).await?;
            // the header carries the cluster index, the event its own revision
            response.index = response.node.modified_index;
            wait_index = response.index + 1;
            sender
                .send(response)
                .await
                .map_err(|e| Errors::WatchClosed(e.to_string()))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recursive_get() -> Result<(), Errors> {
        let body = r#"{
            "action": "get",
            "node": {
                "key": "/domains",
                "dir": true,
                "nodes": [{
                    "key": "/domains/api",
                    "dir": true,
                    "nodes": [
                        {"key": "/domains/api/type", "value": "service", "modifiedIndex": 7, "createdIndex": 7},
                        {"key": "/domains/api/value", "value": "orders", "modifiedIndex": 8, "createdIndex": 8}
                    ],
                    "modifiedIndex": 7,
                    "createdIndex": 7
                }]
            }
        }"#;
        let res = parse_response(true, Some(12), body)?;
        assert_eq!(res.action, Action::Get);
        assert_eq!(res.index, 12);
        let api = &res.node.nodes[0];
        assert!(api.dir);
        assert_eq!(api.nodes[1].value, "orders");
        assert_eq!(api.nodes[1].modified_index, 8);
        Ok(())
    }

    #[test]
    fn test_parse_expire_event() -> Result<(), Errors> {
        let body = r#"{"action":"expire","node":{"key":"/services/orders/1","dir":true,"modifiedIndex":20,"createdIndex":5},"prevNode":{"key":"/services/orders/1","dir":true}}"#;
        let res = parse_response(true, None, body)?;
        assert_eq!(res.action, Action::Expire);
        assert_eq!(res.index, 20);
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        let not_found = r#"{"errorCode":100,"message":"Key not found","cause":"/domains","index":3}"#;
        assert!(matches!(
            parse_response(false, Some(3), not_found),
            Err(Errors::KeyNotFound(cause)) if cause == "/domains"
        ));
        let cleared = r#"{"errorCode":401,"message":"The event in requested index is outdated and cleared","cause":"the requested history has been cleared [1008/4]","index":2007}"#;
        assert!(matches!(
            parse_response(false, None, cleared),
            Err(Errors::IndexCleared(_))
        ));
        assert!(matches!(
            parse_response(false, None, "gateway timeout"),
            Err(Errors::StoreError(_))
        ));
    }
}
