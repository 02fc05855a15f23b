// Node Inventory Adapter
//
// REST client for the machine inventory service. The inventory owns node
// state; this adapter only flips READY to HOLD on allocate and deletes the
// hold on release.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::{NodeHandle, NodePool};

#[derive(Debug, Deserialize)]
struct NodeRecord {
    id: i64,
    ip: String,
    label: String,
    state: String,
    /// Milliseconds the node has been in its current state.
    state_age_ms: i64,
}

#[derive(Debug, Serialize)]
struct HoldRequest<'a> {
    state: &'a str,
}

pub struct HttpNodePool {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNodePool {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let url = format!("{}/nodes", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::NodePool(format!("GET {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(AppError::NodePool(format!(
                "GET {}: {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::NodePool(format!("GET {}: {}", url, e)))
    }

    async fn set_state(&self, node_id: i64, state: &str) -> Result<()> {
        let url = format!("{}/nodes/{}/state", self.base_url, node_id);
        let response = self
            .client
            .put(&url)
            .json(&HoldRequest { state })
            .send()
            .await
            .map_err(|e| AppError::NodePool(format!("PUT {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(AppError::NodePool(format!(
                "PUT {}: {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NodePool for HttpNodePool {
    async fn allocate(&self, label: &str) -> Result<Option<NodeHandle>> {
        let nodes = self.list_nodes().await?;
        let Some(candidate) = nodes
            .into_iter()
            .find(|n| n.label == label && n.state == "READY")
        else {
            debug!(label, "no ready nodes");
            return Ok(None);
        };

        self.set_state(candidate.id, "HOLD").await?;
        info!(node_id = candidate.id, node_ip = %candidate.ip, label, "allocated node");
        Ok(Some(NodeHandle {
            id: candidate.id,
            ip: candidate.ip,
        }))
    }

    async fn held_nodes(&self, min_state_age: Duration) -> Result<HashSet<i64>> {
        let floor_ms = min_state_age.as_millis() as i64;
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| n.state == "HOLD" && n.state_age_ms >= floor_ms)
            .map(|n| n.id)
            .collect())
    }

    async fn release(&self, node_id: i64) -> Result<()> {
        if node_id == 0 {
            return Ok(());
        }
        let url = format!("{}/nodes/{}/state", self.base_url, node_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AppError::NodePool(format!("DELETE {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(AppError::NodePool(format!(
                "DELETE {}: {}",
                url,
                response.status()
            )));
        }
        info!(node_id, "released node");
        Ok(())
    }
}
