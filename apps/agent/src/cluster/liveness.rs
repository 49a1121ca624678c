use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::database::RegistryStore;
use crate::database::models::AgentNode;

/// How often each node writes its heartbeat row
pub const HEARTBEAT_INTERVAL_SECONDS: u64 = 6;

/// A node is considered dead once it has missed three heartbeats
pub const LIVENESS_WINDOW_SECONDS: i64 = 3 * HEARTBEAT_INTERVAL_SECONDS as i64;

/// Identity of this agent process, fixed at startup
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: String,
    pub hostname: String,
    pub region: Option<String>,
}

/// Filter the registry view down to nodes heartbeated within the liveness
/// window. Nodes come back sorted by node ID.
pub fn live_within(nodes: &[AgentNode], now: DateTime<Utc>, window_seconds: i64) -> Vec<AgentNode> {
    let cutoff = now - Duration::seconds(window_seconds);
    let mut live: Vec<AgentNode> = nodes
        .iter()
        .filter(|n| n.last_heartbeat >= cutoff)
        .cloned()
        .collect();
    live.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    live
}

/// Elect the master: the live node with the lexicographically smallest node
/// ID. Every node computes the same answer from the same registry read, so
/// no election round trips are needed.
pub fn elect_master(live_nodes: &[AgentNode]) -> Option<&str> {
    live_nodes
        .iter()
        .map(|n| n.node_id.as_str())
        .min()
}

/// Leader/liveness manager - heartbeats this node's identity and maintains
/// a cached view of the live node set.
///
/// If the registry store is unreachable the previous view (and therefore
/// the previous master verdict) stays in effect; liveness never flaps on a
/// persistence hiccup and never crashes the process.
pub struct LivenessManager {
    registry: Arc<dyn RegistryStore>,
    identity: NodeIdentity,
    window_seconds: i64,
    live_view: RwLock<Vec<AgentNode>>,
}

impl LivenessManager {
    /// The liveness window is always three missed heartbeats
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        identity: NodeIdentity,
        heartbeat_seconds: u64,
    ) -> Self {
        Self {
            registry,
            identity,
            window_seconds: 3 * heartbeat_seconds.max(1) as i64,
            live_view: RwLock::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    /// Write this node's heartbeat row
    pub async fn heartbeat(&self) -> Result<()> {
        let node = AgentNode {
            node_id: self.identity.node_id.clone(),
            hostname: self.identity.hostname.clone(),
            region: self.identity.region.clone(),
            last_heartbeat: Utc::now(),
        };
        self.registry.upsert_heartbeat(&node).await
    }

    /// Re-read the registry and recompute the live set.
    ///
    /// Store failures keep the previous view so a brief outage does not
    /// orphan monitors or demote the master.
    pub async fn refresh(&self) {
        match self.registry.list_nodes().await {
            Ok(nodes) => {
                let mut live = live_within(&nodes, Utc::now(), self.window_seconds);

                // This process is alive by definition: if its own heartbeat
                // is not visible yet it still takes part, so a lone node
                // always ends up with the full monitor set
                if !live.iter().any(|n| n.node_id == self.identity.node_id) {
                    live.push(AgentNode {
                        node_id: self.identity.node_id.clone(),
                        hostname: self.identity.hostname.clone(),
                        region: self.identity.region.clone(),
                        last_heartbeat: Utc::now(),
                    });
                    live.sort_by(|a, b| a.node_id.cmp(&b.node_id));
                }

                debug!("Registry refresh: {} registered, {} live", nodes.len(), live.len());
                *self.live_view.write().await = live;
            }
            Err(e) => {
                warn!("Failed to read node registry, keeping previous view: {}", e);
            }
        }
    }

    /// Current live node set (cached from the last successful refresh)
    pub async fn live_nodes(&self) -> Vec<AgentNode> {
        self.live_view.read().await.clone()
    }

    /// Node ID of the current master, if any node is live
    pub async fn master_id(&self) -> Option<String> {
        let view = self.live_view.read().await;
        elect_master(&view).map(|id| id.to_string())
    }

    /// Whether this node is the current master
    pub async fn is_master(&self) -> bool {
        self.master_id().await.as_deref() == Some(self.identity.node_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, seconds_ago: i64) -> AgentNode {
        AgentNode {
            node_id: id.to_string(),
            hostname: format!("host-{}", id),
            region: None,
            last_heartbeat: Utc::now() - Duration::seconds(seconds_ago),
        }
    }

    #[test]
    fn test_stale_nodes_are_pruned() {
        let nodes = vec![
            node("a", 0),
            node("b", LIVENESS_WINDOW_SECONDS + 1), // missed 3 heartbeats
            node("c", 5),
        ];

        let live = live_within(&nodes, Utc::now(), LIVENESS_WINDOW_SECONDS);
        let ids: Vec<&str> = live.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_node_on_window_edge_is_still_live() {
        let now = Utc::now();
        let mut edge = node("a", 0);
        edge.last_heartbeat = now - Duration::seconds(LIVENESS_WINDOW_SECONDS);

        let live = live_within(&[edge], now, LIVENESS_WINDOW_SECONDS);
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_master_is_smallest_node_id() {
        let nodes = vec![node("node-b", 0), node("node-a", 2), node("node-c", 4)];
        let live = live_within(&nodes, Utc::now(), LIVENESS_WINDOW_SECONDS);

        assert_eq!(elect_master(&live), Some("node-a"));
    }

    #[test]
    fn test_master_reflows_when_leader_dies() {
        let nodes = vec![
            node("node-a", LIVENESS_WINDOW_SECONDS + 10),
            node("node-b", 1),
        ];
        let live = live_within(&nodes, Utc::now(), LIVENESS_WINDOW_SECONDS);

        assert_eq!(elect_master(&live), Some("node-b"));
    }

    #[test]
    fn test_no_master_with_empty_registry() {
        assert_eq!(elect_master(&[]), None);
    }
}
