use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

/// A peer observed by discovery. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// `ip:port` the peer is reachable at.
    pub address: String,
    pub service_port: u16,
    pub last_seen: DateTime<Utc>,
    pub status: NodeStatus,
}

impl Node {
    pub fn online(id: NodeId, address: String, service_port: u16) -> Self {
        Self {
            id,
            address,
            service_port,
            last_seen: Utc::now(),
            status: NodeStatus::Online,
        }
    }

    /// A node known only by its address, as used for direct `get --addr` fetches.
    pub fn at_address(address: impl Into<String>) -> Self {
        let address = address.into();
        let service_port = address
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        Self::online(NodeId::new(address.clone()), address, service_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_address_parses_port() {
        let node = Node::at_address("127.0.0.1:9001");
        assert_eq!(node.service_port, 9001);
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.address, "127.0.0.1:9001");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&NodeStatus::Online).unwrap(), "\"online\"");
    }
}
