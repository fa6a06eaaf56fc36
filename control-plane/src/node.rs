use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Metadata a proxy reports about itself on a discovery request.
///
/// Proxies only send the full node on the first request of a stream, so every
/// field defaults to empty.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent_name: Option<String>,
}

impl Node {
    pub fn with_cluster(cluster: impl Into<String>) -> Self {
        Node {
            cluster: cluster.into(),
            ..Default::default()
        }
    }
}

/// Identifies one live discovery connection. Derived from the transport peer
/// address and immutable for the duration of the call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        ConnectionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        ConnectionId(addr.to_string().into())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_from_peer() {
        let addr: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        assert_eq!(ConnectionId::from(addr).as_str(), "10.0.0.1:5555");
        assert_eq!(ConnectionId::from(addr), ConnectionId::new("10.0.0.1:5555"));
    }

    #[test]
    fn test_node_missing_fields() {
        let node: Node = serde_json::from_str(r#"{"id": "envoy-1"}"#).unwrap();
        assert_eq!(node.id, "envoy-1");
        assert!(node.cluster.is_empty());

        let node: Node =
            serde_json::from_str(r#"{"cluster": "priority", "userAgentName": "envoy"}"#).unwrap();
        assert_eq!(node, Node {
            id: "".into(),
            cluster: "priority".into(),
            user_agent_name: Some("envoy".into()),
        });
    }
}
