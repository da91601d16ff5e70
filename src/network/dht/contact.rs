use std::net::SocketAddr;

use super::node_id::NodeId;

/// A peer the routing table has seen, with the endpoint it listens on.
#[derive(Clone, Debug)]
pub struct Contact {
    pub node_id: NodeId,
    pub peer_id: String,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(peer_id: impl Into<String>, addr: SocketAddr) -> Self {
        let peer_id = peer_id.into();
        Self {
            node_id: NodeId::from_peer_id(&peer_id),
            peer_id,
            addr,
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id && self.addr == other.addr
    }
}

impl Eq for Contact {}
