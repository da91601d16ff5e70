//! Routing table.
//!
//! Peers are kept in Kademlia-style K-buckets keyed by the XOR distance of
//! their [`NodeId`]. The table is fed by the host (every successful dial
//! and every inbound stream) and kept honest by [`DhtNode::refresh`], which
//! pings each contact and evicts the ones that stop answering.

mod contact;
mod dht_node;
mod node_id;
mod routing_table;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::utils::Result;

pub use contact::Contact;
pub use dht_node::DhtNode;
pub use node_id::NodeId;
pub use routing_table::RoutingTable;

pub type SharedRoutingTable = Arc<RwLock<RoutingTable>>;

/// The view of the routing layer the reconciliation loop consumes.
#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn refresh(&self) -> Result<()>;

    /// Peer IDs currently considered reachable.
    async fn visible_peers(&self) -> Result<Vec<String>>;
}
