use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};

use crate::core::address::PeerDescriptor;
use crate::network::Host;
use crate::utils::Result;

use super::{RoutingService, SharedRoutingTable};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Routing service backed by the host's contact table.
pub struct DhtNode {
    host: Arc<Host>,
    routing_table: SharedRoutingTable,
}

impl DhtNode {
    pub fn new(host: Arc<Host>, routing_table: SharedRoutingTable) -> Self {
        Self {
            host,
            routing_table,
        }
    }
}

#[async_trait]
impl RoutingService for DhtNode {
    /// Ping every contact in parallel and evict those that do not answer.
    async fn refresh(&self) -> Result<()> {
        let contacts = self.routing_table.read().await.all_contacts();
        if contacts.is_empty() {
            return Ok(());
        }

        let mut pings = JoinSet::new();
        for contact in contacts {
            let host = self.host.clone();
            pings.spawn(async move {
                let peer = PeerDescriptor::new(contact.peer_id.clone(), contact.addr);
                let alive = matches!(timeout(PING_TIMEOUT, host.ping(&peer)).await, Ok(Ok(_)));
                (contact.peer_id, alive)
            });
        }

        let mut dead = Vec::new();
        while let Some(joined) = pings.join_next().await {
            let (peer_id, alive) = joined?;
            if !alive {
                dead.push(peer_id);
            }
        }

        if !dead.is_empty() {
            let mut table = self.routing_table.write().await;
            for peer_id in &dead {
                if table.remove_contact(peer_id) {
                    info!("Evicted unreachable contact {}", peer_id);
                }
            }
        }

        debug!(
            "Routing table refreshed: {} contacts",
            self.routing_table.read().await.contact_count()
        );
        Ok(())
    }

    async fn visible_peers(&self) -> Result<Vec<String>> {
        Ok(self.routing_table.read().await.peer_ids())
    }
}
