use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::core::membership::{MembershipDelta, MembershipMap};
use crate::network::dht::RoutingService;
use crate::utils::Result;

/// Keeps the membership map's key set in line with the routing table.
pub struct Reconciler {
    routing: Arc<dyn RoutingService>,
    membership: Arc<MembershipMap>,
    local_peer_id: String,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        routing: Arc<dyn RoutingService>,
        membership: Arc<MembershipMap>,
        local_peer_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            routing,
            membership,
            local_peer_id: local_peer_id.into(),
            interval,
        }
    }

    /// One pass: refresh the routing table, read its visible set and diff
    /// it into the membership map. A failed refresh still diffs against
    /// whatever the table currently holds.
    pub async fn tick(&self) -> Result<MembershipDelta> {
        if let Err(e) = self.routing.refresh().await {
            warn!("Routing table refresh failed: {}", e);
        }

        let visible: HashSet<String> = self
            .routing
            .visible_peers()
            .await?
            .into_iter()
            .filter(|peer_id| *peer_id != self.local_peer_id)
            .collect();

        let delta = self.membership.reconcile(&visible).await;
        debug!(
            "Reconciled membership: {} peers (+{} -{})",
            visible.len(),
            delta.joined.len(),
            delta.left.len()
        );
        Ok(delta)
    }

    /// Tick until `stop` flips to true or its sender is dropped. The sleep
    /// starts after each pass, so the effective period is the interval plus
    /// the pass duration.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!("Reconciliation loop started (interval {:?})", self.interval);

        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                warn!("Reconciliation tick failed: {}", e);
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation loop stopped");
    }
}
