use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::core::address::{self, PeerDescriptor};
use crate::core::membership::MembershipMap;
use crate::core::protocol::ProtocolConfig;
use crate::network::Host;
use crate::utils::{P2PError, Result};

/// Outcome of one bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Peer IDs installed into the membership map, seed excluded.
    pub learned: Vec<String>,
    /// Entries of the seed's answer that failed to parse.
    pub skipped: Vec<String>,
    /// Learned peers that could not be dialed.
    pub unreachable: Vec<String>,
}

pub struct BootstrapClient {
    host: Arc<Host>,
    membership: Arc<MembershipMap>,
    protocol: ProtocolConfig,
    public_connect_string: Option<String>,
    greet_new_peers: bool,
    io_timeout: Option<Duration>,
}

impl BootstrapClient {
    pub fn new(host: Arc<Host>, membership: Arc<MembershipMap>, protocol: ProtocolConfig) -> Self {
        Self {
            host,
            membership,
            protocol,
            public_connect_string: None,
            greet_new_peers: false,
            io_timeout: None,
        }
    }

    /// Connect string sent to the seed in place of the observed address.
    pub fn with_public_connect_string(mut self, connect_string: Option<String>) -> Self {
        self.public_connect_string = connect_string;
        self
    }

    /// Greet every learned peer once after the merge.
    pub fn with_greeting(mut self, enabled: bool) -> Self {
        self.greet_new_peers = enabled;
        self
    }

    pub fn with_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Ask the seed for its known peers and merge them into the membership
    /// map. Malformed or unreachable entries are skipped individually.
    pub async fn connect_and_bootstrap(&self, seed: &str) -> Result<BootstrapReport> {
        let seed_peer = address::parse(seed)?;

        self.host.connect(&seed_peer).await?;
        info!("Connected to bootstrap peer {}", seed);
        self.membership.upsert(&seed_peer.peer_id, seed).await;

        let mut stream = self
            .host
            .new_stream(&seed_peer, &self.protocol.protocol_id)
            .await?;
        let request = self
            .protocol
            .discover_request(self.public_connect_string.as_deref());
        stream.write_line(&request).await?;

        let line = self.bounded(stream.read_line()).await?;
        debug!("Bootstrap response from {}: {}", seed_peer.peer_id, line);
        if let Err(e) = stream.close().await {
            debug!("Closing bootstrap stream failed: {}", e);
        }

        let peers = self.protocol.decode_peers(&line)?;
        let (report, learned) = self.merge(peers).await;

        info!(
            "Bootstrap via {} learned {} peers ({} skipped, {} unreachable)",
            seed_peer.peer_id,
            report.learned.len(),
            report.skipped.len(),
            report.unreachable.len()
        );

        if self.greet_new_peers {
            for peer in &learned {
                if let Err(e) = self.greet(peer).await {
                    debug!("Greeting {} failed: {}", peer.peer_id, e);
                }
            }
        }

        Ok(report)
    }

    async fn merge(&self, peers: Vec<String>) -> (BootstrapReport, Vec<PeerDescriptor>) {
        let mut report = BootstrapReport::default();
        let mut learned = Vec::new();

        for connect_string in peers {
            let peer = match address::parse(&connect_string) {
                Ok(peer) => peer,
                Err(e) => {
                    warn!("Skipping bootstrap entry: {}", e);
                    report.skipped.push(connect_string);
                    continue;
                }
            };

            if peer.peer_id == self.host.peer_id() {
                continue;
            }

            // Dialing makes the routing table learn the peer.
            match self.host.connect(&peer).await {
                Ok(()) => info!("Connected to {}", connect_string),
                Err(e) => {
                    warn!("Could not reach {}: {}", connect_string, e);
                    report.unreachable.push(peer.peer_id.clone());
                }
            }

            self.membership.upsert(&peer.peer_id, &connect_string).await;
            report.learned.push(peer.peer_id.clone());
            learned.push(peer);
        }

        (report, learned)
    }

    /// One greeting round-trip with `peer`.
    pub async fn greet(&self, peer: &PeerDescriptor) -> Result<()> {
        let mut stream = self
            .host
            .new_stream(peer, &self.protocol.protocol_id)
            .await?;
        stream.write_line(&self.protocol.greeting_marker).await?;

        let reply = self.bounded(stream.read_line()).await?;
        if reply != self.protocol.ack {
            return Err(P2PError::StreamError(format!(
                "Unexpected greeting reply from {}: {:?}",
                peer.peer_id, reply
            )));
        }

        stream.close().await
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.io_timeout {
            Some(limit) => timeout(limit, fut)
                .await
                .map_err(|_| P2PError::StreamError("Timed out waiting for reply".to_string()))?,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::compose;
    use crate::core::protocol::{ExchangeMode, Request};
    use crate::network::dht::{RoutingTable, SharedRoutingTable};
    use crate::network::{BootstrapHandler, Stream, StreamHandler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    struct TestNode {
        host: Arc<Host>,
        routing: SharedRoutingTable,
        membership: Arc<MembershipMap>,
    }

    impl TestNode {
        async fn start(peer_id: &str, protocol: &ProtocolConfig) -> Self {
            let routing = Arc::new(RwLock::new(RoutingTable::new(peer_id)));
            let host = Host::bind(
                peer_id,
                "127.0.0.1:0".parse().unwrap(),
                routing.clone(),
                Some(Duration::from_secs(5)),
            )
            .unwrap();
            let membership = Arc::new(MembershipMap::new());
            let handler = BootstrapHandler::new(membership.clone(), protocol.clone());
            host.set_stream_handler(&protocol.protocol_id, Arc::new(handler))
                .await;
            host.start().await.unwrap();

            Self {
                host: Arc::new(host),
                routing,
                membership,
            }
        }

        fn connect_string(&self) -> String {
            compose(self.host.local_addr(), self.host.peer_id())
        }

        fn client(&self, protocol: &ProtocolConfig) -> BootstrapClient {
            BootstrapClient::new(self.host.clone(), self.membership.clone(), protocol.clone())
                .with_timeout(Some(Duration::from_secs(5)))
        }
    }

    /// Connect string of a peer nobody listens for.
    async fn dead_connect_string(peer_id: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        compose(addr, peer_id)
    }

    #[tokio::test]
    async fn test_seed_shares_existing_peer() {
        let protocol = ProtocolConfig::default();
        let seed = TestNode::start("seed", &protocol).await;
        let node = TestNode::start("node", &protocol).await;

        let addr_a = dead_connect_string("peer-a").await;
        seed.membership.upsert("peer-a", &addr_a).await;

        let report = node
            .client(&protocol)
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert_eq!(report.learned, vec!["peer-a".to_string()]);
        assert_eq!(report.unreachable, vec!["peer-a".to_string()]);
        assert!(report.skipped.is_empty());

        let snapshot = node.membership.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["seed"], seed.connect_string());
        assert_eq!(snapshot["peer-a"], addr_a);

        assert_eq!(seed.membership.get("node").await, Some(node.connect_string()));
        assert!(node.routing.read().await.peer_ids().contains(&"seed".to_string()));
    }

    #[tokio::test]
    async fn test_reachable_peer_enters_routing_table() {
        let protocol = ProtocolConfig::default();
        let seed = TestNode::start("seed", &protocol).await;
        let other = TestNode::start("other", &protocol).await;
        let node = TestNode::start("node", &protocol).await;

        seed.membership.upsert("other", &other.connect_string()).await;

        let report = node
            .client(&protocol)
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert!(report.unreachable.is_empty());
        let mut known = node.routing.read().await.peer_ids();
        known.sort();
        assert_eq!(known, vec!["other".to_string(), "seed".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_abort_batch() {
        let protocol = ProtocolConfig::default();
        let seed = TestNode::start("seed", &protocol).await;
        let node = TestNode::start("node", &protocol).await;

        let good = dead_connect_string("good").await;
        seed.membership.upsert("bad", "not-a-connect-string").await;
        seed.membership.upsert("good", &good).await;

        let report = node
            .client(&protocol)
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert_eq!(report.skipped, vec!["not-a-connect-string".to_string()]);
        assert_eq!(report.learned, vec!["good".to_string()]);
        assert_eq!(node.membership.get("good").await, Some(good));
        assert!(!node.membership.contains("bad").await);
    }

    #[tokio::test]
    async fn test_public_connect_string_is_advertised() {
        let protocol = ProtocolConfig::default();
        let seed = TestNode::start("seed", &protocol).await;
        let node = TestNode::start("node", &protocol).await;
        let public = "/ip4/198.51.100.4/tcp/4100/p2p/node".to_string();

        node.client(&protocol)
            .with_public_connect_string(Some(public.clone()))
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert_eq!(seed.membership.get("node").await, Some(public));
    }

    #[tokio::test]
    async fn test_invalid_seed_fails_fast() {
        let protocol = ProtocolConfig::default();
        let node = TestNode::start("node", &protocol).await;

        let err = node
            .client(&protocol)
            .connect_and_bootstrap("127.0.0.1:4001")
            .await
            .unwrap_err();
        assert!(matches!(err, P2PError::ParseError(_)));
        assert!(node.membership.is_empty().await);
    }

    #[tokio::test]
    async fn test_unreachable_seed_is_connect_error() {
        let protocol = ProtocolConfig::default();
        let node = TestNode::start("node", &protocol).await;
        let seed = dead_connect_string("seed").await;

        let err = node
            .client(&protocol)
            .connect_and_bootstrap(&seed)
            .await
            .unwrap_err();
        assert!(matches!(err, P2PError::ConnectError(_)));
    }

    #[tokio::test]
    async fn test_single_exchange_mode() {
        let protocol = ProtocolConfig {
            exchange_mode: ExchangeMode::Single,
            ..Default::default()
        };
        let seed = TestNode::start("seed", &protocol).await;
        let node = TestNode::start("node", &protocol).await;

        let addr_a = dead_connect_string("peer-a").await;
        seed.membership.upsert("peer-a", &addr_a).await;

        let report = node
            .client(&protocol)
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert_eq!(report.learned, vec!["peer-a".to_string()]);
        assert_eq!(node.membership.get("peer-a").await, Some(addr_a));
    }

    /// Acknowledges greetings and counts them. Anything else is ignored.
    struct GreetingCounter {
        protocol: ProtocolConfig,
        greetings: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamHandler for GreetingCounter {
        async fn handle(&self, mut stream: Stream) {
            if let Ok(line) = stream.read_line().await {
                if self.protocol.parse_request(&line) == Request::Greeting {
                    self.greetings.fetch_add(1, Ordering::SeqCst);
                    let _ = stream.write_line(&self.protocol.ack).await;
                }
            }
        }
    }

    /// A seed that knows one reachable peer whose bootstrap streams are
    /// served by a [`GreetingCounter`].
    async fn seed_with_counted_peer(
        protocol: &ProtocolConfig,
    ) -> (TestNode, TestNode, Arc<AtomicUsize>) {
        let seed = TestNode::start("seed", protocol).await;
        let other = TestNode::start("other", protocol).await;

        let greetings = Arc::new(AtomicUsize::new(0));
        let counter = GreetingCounter {
            protocol: protocol.clone(),
            greetings: greetings.clone(),
        };
        other
            .host
            .set_stream_handler(&protocol.protocol_id, Arc::new(counter))
            .await;
        seed.membership.upsert("other", &other.connect_string()).await;

        (seed, other, greetings)
    }

    #[tokio::test]
    async fn test_bootstrap_greets_learned_peers_when_enabled() {
        let protocol = ProtocolConfig::default();
        let (seed, _other, greetings) = seed_with_counted_peer(&protocol).await;
        let node = TestNode::start("node", &protocol).await;

        let report = node
            .client(&protocol)
            .with_greeting(true)
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert_eq!(report.learned, vec!["other".to_string()]);
        assert_eq!(greetings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_skips_greeting_by_default() {
        let protocol = ProtocolConfig::default();
        let (seed, other, greetings) = seed_with_counted_peer(&protocol).await;
        let node = TestNode::start("node", &protocol).await;

        node.client(&protocol)
            .connect_and_bootstrap(&seed.connect_string())
            .await
            .unwrap();

        assert_eq!(greetings.load(Ordering::SeqCst), 0);
        // Greetings never touch the membership map.
        assert!(other.membership.is_empty().await);
    }

    #[tokio::test]
    async fn test_greet_expects_ack() {
        let protocol = ProtocolConfig::default();
        let (_seed, other, greetings) = seed_with_counted_peer(&protocol).await;
        let node = TestNode::start("node", &protocol).await;

        let other_peer = PeerDescriptor::new("other", other.host.local_addr());
        node.client(&protocol).greet(&other_peer).await.unwrap();
        assert_eq!(greetings.load(Ordering::SeqCst), 1);

        let picky = ProtocolConfig {
            ack: "OK".to_string(),
            ..protocol.clone()
        };
        let err = node.client(&picky).greet(&other_peer).await.unwrap_err();
        assert!(matches!(err, P2PError::StreamError(_)));
    }
}
