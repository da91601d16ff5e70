use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::core::address;
use crate::core::membership::MembershipMap;
use crate::core::protocol::{ProtocolConfig, Request};
use crate::network::transport::{Stream, StreamHandler};
use crate::utils::Result;

/// Serves discovery and greeting requests on inbound bootstrap streams.
pub struct BootstrapHandler {
    membership: Arc<MembershipMap>,
    protocol: ProtocolConfig,
}

impl BootstrapHandler {
    pub fn new(membership: Arc<MembershipMap>, protocol: ProtocolConfig) -> Self {
        Self {
            membership,
            protocol,
        }
    }

    /// Handle the single request carried by `stream`.
    pub async fn process(&self, stream: &mut Stream) -> Result<()> {
        let line = stream.read_line().await?;
        debug!("Bootstrap request from {}: {:?}", stream.remote_peer(), line);

        match self.protocol.parse_request(&line) {
            Request::Discover { connect_string } => {
                let sender = stream.remote_peer().to_string();
                let entry = self.sender_connect_string(stream, connect_string);
                self.membership.upsert(&sender, &entry).await;

                let others = self.membership.connect_strings_except(&sender).await;
                let response = self.protocol.encode_peers(&others)?;
                stream.write_line(&response).await?;
                info!("Sent {} known peers to {}", others.len(), sender);
            }
            Request::Greeting => {
                stream.write_line(&self.protocol.ack).await?;
                debug!("Acknowledged greeting from {}", stream.remote_peer());
            }
            Request::Unknown(message) => {
                debug!(
                    "Ignoring unrecognized message from {}: {:?}",
                    stream.remote_peer(),
                    message
                );
            }
        }

        Ok(())
    }

    /// The advertised connect string when it parses and names the sender,
    /// otherwise one built from the stream's remote endpoint.
    fn sender_connect_string(&self, stream: &Stream, advertised: String) -> String {
        if advertised.is_empty() {
            return stream.remote_connect_string();
        }

        match address::parse(&advertised) {
            Ok(peer) if peer.peer_id == stream.remote_peer() => advertised,
            Ok(peer) => {
                warn!(
                    "{} advertised a connect string for {}, using observed address",
                    stream.remote_peer(),
                    peer.peer_id
                );
                stream.remote_connect_string()
            }
            Err(e) => {
                warn!(
                    "{} advertised an invalid connect string ({}), using observed address",
                    stream.remote_peer(),
                    e
                );
                stream.remote_connect_string()
            }
        }
    }
}

#[async_trait]
impl StreamHandler for BootstrapHandler {
    async fn handle(&self, mut stream: Stream) {
        if let Err(e) = self.process(&mut stream).await {
            warn!(
                "Bootstrap stream from {} ({}) failed: {}",
                stream.remote_peer(),
                stream.remote_addr(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::{compose, PeerDescriptor};
    use crate::network::dht::RoutingTable;
    use crate::network::Host;
    use crate::utils::P2PError;
    use tokio::sync::RwLock;

    async fn host(peer_id: &str) -> Host {
        let routing = Arc::new(RwLock::new(RoutingTable::new(peer_id)));
        let host = Host::bind(peer_id, "127.0.0.1:0".parse().unwrap(), routing, None).unwrap();
        host.start().await.unwrap();
        host
    }

    async fn seed(protocol: &ProtocolConfig) -> (Host, Arc<MembershipMap>) {
        let seed = host("seed").await;
        let membership = Arc::new(MembershipMap::new());
        let handler = BootstrapHandler::new(membership.clone(), protocol.clone());
        seed.set_stream_handler(&protocol.protocol_id, Arc::new(handler))
            .await;
        (seed, membership)
    }

    async fn exchange(
        client: &Host,
        server: &Host,
        protocol: &ProtocolConfig,
        line: &str,
    ) -> Result<String> {
        let target = PeerDescriptor::new(server.peer_id(), server.local_addr());
        let mut stream = client.new_stream(&target, &protocol.protocol_id).await?;
        stream.write_line(line).await?;
        stream.read_line().await
    }

    #[tokio::test]
    async fn test_discover_with_empty_map_returns_empty_list() {
        let protocol = ProtocolConfig::default();
        let (seed, membership) = seed(&protocol).await;
        let client = host("client").await;

        let reply = exchange(&client, &seed, &protocol, "DISCOVER").await.unwrap();
        assert_eq!(reply, "[]");

        let observed = compose(client.local_addr(), "client");
        assert_eq!(membership.get("client").await, Some(observed));
    }

    #[tokio::test]
    async fn test_discover_excludes_sender() {
        let protocol = ProtocolConfig::default();
        let (seed, membership) = seed(&protocol).await;
        let client = host("client").await;
        membership.upsert("other", "/ip4/10.0.0.1/tcp/1/p2p/other").await;
        membership.upsert("client", "/ip4/10.0.0.2/tcp/2/p2p/client").await;

        let reply = exchange(&client, &seed, &protocol, "DISCOVER").await.unwrap();
        let peers: Vec<String> = serde_json::from_str(&reply).unwrap();
        assert_eq!(peers, vec!["/ip4/10.0.0.1/tcp/1/p2p/other".to_string()]);
    }

    #[tokio::test]
    async fn test_discover_prefers_advertised_address() {
        let protocol = ProtocolConfig::default();
        let (seed, membership) = seed(&protocol).await;
        let client = host("client").await;

        let public = "/ip4/203.0.113.9/tcp/4001/p2p/client";
        exchange(&client, &seed, &protocol, &format!("DISCOVER {}", public))
            .await
            .unwrap();
        assert_eq!(membership.get("client").await.as_deref(), Some(public));
    }

    #[tokio::test]
    async fn test_discover_ignores_foreign_advertised_address() {
        let protocol = ProtocolConfig::default();
        let (seed, membership) = seed(&protocol).await;
        let client = host("client").await;

        exchange(
            &client,
            &seed,
            &protocol,
            "DISCOVER /ip4/203.0.113.9/tcp/4001/p2p/someone-else",
        )
        .await
        .unwrap();
        assert_eq!(
            membership.get("client").await,
            Some(compose(client.local_addr(), "client"))
        );
    }

    #[tokio::test]
    async fn test_greeting_is_acknowledged() {
        let protocol = ProtocolConfig {
            greeting_marker: "hey".to_string(),
            ack: "ok".to_string(),
            ..Default::default()
        };
        let (seed, membership) = seed(&protocol).await;
        let client = host("client").await;

        let reply = exchange(&client, &seed, &protocol, "hey").await.unwrap();
        assert_eq!(reply, "ok");
        assert!(membership.is_empty().await);
    }

    #[tokio::test]
    async fn test_unrecognized_message_gets_no_reply() {
        let protocol = ProtocolConfig::default();
        let (seed, membership) = seed(&protocol).await;
        let client = host("client").await;

        let result = exchange(&client, &seed, &protocol, "WHAT").await;
        assert!(matches!(result, Err(P2PError::StreamError(_))));
        assert!(membership.is_empty().await);
    }
}
