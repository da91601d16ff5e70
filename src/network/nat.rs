use igd_next::{search_gateway, Gateway, PortMappingProtocol, SearchOptions};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::address::compose;
use crate::utils::{P2PError, Result};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);
const MAPPING_DESCRIPTION: &str = "mesh-bootstrap";

/// What to do when no gateway mapping can be obtained at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NatPolicy {
    /// Do not look for a gateway.
    Disabled,
    /// Log the failure and run without a public connect string.
    #[default]
    BestEffort,
    /// Abort startup.
    Required,
}

struct Mapping {
    gateway: Gateway,
    external_port: u16,
}

/// Obtains a publicly reachable endpoint through a UPnP gateway.
pub struct NatCoordinator {
    policy: NatPolicy,
    mapping: Mutex<Option<Mapping>>,
}

impl NatCoordinator {
    pub fn new(policy: NatPolicy) -> Self {
        Self {
            policy,
            mapping: Mutex::new(None),
        }
    }

    /// Map `port` on the first gateway found and return the external
    /// endpoint.
    pub async fn map_port(&self, port: u16) -> Result<SocketAddr> {
        info!("Attempting to map TCP port {} via UPnP...", port);

        // igd-next is synchronous
        let (gateway, external) = tokio::task::spawn_blocking(move || {
            let search_options = SearchOptions {
                timeout: Some(SEARCH_TIMEOUT),
                ..Default::default()
            };

            let gateway = search_gateway(search_options)
                .map_err(|e| P2PError::NatError(format!("UPnP gateway search failed: {}", e)))?;
            debug!("Found UPnP gateway: {}", gateway);

            let local_addr = SocketAddr::new(local_ip_towards(gateway.addr)?, port);

            let external_port = gateway
                .add_any_port(PortMappingProtocol::TCP, local_addr, 0, MAPPING_DESCRIPTION)
                .map_err(|e| P2PError::NatError(format!("UPnP port mapping failed: {}", e)))?;

            let external_ip = gateway
                .get_external_ip()
                .map_err(|e| P2PError::NatError(format!("Failed to get external IP: {}", e)))?;

            Ok::<_, P2PError>((gateway, SocketAddr::new(external_ip, external_port)))
        })
        .await??;

        info!("Mapped TCP port {} -> {}", port, external);
        *self.mapping.lock().await = Some(Mapping {
            gateway,
            external_port: external.port(),
        });
        Ok(external)
    }

    /// Connect string advertising the mapped endpoint, according to the
    /// configured policy.
    pub async fn public_connect_string(&self, port: u16, peer_id: &str) -> Result<Option<String>> {
        if self.policy == NatPolicy::Disabled {
            return Ok(None);
        }

        match self.map_port(port).await {
            Ok(external) => {
                let connect_string = compose(external, peer_id);
                info!("Public connect string: {}", connect_string);
                Ok(Some(connect_string))
            }
            Err(e) if self.policy == NatPolicy::BestEffort => {
                warn!("Continuing without public reachability: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the port mapping created by [`NatCoordinator::map_port`], if any.
    pub async fn release(&self) {
        let Some(mapping) = self.mapping.lock().await.take() else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || {
            mapping
                .gateway
                .remove_port(PortMappingProtocol::TCP, mapping.external_port)
                .map(|_| mapping.external_port)
        })
        .await;

        match result {
            Ok(Ok(port)) => info!("Removed UPnP mapping for external port {}", port),
            Ok(Err(e)) => warn!("Failed to remove UPnP mapping: {}", e),
            Err(e) => warn!("UPnP cleanup task failed: {}", e),
        }
    }
}

/// Local interface address used to reach `gateway`.
fn local_ip_towards(gateway: SocketAddr) -> Result<std::net::IpAddr> {
    let bind_addr: SocketAddr = if gateway.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(gateway)?;
    Ok(socket.local_addr()?.ip())
}
