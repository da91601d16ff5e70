use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::utils::{P2PError, Result};

const LISTEN_BACKLOG: i32 = 1024;

pub struct NodeUtils;

impl NodeUtils {
    /// Create a TCP listener with SO_REUSEADDR, so a restarted node can rebind
    /// its port immediately. A port held by a live listener is still refused.
    pub fn create_reusable_tcp_listener(addr: SocketAddr) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| P2PError::IoError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| P2PError::IoError(format!("Failed to set reuse_address: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::IoError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| P2PError::IoError(format!("Failed to listen on {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::IoError(format!("Failed to set nonblocking: {}", e)))?;

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(|e| {
            P2PError::IoError(format!("Failed to convert to tokio listener: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_binds_ephemeral_port() {
        let listener =
            NodeUtils::create_reusable_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::net::TcpStream::connect(addr).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_occupied_port_is_refused() {
        let first =
            NodeUtils::create_reusable_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        let err = NodeUtils::create_reusable_tcp_listener(addr).unwrap_err();
        assert!(matches!(err, P2PError::IoError(_)));
    }

    #[tokio::test]
    async fn test_port_rebinds_after_close() {
        let first =
            NodeUtils::create_reusable_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        drop(first);

        assert!(NodeUtils::create_reusable_tcp_listener(addr).is_ok());
    }
}
