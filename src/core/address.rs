//! Connect strings.
//!
//! A connect string names one endpoint and the peer listening on it:
//!
//! ```text
//! /ip4/203.0.113.7/tcp/4001/p2p/<peer-id>
//! /ip6/2001:db8::1/tcp/4001/p2p/<peer-id>
//! ```
//!
//! `/ipfs/` is accepted in place of `/p2p/`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::utils::{P2PError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub peer_id: String,
    pub addrs: Vec<SocketAddr>,
}

impl PeerDescriptor {
    pub fn new(peer_id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            peer_id: peer_id.into(),
            addrs: vec![addr],
        }
    }

    /// The endpoint to dial first.
    pub fn primary_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.primary_addr() {
            Some(addr) => write!(f, "{}", compose(addr, &self.peer_id)),
            None => write!(f, "{}", self.peer_id),
        }
    }
}

/// Parse a connect string into a [`PeerDescriptor`].
pub fn parse(connect_string: &str) -> Result<PeerDescriptor> {
    let invalid = |reason: &str| P2PError::ParseError(format!("{:?}: {}", connect_string, reason));

    let rest = connect_string
        .trim()
        .strip_prefix('/')
        .ok_or_else(|| invalid("must start with '/'"))?;
    let parts: Vec<&str> = rest.split('/').collect();

    let [family, host, transport, port, id_proto, peer_id] = parts.as_slice() else {
        return Err(invalid("expected /<ip4|ip6>/<host>/tcp/<port>/p2p/<peer-id>"));
    };

    let ip: IpAddr = match *family {
        "ip4" => host
            .parse::<Ipv4Addr>()
            .map_err(|_| invalid("bad IPv4 address"))?
            .into(),
        "ip6" => host
            .parse::<Ipv6Addr>()
            .map_err(|_| invalid("bad IPv6 address"))?
            .into(),
        other => return Err(invalid(&format!("unsupported address family {:?}", other))),
    };

    if *transport != "tcp" {
        return Err(invalid(&format!("unsupported transport {:?}", transport)));
    }

    let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;

    if *id_proto != "p2p" && *id_proto != "ipfs" {
        return Err(invalid("missing /p2p/ segment"));
    }

    if peer_id.is_empty() {
        return Err(invalid("empty peer id"));
    }

    Ok(PeerDescriptor::new(*peer_id, SocketAddr::new(ip, port)))
}

/// Build the canonical connect string for `peer_id` listening on `addr`.
pub fn compose(addr: SocketAddr, peer_id: &str) -> String {
    let family = match addr.ip() {
        IpAddr::V4(_) => "ip4",
        IpAddr::V6(_) => "ip6",
    };
    format!(
        "/{}/{}/tcp/{}/p2p/{}",
        family,
        addr.ip(),
        addr.port(),
        peer_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let desc = parse("/ip4/10.0.0.5/tcp/4001/p2p/abc123").unwrap();
        assert_eq!(desc.peer_id, "abc123");
        assert_eq!(desc.addrs, vec!["10.0.0.5:4001".parse().unwrap()]);
    }

    #[test]
    fn test_parse_ipv6_and_ipfs_alias() {
        let desc = parse("/ip6/::1/tcp/9000/ipfs/peer").unwrap();
        assert_eq!(desc.peer_id, "peer");
        assert_eq!(desc.primary_addr(), Some("[::1]:9000".parse().unwrap()));
    }

    #[test]
    fn test_compose_matches_parse() {
        let addr: SocketAddr = "192.168.1.20:7000".parse().unwrap();
        let text = compose(addr, "feedbeef");
        assert_eq!(text, "/ip4/192.168.1.20/tcp/7000/p2p/feedbeef");

        let desc = parse(&text).unwrap();
        assert_eq!(desc, PeerDescriptor::new("feedbeef", addr));
        assert_eq!(desc.to_string(), text);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "garbage",
            "ip4/1.2.3.4/tcp/1/p2p/x",
            "/ip4/1.2.3.4/tcp/1",
            "/ip4/1.2.3.4/udp/1/p2p/x",
            "/ip4/999.2.3.4/tcp/1/p2p/x",
            "/ip4/1.2.3.4/tcp/70000/p2p/x",
            "/ip4/1.2.3.4/tcp/1/p2p/",
            "/dns4/example.com/tcp/1/p2p/x",
            "/ip4/1.2.3.4/tcp/1/p2p/x/extra",
        ] {
            assert!(
                matches!(parse(bad), Err(P2PError::ParseError(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
