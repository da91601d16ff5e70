//! TCP stream host.
//!
//! Each stream is one TCP connection. The dialer opens it with a header
//! line naming the protocol, its own peer ID and the port it listens on:
//!
//! ```text
//! /mp2p/bootstrap <peer-id> <listen-port>\n
//! ```
//!
//! The accepting side records the dialer in the routing table and hands
//! the stream to the handler registered for that protocol. The host
//! answers [`PING_PROTOCOL`] itself; `connect` uses it to check that a
//! peer is reachable.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::core::address::{compose, PeerDescriptor};
use crate::core::protocol::{read_line, write_line};
use crate::network::dht::{Contact, SharedRoutingTable};
use crate::utils::{NodeUtils, P2PError, Result};

pub const PING_PROTOCOL: &str = "/mp2p/ping";
const PONG: &str = "PONG";
const HEADER_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: Stream);
}

type HandlerMap = Arc<RwLock<HashMap<String, Arc<dyn StreamHandler>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamHeader {
    protocol: String,
    peer_id: String,
    listen_port: u16,
}

impl StreamHeader {
    fn encode(&self) -> String {
        format!("{} {} {}", self.protocol, self.peer_id, self.listen_port)
    }

    fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split(' ');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(protocol), Some(peer_id), Some(port), None)
                if !protocol.is_empty() && !peer_id.is_empty() =>
            {
                let listen_port = port
                    .parse()
                    .map_err(|_| P2PError::StreamError(format!("Bad listen port in {:?}", line)))?;
                Ok(Self {
                    protocol: protocol.to_string(),
                    peer_id: peer_id.to_string(),
                    listen_port,
                })
            }
            _ => Err(P2PError::StreamError(format!(
                "Malformed stream header {:?}",
                line
            ))),
        }
    }
}

/// An open stream to a remote peer.
pub struct Stream {
    inner: BufReader<TcpStream>,
    protocol: String,
    remote_peer: String,
    remote_addr: SocketAddr,
}

impl Stream {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn remote_peer(&self) -> &str {
        &self.remote_peer
    }

    /// The endpoint the remote peer listens on.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_connect_string(&self) -> String {
        compose(self.remote_addr, &self.remote_peer)
    }

    pub async fn read_line(&mut self) -> Result<String> {
        read_line(&mut self.inner).await
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.inner, line).await
    }

    /// Shut down the write half; the remote sees end-of-stream.
    pub async fn close(mut self) -> Result<()> {
        self.inner
            .get_mut()
            .shutdown()
            .await
            .map_err(|e| P2PError::StreamError(format!("Shutdown failed: {}", e)))
    }
}

pub struct Host {
    peer_id: String,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    handlers: HandlerMap,
    routing: SharedRoutingTable,
    dial_timeout: Option<Duration>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    /// Bind the listening socket. Connections are not accepted until
    /// [`Host::start`] is called.
    pub fn bind(
        peer_id: &str,
        listen_addr: SocketAddr,
        routing: SharedRoutingTable,
        dial_timeout: Option<Duration>,
    ) -> Result<Self> {
        let listener = NodeUtils::create_reusable_tcp_listener(listen_addr)?;
        let local_addr = listener.local_addr()?;
        info!("Host {} listening on {}", peer_id, local_addr);

        Ok(Self {
            peer_id: peer_id.to_string(),
            local_addr,
            listener: Mutex::new(Some(listener)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            routing,
            dial_timeout,
            accept_task: Mutex::new(None),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connect string for the listening socket; a wildcard bind address is
    /// reported as loopback.
    pub fn local_connect_string(&self) -> String {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        compose(SocketAddr::new(ip, self.local_addr.port()), &self.peer_id)
    }

    pub async fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        if self
            .handlers
            .write()
            .await
            .insert(protocol.to_string(), handler)
            .is_some()
        {
            warn!("Replaced stream handler for {}", protocol);
        }
    }

    /// Start accepting inbound streams.
    pub async fn start(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| P2PError::SystemError("Host already started".to_string()))?;

        let peer_id = self.peer_id.clone();
        let handlers = self.handlers.clone();
        let routing = self.routing.clone();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("Inbound connection from {}", addr);

                        let peer_id = peer_id.clone();
                        let handlers = handlers.clone();
                        let routing = routing.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                Self::handle_inbound(stream, addr, &peer_id, handlers, routing)
                                    .await
                            {
                                warn!("Inbound stream from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    async fn handle_inbound(
        stream: TcpStream,
        addr: SocketAddr,
        local_peer_id: &str,
        handlers: HandlerMap,
        routing: SharedRoutingTable,
    ) -> Result<()> {
        let mut inner = BufReader::new(stream);

        let line = timeout(HEADER_TIMEOUT, read_line(&mut inner))
            .await
            .map_err(|_| P2PError::StreamError("Timed out waiting for stream header".to_string()))??;
        let header = StreamHeader::parse(&line)?;

        if header.peer_id == local_peer_id {
            return Err(P2PError::StreamError("Refusing stream from self".to_string()));
        }

        let remote_addr = SocketAddr::new(addr.ip(), header.listen_port);
        routing
            .write()
            .await
            .add_contact(Contact::new(header.peer_id.clone(), remote_addr));

        if header.protocol == PING_PROTOCOL {
            return write_line(&mut inner, PONG).await;
        }

        let handler = handlers.read().await.get(&header.protocol).cloned();
        match handler {
            Some(handler) => {
                debug!(
                    "Stream {} from {} ({})",
                    header.protocol, header.peer_id, remote_addr
                );
                handler
                    .handle(Stream {
                        inner,
                        protocol: header.protocol,
                        remote_peer: header.peer_id,
                        remote_addr,
                    })
                    .await;
            }
            None => warn!(
                "No handler for protocol {} requested by {}",
                header.protocol, header.peer_id
            ),
        }

        Ok(())
    }

    async fn dial_addr(&self, addr: SocketAddr) -> Result<TcpStream> {
        let connect = TcpStream::connect(addr);
        let result = match self.dial_timeout {
            Some(limit) => timeout(limit, connect)
                .await
                .map_err(|_| P2PError::ConnectError(format!("Timed out connecting to {}", addr)))?,
            None => connect.await,
        };

        let stream = result
            .map_err(|e| P2PError::ConnectError(format!("Failed to connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::ConnectError(format!("Failed to set TCP_NODELAY: {}", e)))?;
        Ok(stream)
    }

    /// Open a stream to `peer` for `protocol`, trying its endpoints in order.
    pub async fn new_stream(&self, peer: &PeerDescriptor, protocol: &str) -> Result<Stream> {
        if peer.peer_id == self.peer_id {
            return Err(P2PError::ConnectError("Refusing to dial self".to_string()));
        }

        let mut last_err =
            P2PError::ConnectError(format!("Peer {} has no endpoints", peer.peer_id));

        for &addr in &peer.addrs {
            match self.dial_addr(addr).await {
                Ok(tcp) => {
                    let mut inner = BufReader::new(tcp);
                    let header = StreamHeader {
                        protocol: protocol.to_string(),
                        peer_id: self.peer_id.clone(),
                        listen_port: self.local_addr.port(),
                    };
                    write_line(&mut inner, &header.encode()).await?;

                    return Ok(Stream {
                        inner,
                        protocol: protocol.to_string(),
                        remote_peer: peer.peer_id.clone(),
                        remote_addr: addr,
                    });
                }
                Err(e) => {
                    debug!("Dial {} at {} failed: {}", peer.peer_id, addr, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Round-trip the liveness protocol. Returns the endpoint that answered
    /// and the round-trip time.
    async fn probe(&self, peer: &PeerDescriptor) -> Result<(SocketAddr, Duration)> {
        let start = Instant::now();
        let mut stream = self.new_stream(peer, PING_PROTOCOL).await?;

        let read = stream.read_line();
        let reply = match self.dial_timeout {
            Some(limit) => timeout(limit, read).await.map_err(|_| {
                P2PError::ConnectError(format!("Ping to {} timed out", peer.peer_id))
            })?,
            None => read.await,
        }
        .map_err(|e| P2PError::ConnectError(format!("Ping to {} failed: {}", peer.peer_id, e)))?;

        if reply != PONG {
            return Err(P2PError::ConnectError(format!(
                "Unexpected ping reply from {}: {:?}",
                peer.peer_id, reply
            )));
        }

        Ok((stream.remote_addr(), start.elapsed()))
    }

    pub async fn ping(&self, peer: &PeerDescriptor) -> Result<Duration> {
        self.probe(peer).await.map(|(_, rtt)| rtt)
    }

    /// Dial `peer` and, once it answers, add it to the routing table.
    pub async fn connect(&self, peer: &PeerDescriptor) -> Result<()> {
        let (addr, rtt) = self.probe(peer).await?;
        debug!("Connected to {} at {} (rtt {:?})", peer.peer_id, addr, rtt);

        self.routing
            .write()
            .await
            .add_contact(Contact::new(peer.peer_id.clone(), addr));
        Ok(())
    }

    /// Stop accepting streams and release the listening socket.
    pub async fn close(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        self.listener.lock().await.take();
        info!("Host {} closed", self.peer_id);
    }
}
