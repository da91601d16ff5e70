use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::core::membership::MembershipMap;
use crate::core::reconcile::Reconciler;
use crate::core::Config;
use crate::network::dht::{DhtNode, RoutingService, RoutingTable};
use crate::network::{BootstrapClient, BootstrapHandler, BootstrapReport, Host, NatCoordinator};
use crate::utils::{NodeIdentity, Result};

/// A running overlay node: identity, host, routing table and membership map.
pub struct Node {
    pub config: Config,
    identity: NodeIdentity,
    host: Arc<Host>,
    routing: Arc<dyn RoutingService>,
    membership: Arc<MembershipMap>,
    nat: NatCoordinator,
    public_connect_string: Option<String>,
    stop_tx: watch::Sender<bool>,
    reconcile_task: Option<JoinHandle<()>>,
}

impl Node {
    /// Load the identity, bind the host, obtain a public address and
    /// register the bootstrap handler. Any failure here is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let identity = NodeIdentity::load_or_create(&config.key_dir)?;
        info!("Peer ID: {}", identity.peer_id());

        let routing_table = Arc::new(RwLock::new(RoutingTable::new(identity.peer_id())));
        let host = Arc::new(Host::bind(
            identity.peer_id(),
            SocketAddr::new(config.listen_ip, config.port),
            routing_table.clone(),
            config.connect_timeout,
        )?);
        info!("Node address: {}", host.local_connect_string());

        let nat = NatCoordinator::new(config.nat);
        let public_connect_string = nat
            .public_connect_string(host.local_addr().port(), identity.peer_id())
            .await?;

        let membership = Arc::new(MembershipMap::new());
        let handler = BootstrapHandler::new(membership.clone(), config.protocol.clone());
        host.set_stream_handler(&config.protocol.protocol_id, Arc::new(handler))
            .await;

        let routing: Arc<dyn RoutingService> = Arc::new(DhtNode::new(host.clone(), routing_table));
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            identity,
            host,
            routing,
            membership,
            nat,
            public_connect_string,
            stop_tx,
            reconcile_task: None,
        })
    }

    pub fn peer_id(&self) -> &str {
        self.identity.peer_id()
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn membership(&self) -> &Arc<MembershipMap> {
        &self.membership
    }

    pub fn public_connect_string(&self) -> Option<&str> {
        self.public_connect_string.as_deref()
    }

    /// Accept streams, bootstrap from the configured seed and start the
    /// reconciliation loop. A failed bootstrap is logged, not returned.
    pub async fn start(&mut self) -> Result<()> {
        self.host.start().await?;

        if let Some(seed) = self.config.bootstrap_peer.clone() {
            if let Err(e) = self.bootstrap(&seed).await {
                error!("Bootstrap via {} failed: {}", seed, e);
            }
        }

        let reconciler = Reconciler::new(
            self.routing.clone(),
            self.membership.clone(),
            self.peer_id(),
            self.config.reconcile_interval,
        );
        self.reconcile_task = Some(tokio::spawn(reconciler.run(self.stop_tx.subscribe())));
        Ok(())
    }

    pub async fn bootstrap(&self, seed: &str) -> Result<BootstrapReport> {
        BootstrapClient::new(
            self.host.clone(),
            self.membership.clone(),
            self.config.protocol.clone(),
        )
        .with_public_connect_string(self.public_connect_string.clone())
        .with_greeting(self.config.greet_new_peers)
        .with_timeout(self.config.connect_timeout)
        .connect_and_bootstrap(seed)
        .await
    }

    /// Start, then block until SIGINT or SIGTERM and shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        wait_for_shutdown_signal().await?;
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.reconcile_task.take() {
            if let Err(e) = task.await {
                warn!("Reconciliation task ended abnormally: {}", e);
            }
        }

        self.host.close().await;
        self.nat.release().await;
        info!("Node {} stopped", self.peer_id());
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl+C received, shutting down");
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received, shutting down");
    }

    Ok(())
}
