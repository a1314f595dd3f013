//! Node facade: TCP host + seed bootstrapper, plus address introspection.

use std::net::SocketAddr;
use std::sync::Arc;

use log::info;

use crate::bootstrap::{BootstrapConfig, BootstrapError, Bootstrapper};
use crate::host::{Connectedness, Host};
use crate::identity::{IdentityError, Keypair, PeerId};
use crate::tcp_host::{HostConfig, HostError, TcpHost};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// 32 secret key bytes; a fresh key is generated when empty.
    pub secret_key: Vec<u8>,
    /// Seed addresses, tried in this order.
    pub initial_peers: Vec<String>,
    pub listen_addr: SocketAddr,
    pub bootstrap: BootstrapConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            secret_key: Vec::new(),
            initial_peers: Vec::new(),
            listen_addr: HostConfig::default().listen_addr,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("host: {0}")]
    Host(#[from] HostError),
    #[error("bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),
}

pub struct Node {
    host: Arc<TcpHost>,
    bootstrapper: Bootstrapper,
}

impl Node {
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let keypair = if config.secret_key.is_empty() {
            info!("provided empty private key bytes, generating a new private key");
            Keypair::generate()
        } else {
            Keypair::from_secret_bytes(&config.secret_key)?
        };

        let host_config = HostConfig {
            listen_addr: config.listen_addr,
            protocol_id: config.bootstrap.routing.protocol_id.clone(),
        };
        let host = Arc::new(TcpHost::bind(keypair, host_config).await?);
        let bootstrapper = match Bootstrapper::new(
            host.clone(),
            config.initial_peers,
            config.bootstrap,
        ) {
            Ok(b) => b,
            Err(err) => {
                host.close();
                return Err(err.into());
            }
        };

        let node = Self { host, bootstrapper };
        info!(
            "Listening on the following interfaces: {}",
            node.addresses().join(", ")
        );
        Ok(node)
    }

    pub fn peer_id(&self) -> PeerId {
        self.host.peer_id()
    }

    /// Start bootstrapping against the seed list.
    pub fn bootstrap(&self) {
        self.bootstrapper.trigger();
    }

    /// Own listen addresses, each with this node's `/p2p/` suffix.
    pub fn addresses(&self) -> Vec<String> {
        let id = self.peer_id();
        self.host
            .addresses()
            .into_iter()
            .map(|addr| addr.with_peer(id).to_string())
            .collect()
    }

    /// Addresses of connected peers, each with the remote `/p2p/` suffix.
    pub fn connected_addresses(&self) -> Vec<String> {
        self.host
            .connections()
            .iter()
            .map(|c| c.peer_addr().to_string())
            .collect()
    }

    pub fn connectedness(&self, peer: &PeerId) -> Connectedness {
        self.host.connectedness(peer)
    }

    /// Cancel bootstrapping, then close the host.
    pub fn close(&self) {
        self.bootstrapper.cancel();
        self.host.close();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.close();
    }
}
