//! Seed bootstrapper: turns the configured seed list into a first live
//! connection, then hands over to the routing table.
//!
//! One background task per [`Bootstrapper`]. It idles until [`Bootstrapper::trigger`]
//! fires, dials the seeds strictly in order (one at a time, each bounded by the
//! dial timeout) and stops at the first success. When every seed fails it
//! waits out the retry delay and goes back to waiting for the next trigger;
//! it never re-triggers itself. However the task ends (connected, cancelled,
//! empty seed list) the routing table's `bootstrap` runs exactly once on the
//! way out, including after an explicit cancel.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::address::PeerAddr;
use crate::host::{DialError, Host};
use crate::identity::PeerId;
use crate::kbucket::KBucketTable;
use crate::routing::{RoutingError, RoutingParams, RoutingTable};

/// Per-seed dial budget.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a pass in which every seed failed.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub dial_timeout: Duration,
    pub retry_delay: Duration,
    pub routing: RoutingParams,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            routing: RoutingParams::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("routing table construction failed: {0}")]
    Routing(#[from] RoutingError),
    #[error("unable to connect to any of {0} initial peers")]
    PassExhausted(usize),
    #[error("bootstrap cancelled")]
    Cancelled,
}

/// Handle to the background bootstrap task.
pub struct Bootstrapper {
    trigger: mpsc::Sender<()>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Bootstrapper {
    /// Build the default k-bucket routing table and spawn the background task.
    /// Must be called from within a tokio runtime.
    pub fn new(
        host: Arc<dyn Host>,
        initial_peers: Vec<String>,
        config: BootstrapConfig,
    ) -> Result<Self, BootstrapError> {
        Self::with_routing(host, initial_peers, config, KBucketTable::new)
    }

    /// Like [`Bootstrapper::new`], with the routing table produced by `build`.
    /// `build` receives a token that is cancelled together with this bootstrapper.
    pub fn with_routing<R, F>(
        host: Arc<dyn Host>,
        initial_peers: Vec<String>,
        config: BootstrapConfig,
        build: F,
    ) -> Result<Self, BootstrapError>
    where
        R: RoutingTable + 'static,
        F: FnOnce(Arc<dyn Host>, &RoutingParams, CancellationToken) -> Result<R, RoutingError>,
    {
        let shutdown = CancellationToken::new();
        let routing = build(host.clone(), &config.routing, shutdown.child_token())?;
        let (trigger, trigger_rx) = mpsc::channel(1);
        let worker = Worker {
            local: host.peer_id(),
            host,
            initial_peers,
            dial_timeout: config.dial_timeout,
            retry_delay: config.retry_delay,
            routing,
            trigger_rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());
        Ok(Self {
            trigger,
            shutdown,
            task,
        })
    }

    /// Ask for a connection pass. Never blocks; a pending request absorbs later ones.
    pub fn trigger(&self) {
        match self.trigger.try_send(()) {
            Ok(()) => trace!("bootstrap triggered"),
            Err(TrySendError::Full(())) => trace!("bootstrap trigger already pending"),
            Err(TrySendError::Closed(())) => trace!("bootstrap task already finished"),
        }
    }

    /// Stop the background task at its next suspension point. Idempotent.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct Worker<R> {
    local: PeerId,
    host: Arc<dyn Host>,
    initial_peers: Vec<String>,
    dial_timeout: Duration,
    retry_delay: Duration,
    routing: R,
    trigger_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
}

impl<R: RoutingTable> Worker<R> {
    async fn run(mut self) {
        self.try_start().await;
        if let Err(err) = self.routing.bootstrap().await {
            error!("{} routing table bootstrap failed: {}", self.local, err);
        }
    }

    async fn try_start(&mut self) {
        if self.initial_peers.is_empty() {
            debug!("{} no initial peer list provided", self.local);
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("{} bootstrapper ended early", self.local);
                    return;
                }
                received = self.trigger_rx.recv() => {
                    if received.is_none() {
                        debug!("{} bootstrapper handle dropped", self.local);
                        return;
                    }
                }
            }

            match self.connect_to_initial_peers().await {
                Ok(address) => {
                    info!("{} CONNECTED to the network through {}", self.local, address);
                    return;
                }
                Err(BootstrapError::Cancelled) => {
                    info!("{} bootstrapper cancelled during a dial", self.local);
                    return;
                }
                Err(err) => warn!("{} {}", self.local, err),
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("{} bootstrapper ended early", self.local);
                    return;
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// One pass over the seed list. Returns the first address that connected.
    async fn connect_to_initial_peers(&self) -> Result<&str, BootstrapError> {
        for address in &self.initial_peers {
            match self.connect_to_peer(address).await {
                Ok(()) => return Ok(address.as_str()),
                Err(DialError::Cancelled) => return Err(BootstrapError::Cancelled),
                Err(err) => error!(
                    "{}: while attempting initial connection to {}: {}",
                    self.local, address, err
                ),
            }
        }
        Err(BootstrapError::PassExhausted(self.initial_peers.len()))
    }

    async fn connect_to_peer(&self, address: &str) -> Result<(), DialError> {
        let peer: PeerAddr = address.parse()?;
        let deadline = Instant::now() + self.dial_timeout;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DialError::Cancelled),
            res = timeout_at(deadline, self.host.dial(&peer, deadline)) => match res {
                Ok(res) => res,
                Err(_) => Err(DialError::Timeout),
            },
        }
    }
}
