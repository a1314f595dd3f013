//! Host capability: the narrow surface the bootstrapper, routing table and
//! node facade use to reach the network.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::address::{AddrError, PeerAddr, TransportAddr};
use crate::identity::PeerId;
use crate::wire::{FrameDecodeError, FrameEncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A live connection as seen from the local host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    /// Remote IP plus the listen port the peer announced.
    pub remote_addr: TransportAddr,
    pub direction: Direction,
}

impl ConnectionInfo {
    pub fn peer_addr(&self) -> PeerAddr {
        self.remote_addr.with_peer(self.peer_id)
    }
}

/// Whether a live connection to a peer exists, and what the last attempt said.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    /// Never connected, nothing known.
    NotConnected,
    Connected,
    /// Was connected before; the connection has since closed.
    CanConnect,
    /// The last dial to this peer failed.
    CannotConnect,
}

#[async_trait]
pub trait Host: Send + Sync {
    fn peer_id(&self) -> PeerId;

    /// Transport addresses the host accepts connections on.
    fn addresses(&self) -> Vec<TransportAddr>;

    /// Connect to `peer`, giving up at `deadline`. Succeeds immediately when a
    /// connection to that peer already exists.
    async fn dial(&self, peer: &PeerAddr, deadline: Instant) -> Result<(), DialError>;

    fn connections(&self) -> Vec<ConnectionInfo>;

    fn connectedness(&self, peer: &PeerId) -> Connectedness;
}

/// Failure of a single dial attempt.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddrError),
    #[error("refusing to dial self")]
    SelfDial,
    #[error("dial timed out")]
    Timeout,
    #[error("dial cancelled")]
    Cancelled,
    #[error("host closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported protocol version {0}")]
    ProtocolVersion(u8),
    #[error("protocol mismatch: remote speaks {0:?}")]
    ProtocolMismatch(String),
    #[error("peer id {0} does not match its public key")]
    InvalidIdentity(PeerId),
    #[error("expected peer {expected}, remote is {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },
    #[error("unexpected message during identity exchange")]
    UnexpectedMessage,
    #[error("frame encode error: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("frame decode error: {0}")]
    Decode(#[from] FrameDecodeError),
}
