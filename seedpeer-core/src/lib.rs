//! Seedpeer node library.
//! A TCP host, a k-bucket routing table and the bootstrapper that joins the
//! overlay through an ordered list of seed peers.

pub mod address;
pub mod bootstrap;
pub mod host;
pub mod identity;
pub mod kbucket;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod tcp_host;
pub mod wire;

pub use address::{AddrError, PeerAddr, TransportAddr};
pub use bootstrap::{BootstrapConfig, BootstrapError, Bootstrapper};
pub use host::{ConnectionInfo, Connectedness, DialError, Direction, Host};
pub use identity::{generate_secret_key, IdentityError, Keypair, PeerId, PublicKey};
pub use kbucket::KBucketTable;
pub use node::{Node, NodeConfig, NodeError};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use routing::{Mode, RoutingError, RoutingParams, RoutingTable};
pub use tcp_host::{HostConfig, HostError, TcpHost};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
