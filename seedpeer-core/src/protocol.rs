//! Seedpeer wire protocol: message types and version.

use serde::{Deserialize, Serialize};

use crate::identity::{PeerId, PublicKey};

/// Current protocol version. Checked in the identity exchange.
pub const PROTOCOL_VERSION: u8 = 1;

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Identity exchange, first frame in each direction. `listen_port` is where
    /// the sender accepts connections, so inbound peers can be dialed back.
    Hello {
        protocol_version: u8,
        protocol_id: String,
        peer_id: PeerId,
        public_key: PublicKey,
        listen_port: u16,
    },
    /// Graceful close.
    Goodbye { peer_id: PeerId },
}
