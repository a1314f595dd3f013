//! Address strings: `/ip4/<ip>/tcp/<port>` transport addresses and their
//! `/p2p/<peer-id>` suffixed peer form.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::identity::{IdentityError, PeerId};

/// Where a peer can be reached: IP + TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportAddr(SocketAddr);

impl TransportAddr {
    pub fn new(addr: SocketAddr) -> Self {
        TransportAddr(addr)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Attach a peer identity to this location.
    pub fn with_peer(self, peer_id: PeerId) -> PeerAddr {
        PeerAddr {
            transport: self,
            peer_id,
        }
    }
}

impl From<SocketAddr> for TransportAddr {
    fn from(addr: SocketAddr) -> Self {
        TransportAddr(addr)
    }
}

impl fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.ip() {
            IpAddr::V4(ip) => write!(f, "/ip4/{}/tcp/{}", ip, self.0.port()),
            IpAddr::V6(ip) => write!(f, "/ip6/{}/tcp/{}", ip, self.0.port()),
        }
    }
}

impl FromStr for TransportAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = Segments::new(s)?;
        let transport = parts.transport()?;
        parts.finish()?;
        Ok(transport)
    }
}

/// A transport address plus the identity expected at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub transport: TransportAddr,
    pub peer_id: PeerId,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p2p/{}", self.transport, self.peer_id)
    }
}

impl FromStr for PeerAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = Segments::new(s)?;
        let transport = parts.transport()?;
        match parts.next() {
            Some("p2p") => {}
            Some(other) => return Err(AddrError::UnexpectedProtocol(other.to_string())),
            None => return Err(AddrError::MissingPeerId),
        }
        let peer_id = parts
            .next()
            .ok_or(AddrError::MissingValue("p2p"))?
            .parse::<PeerId>()
            .map_err(AddrError::PeerId)?;
        parts.finish()?;
        Ok(PeerAddr { transport, peer_id })
    }
}

struct Segments<'a> {
    inner: std::str::Split<'a, char>,
}

impl<'a> Segments<'a> {
    fn new(s: &'a str) -> Result<Self, AddrError> {
        let s = s.trim();
        let rest = s.strip_prefix('/').ok_or(AddrError::MissingLeadingSlash)?;
        if rest.is_empty() {
            return Err(AddrError::Empty);
        }
        Ok(Self {
            inner: rest.split('/'),
        })
    }

    fn next(&mut self) -> Option<&'a str> {
        self.inner.next()
    }

    fn transport(&mut self) -> Result<TransportAddr, AddrError> {
        let ip: IpAddr = match self.next() {
            Some("ip4") => {
                let v = self.next().ok_or(AddrError::MissingValue("ip4"))?;
                IpAddr::V4(
                    v.parse::<Ipv4Addr>()
                        .map_err(|_| AddrError::InvalidIp(v.to_string()))?,
                )
            }
            Some("ip6") => {
                let v = self.next().ok_or(AddrError::MissingValue("ip6"))?;
                IpAddr::V6(
                    v.parse::<Ipv6Addr>()
                        .map_err(|_| AddrError::InvalidIp(v.to_string()))?,
                )
            }
            Some(other) => return Err(AddrError::UnexpectedProtocol(other.to_string())),
            None => return Err(AddrError::Empty),
        };
        match self.next() {
            Some("tcp") => {}
            Some(other) => return Err(AddrError::UnexpectedProtocol(other.to_string())),
            None => return Err(AddrError::MissingValue("tcp")),
        }
        let v = self.next().ok_or(AddrError::MissingValue("tcp"))?;
        let port = v
            .parse::<u16>()
            .map_err(|_| AddrError::InvalidPort(v.to_string()))?;
        Ok(TransportAddr(SocketAddr::new(ip, port)))
    }

    fn finish(mut self) -> Result<(), AddrError> {
        match self.next() {
            None => Ok(()),
            Some(extra) => Err(AddrError::TrailingSegment(extra.to_string())),
        }
    }
}

/// Malformed address string.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("empty address")]
    Empty,
    #[error("address must start with '/'")]
    MissingLeadingSlash,
    #[error("unexpected protocol segment {0:?}")]
    UnexpectedProtocol(String),
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("invalid ip {0:?}")]
    InvalidIp(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("missing /p2p/ peer id")]
    MissingPeerId,
    #[error("invalid peer id: {0}")]
    PeerId(IdentityError),
    #[error("trailing segment {0:?}")]
    TrailingSegment(String),
}
