//! TCP host: listener (incoming), outbound dials, identity exchange and the
//! registry of live connections.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::address::{PeerAddr, TransportAddr};
use crate::host::{ConnectionInfo, Connectedness, DialError, Direction, Host};
use crate::identity::{Keypair, PeerId};
use crate::protocol::{Message, PROTOCOL_VERSION};
use crate::routing::DEFAULT_PROTOCOL_ID;
use crate::wire::{decode_frame, encode_frame, frame_len, LEN_SIZE};

/// Upper bound for an inbound peer to complete the identity exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// Peers announcing another protocol ID are rejected.
    pub protocol_id: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct PeerBook {
    connections: HashMap<PeerId, ConnectionInfo>,
    /// Outcome of the last connection per peer, once it is no longer live.
    history: HashMap<PeerId, Connectedness>,
}

struct Shared {
    keypair: Keypair,
    protocol_id: String,
    listen_addr: SocketAddr,
    book: Mutex<PeerBook>,
    shutdown: CancellationToken,
}

/// Host over plain TCP. Cheap to share behind an `Arc`.
pub struct TcpHost {
    shared: Arc<Shared>,
}

impl TcpHost {
    /// Bind the listener and start accepting connections.
    pub async fn bind(keypair: Keypair, config: HostConfig) -> Result<Self, HostError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| HostError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let listen_addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            keypair,
            protocol_id: config.protocol_id,
            listen_addr,
            book: Mutex::new(PeerBook::default()),
            shutdown: CancellationToken::new(),
        });
        info!("{} listening on {}", shared.keypair.peer_id(), listen_addr);
        tokio::spawn(accept_loop(listener, shared.clone()));
        Ok(Self { shared })
    }

    /// Stop accepting, say goodbye on every connection and drop them.
    pub fn close(&self) {
        if !self.shared.shutdown.is_cancelled() {
            debug!("{} closing host", self.shared.keypair.peer_id());
        }
        self.shared.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

#[async_trait]
impl Host for TcpHost {
    fn peer_id(&self) -> PeerId {
        self.shared.keypair.peer_id()
    }

    fn addresses(&self) -> Vec<TransportAddr> {
        let addr = self.shared.listen_addr;
        if !addr.ip().is_unspecified() {
            return vec![TransportAddr::new(addr)];
        }
        let interfaces: Vec<IpAddr> = match if_addrs::get_if_addrs() {
            Ok(ifaces) => ifaces.iter().map(if_addrs::Interface::ip).collect(),
            Err(e) => {
                warn!("listing interface addresses failed: {}", e);
                Vec::new()
            }
        };
        expand_unspecified(addr, &interfaces)
    }

    async fn dial(&self, peer: &PeerAddr, deadline: Instant) -> Result<(), DialError> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(DialError::Closed);
        }
        if peer.peer_id == shared.keypair.peer_id() {
            return Err(DialError::SelfDial);
        }
        if shared.book().connections.contains_key(&peer.peer_id) {
            trace!("already connected to {}", peer.peer_id);
            return Ok(());
        }
        let result = match timeout_at(deadline, shared.connect(peer)).await {
            Ok(res) => res,
            Err(_) => Err(DialError::Timeout),
        };
        match result {
            Ok((stream, info)) => {
                shared.attach(stream, info);
                Ok(())
            }
            Err(err) => {
                shared
                    .book()
                    .history
                    .insert(peer.peer_id, Connectedness::CannotConnect);
                Err(err)
            }
        }
    }

    fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared.book().connections.values().cloned().collect()
    }

    fn connectedness(&self, peer: &PeerId) -> Connectedness {
        let book = self.shared.book();
        if book.connections.contains_key(peer) {
            return Connectedness::Connected;
        }
        book.history
            .get(peer)
            .copied()
            .unwrap_or(Connectedness::NotConnected)
    }
}

impl Shared {
    fn book(&self) -> MutexGuard<'_, PeerBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hello(&self) -> Message {
        Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            protocol_id: self.protocol_id.clone(),
            peer_id: self.keypair.peer_id(),
            public_key: self.keypair.public_key().clone(),
            listen_port: self.listen_addr.port(),
        }
    }

    /// Validate a remote hello. Returns the remote ID and its announced listen port.
    fn check_hello(&self, msg: Message) -> Result<(PeerId, u16), DialError> {
        let Message::Hello {
            protocol_version,
            protocol_id,
            peer_id,
            public_key,
            listen_port,
        } = msg
        else {
            return Err(DialError::UnexpectedMessage);
        };
        if protocol_version != PROTOCOL_VERSION {
            return Err(DialError::ProtocolVersion(protocol_version));
        }
        if protocol_id != self.protocol_id {
            return Err(DialError::ProtocolMismatch(protocol_id));
        }
        if PeerId::from_public_key(&public_key) != peer_id {
            return Err(DialError::InvalidIdentity(peer_id));
        }
        if peer_id == self.keypair.peer_id() {
            return Err(DialError::SelfDial);
        }
        Ok((peer_id, listen_port))
    }

    /// Outbound: TCP connect, send hello, expect the dialed identity back.
    async fn connect(&self, peer: &PeerAddr) -> Result<(TcpStream, ConnectionInfo), DialError> {
        let mut stream = TcpStream::connect(peer.transport.socket_addr()).await?;
        write_message(&mut stream, &self.hello()).await?;
        let reply = read_message(&mut stream).await?;
        let (remote, _) = self.check_hello(reply)?;
        if remote != peer.peer_id {
            return Err(DialError::PeerIdMismatch {
                expected: peer.peer_id,
                actual: remote,
            });
        }
        Ok((
            stream,
            ConnectionInfo {
                peer_id: remote,
                remote_addr: peer.transport,
                direction: Direction::Outbound,
            },
        ))
    }

    /// Inbound: read the dialer's hello, answer with ours, then validate.
    async fn accept(
        &self,
        mut stream: TcpStream,
        from: SocketAddr,
    ) -> Result<(TcpStream, ConnectionInfo), DialError> {
        let msg = read_message(&mut stream).await?;
        write_message(&mut stream, &self.hello()).await?;
        let (remote, listen_port) = self.check_hello(msg)?;
        Ok((
            stream,
            ConnectionInfo {
                peer_id: remote,
                remote_addr: TransportAddr::new(SocketAddr::new(from.ip(), listen_port)),
                direction: Direction::Inbound,
            },
        ))
    }

    /// Register a finished exchange and keep the stream open in its own task.
    /// A second connection to an already connected peer is dropped.
    fn attach(self: &Arc<Self>, stream: TcpStream, info: ConnectionInfo) {
        let peer = info.peer_id;
        {
            let mut book = self.book();
            if book.connections.contains_key(&peer) {
                debug!("duplicate connection to {} dropped", peer);
                return;
            }
            book.connections.insert(peer, info);
        }
        debug!("{} connected to {}", self.keypair.peer_id(), peer);
        tokio::spawn(serve_connection(self.clone(), stream, peer));
    }

    fn detach(&self, peer: &PeerId) {
        let mut book = self.book();
        book.connections.remove(peer);
        book.history.insert(*peer, Connectedness::CanConnect);
    }
}

/// Addresses a wildcard bind answers on: loopback, then every interface
/// address of the same family, all on the bound port.
fn expand_unspecified(addr: SocketAddr, interfaces: &[IpAddr]) -> Vec<TransportAddr> {
    let loopback = match addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    };
    let mut ips = vec![loopback];
    for ip in interfaces {
        if ip.is_ipv4() != addr.is_ipv4() || is_v6_link_local(ip) || ips.contains(ip) {
            continue;
        }
        ips.push(*ip);
    }
    ips.into_iter()
        .map(|ip| TransportAddr::new(SocketAddr::new(ip, addr.port())))
        .collect()
}

// fe80::/10 needs a scope id to be dialable
fn is_v6_link_local(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V6(v6) if v6.segments()[0] & 0xffc0 == 0xfe80)
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            res = listener.accept() => res,
        };
        let (stream, from) = match accepted {
            Ok(v) => v,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            match timeout(HANDSHAKE_TIMEOUT, shared.accept(stream, from)).await {
                Ok(Ok((stream, info))) => shared.attach(stream, info),
                Ok(Err(e)) => debug!("inbound connection from {} rejected: {}", from, e),
                Err(_) => debug!("inbound connection from {} timed out", from),
            }
        });
    }
    debug!("{} stopped accepting", shared.keypair.peer_id());
}

async fn serve_connection(shared: Arc<Shared>, stream: TcpStream, peer: PeerId) {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                let bye = Message::Goodbye { peer_id: shared.keypair.peer_id() };
                if let Err(e) = write_message(&mut writer, &bye).await {
                    trace!("goodbye to {} not sent: {}", peer, e);
                }
                break;
            }
            msg = read_message(&mut reader) => match msg {
                Ok(Message::Goodbye { .. }) => {
                    debug!("{} said goodbye", peer);
                    break;
                }
                Ok(other) => trace!("ignoring {:?} from {}", other, peer),
                Err(e) => {
                    debug!("connection to {} lost: {}", peer, e);
                    break;
                }
            },
        }
    }
    shared.detach(&peer);
}

async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<(), DialError> {
    let frame = encode_frame(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message, DialError> {
    let mut header = [0u8; LEN_SIZE];
    r.read_exact(&mut header).await?;
    let len = frame_len(header)?;
    let mut frame = vec![0u8; LEN_SIZE + len];
    frame[..LEN_SIZE].copy_from_slice(&header);
    r.read_exact(&mut frame[LEN_SIZE..]).await?;
    let (msg, _) = decode_frame(&frame)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> HostConfig {
        HostConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..HostConfig::default()
        }
    }

    async fn host() -> TcpHost {
        TcpHost::bind(Keypair::generate(), loopback()).await.unwrap()
    }

    fn addr_of(h: &TcpHost) -> PeerAddr {
        h.addresses()[0].with_peer(h.peer_id())
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn dial_registers_connection_on_both_sides() {
        let a = host().await;
        let b = host().await;
        assert_eq!(b.connectedness(&a.peer_id()), Connectedness::NotConnected);

        b.dial(&addr_of(&a), soon()).await.unwrap();

        let conns = b.connections();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].peer_id, a.peer_id());
        assert_eq!(conns[0].direction, Direction::Outbound);
        assert_eq!(b.connectedness(&a.peer_id()), Connectedness::Connected);

        assert!(eventually(|| a.connectedness(&b.peer_id()) == Connectedness::Connected).await);
        let inbound = a.connections();
        assert_eq!(inbound[0].direction, Direction::Inbound);
        // inbound peers are recorded under the port they listen on
        assert_eq!(inbound[0].peer_addr(), addr_of(&b));
    }

    #[tokio::test]
    async fn second_dial_reuses_existing_connection() {
        let a = host().await;
        let b = host().await;
        b.dial(&addr_of(&a), soon()).await.unwrap();
        b.dial(&addr_of(&a), soon()).await.unwrap();
        assert_eq!(b.connections().len(), 1);
    }

    #[tokio::test]
    async fn wrong_peer_id_is_rejected() {
        let a = host().await;
        let b = host().await;
        let wrong = Keypair::generate().peer_id();
        let target = a.addresses()[0].with_peer(wrong);
        let err = b.dial(&target, soon()).await.unwrap_err();
        assert!(matches!(err, DialError::PeerIdMismatch { .. }), "{err}");
        assert_eq!(b.connectedness(&wrong), Connectedness::CannotConnect);
        assert!(b.connections().is_empty());
    }

    #[tokio::test]
    async fn protocol_mismatch_is_rejected() {
        let a = host().await;
        let other = TcpHost::bind(
            Keypair::generate(),
            HostConfig {
                protocol_id: "/other/kad/2.0.0".to_string(),
                ..loopback()
            },
        )
        .await
        .unwrap();
        let err = other.dial(&addr_of(&a), soon()).await.unwrap_err();
        assert!(matches!(err, DialError::ProtocolMismatch(_)), "{err}");
        assert!(a.connections().is_empty());
    }

    #[tokio::test]
    async fn self_dial_is_refused() {
        let a = host().await;
        assert!(matches!(
            a.dial(&addr_of(&a), soon()).await,
            Err(DialError::SelfDial)
        ));
    }

    #[tokio::test]
    async fn unreachable_port_fails_fast() {
        let b = host().await;
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let target = TransportAddr::new(SocketAddr::from(([127, 0, 0, 1], port)))
            .with_peer(Keypair::generate().peer_id());
        assert!(matches!(
            b.dial(&target, soon()).await,
            Err(DialError::Io(_))
        ));
        assert_eq!(
            b.connectedness(&target.peer_id),
            Connectedness::CannotConnect
        );
    }

    #[tokio::test]
    async fn silent_listener_hits_deadline() {
        let b = host().await;
        // accepted by the kernel backlog, never answered
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = TransportAddr::new(silent.local_addr().unwrap())
            .with_peer(Keypair::generate().peer_id());
        let start = Instant::now();
        let res = b
            .dial(&target, Instant::now() + Duration::from_millis(200))
            .await;
        assert!(matches!(res, Err(DialError::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn close_says_goodbye() {
        let a = host().await;
        let b = host().await;
        b.dial(&addr_of(&a), soon()).await.unwrap();
        assert!(eventually(|| a.connectedness(&b.peer_id()) == Connectedness::Connected).await);

        a.close();
        assert!(a.is_closed());
        assert!(eventually(|| b.connectedness(&a.peer_id()) == Connectedness::CanConnect).await);
        assert!(matches!(
            a.dial(&addr_of(&b), soon()).await,
            Err(DialError::Closed)
        ));
    }

    #[test]
    fn wildcard_expands_to_same_family_interfaces() {
        let bound = SocketAddr::from(([0, 0, 0, 0], 4001));
        let interfaces: Vec<IpAddr> = vec![
            "127.0.0.1".parse().unwrap(),
            "192.168.1.7".parse().unwrap(),
            "::1".parse().unwrap(),
            "fe80::1".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
        ];
        let addrs: Vec<String> = expand_unspecified(bound, &interfaces)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            addrs,
            vec![
                "/ip4/127.0.0.1/tcp/4001",
                "/ip4/192.168.1.7/tcp/4001",
                "/ip4/10.0.0.3/tcp/4001",
            ]
        );

        let bound6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, 4001));
        let addrs: Vec<String> = expand_unspecified(bound6, &interfaces)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(addrs, vec!["/ip6/::1/tcp/4001"]);
    }

    #[tokio::test]
    async fn wildcard_bind_reports_every_interface() {
        let h = TcpHost::bind(Keypair::generate(), HostConfig::default())
            .await
            .unwrap();
        let port = h.shared.listen_addr.port();
        let addrs = h.addresses();
        assert_eq!(
            addrs[0],
            TransportAddr::new(SocketAddr::from(([127, 0, 0, 1], port)))
        );
        for iface in if_addrs::get_if_addrs().unwrap() {
            let ip = iface.ip();
            if ip.is_ipv4() && !iface.is_loopback() {
                assert!(addrs.contains(&TransportAddr::new(SocketAddr::new(ip, port))));
            }
        }
        h.close();
    }
}
