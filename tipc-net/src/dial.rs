//! Establishing TIPC connections

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use tipc_core::{Direction, Error, NetConfig, Result};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::address::{ServiceAddress, TipcAddr};
use crate::conn::{Connection, SocketKind};
use crate::sys;

/// Creates outgoing connections
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    config: NetConfig,
}

impl Dialer {
    pub fn new(config: NetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Connect a socket of `kind` to `addr`.
    ///
    /// The connect itself never blocks; completion is awaited on write
    /// readiness and confirmed through the pending socket error and a peer
    /// query. `connect_timeout_ms` bounds the whole wait.
    pub async fn dial(&self, kind: SocketKind, addr: &TipcAddr) -> Result<Connection> {
        self.config.validate()?;
        let deadline = self.config.connect_timeout().map(|t| Instant::now() + t);

        let fd = sys::socket(kind.as_raw()).map_err(|e| Error::os("socket", e))?;
        let conn = Connection::from_owned_fd(fd, kind)?;

        establish(&conn, deadline, |fd| sys::connect(fd, addr)).await?;

        debug!(%addr, %kind, fd = conn.raw_fd(), "connected");
        Ok(conn)
    }
}

/// Start a connect with `start` and, if it is still in progress, wait on
/// write readiness until `sys::finish_connect` confirms a peer.
async fn establish<F>(conn: &Connection, deadline: Option<Instant>, start: F) -> Result<()>
where
    F: FnOnce(RawFd) -> io::Result<()>,
{
    match conn.reactor().with_fd(start)? {
        Ok(()) => Ok(()),
        Err(e) if connect_in_progress(&e) => conn
            .reactor()
            .io_until(Direction::Write, deadline, sys::finish_connect)
            .await?
            .map_err(|e| Error::os("connect", e)),
        Err(e) => Err(Error::os("connect", e)),
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

/// Dial a stream connection to service `{service_type, instance}` on any node
pub async fn dial_service(service_type: u32, instance: u32) -> Result<Connection> {
    let dialer = Dialer::default();
    let addr = TipcAddr::Service {
        addr: ServiceAddress::new(service_type, instance),
        scope: dialer.config().default_scope,
    };
    dialer.dial(SocketKind::Stream, &addr).await
}

pub async fn dial_stream(addr: &TipcAddr) -> Result<Connection> {
    Dialer::default().dial(SocketKind::Stream, addr).await
}

/// Dial a connection that preserves message boundaries
pub async fn dial_sequential_packet(addr: &TipcAddr) -> Result<Connection> {
    Dialer::default().dial(SocketKind::SeqPacket, addr).await
}

/// Connect a datagram socket; `write` then sends to `addr`
pub async fn dial_datagram(addr: &TipcAddr) -> Result<Connection> {
    Dialer::default().dial(SocketKind::Datagram, addr).await
}

/// Bind an unconnected datagram socket for `read_from`/`write_to`
pub fn listen_datagram(addr: &TipcAddr) -> Result<Connection> {
    bind_connectionless(SocketKind::Datagram, addr)
}

/// Bind an unconnected reliable-datagram socket for `read_from`/`write_to`
pub fn listen_reliable_datagram(addr: &TipcAddr) -> Result<Connection> {
    bind_connectionless(SocketKind::ReliableDatagram, addr)
}

fn bind_connectionless(kind: SocketKind, addr: &TipcAddr) -> Result<Connection> {
    let fd = sys::socket(kind.as_raw()).map_err(|e| Error::os("socket", e))?;
    sys::bind(fd.as_raw_fd(), addr).map_err(|e| Error::os("bind", e))?;
    let conn = Connection::from_owned_fd(fd, kind)?;
    info!(%addr, %kind, fd = conn.raw_fd(), "bound");
    Ok(conn)
}

/// Two sockets of `kind` connected to each other through the local node
pub fn socket_pair(kind: SocketKind) -> Result<(Connection, Connection)> {
    let (a, b) = sys::socket_pair(kind.as_raw()).map_err(|e| Error::os("socketpair", e))?;
    let a = Connection::from_owned_fd(a, kind)?;
    let b = Connection::from_owned_fd(b, kind)?;
    debug!(%kind, a = a.raw_fd(), b = b.raw_fd(), "socket pair created");
    Ok((a, b))
}
