//! Connections over TIPC sockets

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use tipc_core::{Direction, Error, ReactorFd, Readiness, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::address::{PeerAddress, TipcAddr};
use crate::sys::{self, SockaddrBuf};

/// Socket types supported by the TIPC family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// Reliable byte stream
    Stream,
    /// Reliable, connection-oriented, message boundaries preserved
    SeqPacket,
    /// Connectionless, unreliable messages
    Datagram,
    /// Connectionless, reliable messages
    ReliableDatagram,
}

impl SocketKind {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            SocketKind::Stream => libc::SOCK_STREAM,
            SocketKind::SeqPacket => libc::SOCK_SEQPACKET,
            SocketKind::Datagram => libc::SOCK_DGRAM,
            SocketKind::ReliableDatagram => libc::SOCK_RDM,
        }
    }

    /// Whether the kind supports listen/accept
    pub fn is_connection_oriented(self) -> bool {
        matches!(self, SocketKind::Stream | SocketKind::SeqPacket)
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SocketKind::Stream => "stream",
            SocketKind::SeqPacket => "seqpacket",
            SocketKind::Datagram => "datagram",
            SocketKind::ReliableDatagram => "rdm",
        })
    }
}

/// A nonblocking socket driven by the reactor.
///
/// Read and write may run concurrently from different tasks; two concurrent
/// reads (or two concurrent writes) on one connection are not supported.
/// Local and remote addresses are resolved on first use and cached.
pub struct Connection {
    io: ReactorFd,
    kind: SocketKind,
    local: Mutex<Option<PeerAddress>>,
    remote: Mutex<Option<PeerAddress>>,
}

impl Connection {
    /// Take ownership of a socket, switch it to nonblocking mode and
    /// register it with the tokio driver
    pub fn from_owned_fd(fd: OwnedFd, kind: SocketKind) -> Result<Self> {
        socket2::SockRef::from(&fd)
            .set_nonblocking(true)
            .map_err(|e| Error::os("set_nonblocking", e))?;
        let io = ReactorFd::register(fd)?;
        trace!(fd = io.raw_fd(), %kind, "connection registered");
        Ok(Self::from_reactor(io, kind))
    }

    /// Build a connection over an injected readiness source
    pub fn with_readiness(readiness: Arc<dyn Readiness>, kind: SocketKind) -> Self {
        Self::from_reactor(ReactorFd::new(readiness), kind)
    }

    fn from_reactor(io: ReactorFd, kind: SocketKind) -> Self {
        Self {
            io,
            kind,
            local: Mutex::new(None),
            remote: Mutex::new(None),
        }
    }

    pub(crate) fn with_remote(self, remote: PeerAddress) -> Self {
        *self.remote.lock() = Some(remote);
        self
    }

    pub(crate) fn reactor(&self) -> &ReactorFd {
        &self.io
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn raw_fd(&self) -> RawFd {
        self.io.raw_fd()
    }

    /// Read into `buf`. A connection reset by the peer reads as end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let outcome = self
            .io
            .io(Direction::Read, |fd| sys::read(fd, &mut buf[..]))
            .await?;
        match outcome {
            Ok(n) => {
                trace!(fd = self.raw_fd(), n, "read");
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(fd = self.raw_fd(), "peer reset, reporting end of stream");
                Ok(0)
            }
            Err(e) => Err(Error::os("read", e)),
        }
    }

    /// Write from `buf` with a single send; may accept fewer bytes than given
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = self
            .io
            .io(Direction::Write, |fd| sys::send(fd, buf))
            .await?
            .map_err(|e| Error::os("write", e))?;
        trace!(fd = self.raw_fd(), n, "write");
        Ok(n)
    }

    /// Receive one message and the address of its sender
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, PeerAddress)> {
        let (n, raw) = self
            .io
            .io(Direction::Read, |fd| sys::recv_from(fd, &mut buf[..]))
            .await?
            .map_err(|e| Error::os("recvfrom", e))?;
        let sender = PeerAddress::decode(raw.bytes())?;
        trace!(fd = self.raw_fd(), n, %sender, "read_from");
        Ok((n, sender))
    }

    /// Send one message to `addr`
    pub async fn write_to(&self, buf: &[u8], addr: &TipcAddr) -> Result<usize> {
        let n = self
            .io
            .io(Direction::Write, |fd| sys::send_to(fd, buf, addr))
            .await?
            .map_err(|e| Error::os("sendto", e))?;
        trace!(fd = self.raw_fd(), n, %addr, "write_to");
        Ok(n)
    }

    pub fn local_addr(&self) -> Result<PeerAddress> {
        self.resolve(&self.local, "getsockname", sys::sockname)
    }

    pub fn remote_addr(&self) -> Result<PeerAddress> {
        self.resolve(&self.remote, "getpeername", sys::peername)
    }

    fn resolve(
        &self,
        cache: &Mutex<Option<PeerAddress>>,
        op: &'static str,
        query: fn(RawFd) -> io::Result<SockaddrBuf>,
    ) -> Result<PeerAddress> {
        let mut cached = cache.lock();
        if let Some(addr) = *cached {
            return Ok(addr);
        }

        let raw = self.io.with_fd(query)?.map_err(|source| {
            debug!(fd = self.raw_fd(), op, error = %source, "address resolution failed");
            Error::AddressResolution { op, source }
        })?;
        let addr = PeerAddress::decode(raw.bytes())?;
        *cached = Some(addr);
        Ok(addr)
    }

    /// Set the read and write deadlines; `None` waits indefinitely
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.io.set_deadline(deadline);
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.io.set_read_deadline(deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.io.set_write_deadline(deadline);
    }

    /// Close the socket. Pending operations fail with [`Error::Closed`];
    /// closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.io.close() {
            debug!(fd = self.raw_fd(), kind = %self.kind, "connection closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.raw_fd()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.raw_fd())
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr() {
            Ok(addr) => write!(f, "{}", addr)?,
            Err(_) => f.write_str("?")?,
        }
        f.write_str(" -> ")?;
        match self.remote_addr() {
            Ok(addr) => write!(f, "{}", addr),
            Err(_) => f.write_str("?"),
        }
    }
}

// The poll paths below share the reactor's retry and close handling but
// ignore the stored deadlines; wrap them in `tokio::time::timeout` instead.

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let unfilled = buf.initialize_unfilled();
        let polled = self
            .io
            .poll_io(cx, Direction::Read, &mut |fd| sys::read(fd, &mut unfilled[..]));

        match ready!(polled) {
            Ok(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => Poll::Ready(Ok(())),
            Ok(Err(e)) => Poll::Ready(Err(e)),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let polled = self
            .io
            .poll_io(cx, Direction::Write, &mut |fd| sys::send(fd, buf));
        match ready!(polled) {
            Ok(result) => Poll::Ready(result),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = self
            .io
            .with_fd(|fd| sys::shutdown(fd, libc::SHUT_WR))
            .map_err(io::Error::from)
            .and_then(|shutdown| shutdown);
        Poll::Ready(result)
    }
}
