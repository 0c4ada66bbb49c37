//! Listening TIPC sockets

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};

use tipc_core::{Direction, Error, NetConfig, Result};
use tracing::{debug, info};

use crate::address::{PeerAddress, ServiceAddress, TipcAddr};
use crate::conn::{Connection, SocketKind};
use crate::sys;

/// A bound, listening socket producing [`Connection`]s
pub struct Listener {
    conn: Connection,
}

impl Listener {
    /// Bind a stream listener to `addr` with the default configuration
    pub fn bind(addr: &TipcAddr) -> Result<Self> {
        Self::bind_with(addr, SocketKind::Stream, &NetConfig::default())
    }

    /// Bind a listener of the given connection-oriented kind to `addr`.
    ///
    /// The scope carried by service and range addresses controls how widely
    /// the bound name is advertised.
    pub fn bind_with(addr: &TipcAddr, kind: SocketKind, config: &NetConfig) -> Result<Self> {
        if !kind.is_connection_oriented() {
            return Err(Error::InvalidArgument(format!(
                "cannot listen on a {} socket",
                kind
            )));
        }
        config.validate()?;

        let fd = sys::socket(kind.as_raw()).map_err(|e| Error::os("socket", e))?;
        sys::bind(fd.as_raw_fd(), addr).map_err(|e| Error::os("bind", e))?;
        sys::listen(fd.as_raw_fd(), config.listen_backlog).map_err(|e| Error::os("listen", e))?;

        let conn = Connection::from_owned_fd(fd, kind)?;
        info!(%addr, %kind, fd = conn.raw_fd(), "listening");
        Ok(Self { conn })
    }

    /// Wrap a socket that is already bound and listening
    pub fn from_owned_fd(fd: OwnedFd, kind: SocketKind) -> Result<Self> {
        Ok(Self {
            conn: Connection::from_owned_fd(fd, kind)?,
        })
    }

    /// Wait for the next incoming connection
    pub async fn accept(&self) -> Result<Connection> {
        let (fd, raw) = self
            .conn
            .reactor()
            .io(Direction::Read, sys::accept)
            .await?
            .map_err(|e| Error::os("accept", e))?;

        let remote = PeerAddress::decode(raw.bytes()).ok();
        let conn = Connection::from_owned_fd(fd, self.conn.kind())?;
        let conn = match remote {
            Some(remote) => conn.with_remote(remote),
            None => conn,
        };

        match remote {
            Some(remote) => debug!(fd = conn.raw_fd(), %remote, "accepted connection"),
            None => debug!(fd = conn.raw_fd(), "accepted connection"),
        }
        Ok(conn)
    }

    /// The bound local address
    pub fn addr(&self) -> Result<PeerAddress> {
        self.conn.local_addr()
    }

    pub fn local_addr(&self) -> Result<PeerAddress> {
        self.addr()
    }

    pub fn kind(&self) -> SocketKind {
        self.conn.kind()
    }

    /// Stop listening. A pending [`accept`](Self::accept) fails with
    /// [`Error::Closed`]; accepted connections are unaffected.
    pub fn close(&self) -> Result<()> {
        self.conn.close()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("conn", &self.conn).finish()
    }
}

/// Listen for stream connections on service `{service_type, instance}`
/// at the configured default scope
pub fn listen(service_type: u32, instance: u32) -> Result<Listener> {
    let config = NetConfig::default();
    let addr = TipcAddr::Service {
        addr: ServiceAddress::new(service_type, instance),
        scope: config.default_scope,
    };
    Listener::bind_with(&addr, SocketKind::Stream, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::sync::Arc;
    use std::time::Duration;

    fn unix_listener() -> (Listener, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "tipc-listener-{}-{:?}.sock",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        (
            Listener::from_owned_fd(OwnedFd::from(listener), SocketKind::Stream).unwrap(),
            path,
        )
    }

    #[tokio::test]
    async fn test_accept_produces_connection() {
        let (listener, path) = unix_listener();
        let client = UnixStream::connect(&path).unwrap();
        let client = Connection::from_owned_fd(OwnedFd::from(client), SocketKind::Stream).unwrap();

        let server = listener.accept().await.unwrap();
        client.write(b"hi").await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");

        // a foreign peer is not prefilled and does not resolve
        assert!(server.remote_addr().is_err());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_close_unblocks_accept() {
        let (listener, path) = unix_listener();
        let listener = Arc::new(listener);

        let pending = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        listener.close().unwrap();
        listener.close().unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("accept must be unblocked by close")
            .unwrap()
            .unwrap_err();
        assert!(err.is_closed());
        assert!(listener.is_closed());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_accepted_connection_outlives_listener() {
        let (listener, path) = unix_listener();
        let client = UnixStream::connect(&path).unwrap();
        let client = Connection::from_owned_fd(OwnedFd::from(client), SocketKind::Stream).unwrap();

        let server = listener.accept().await.unwrap();
        listener.close().unwrap();

        server.write(b"still here").await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 10);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_datagram_listener_rejected() {
        let err = Listener::bind_with(
            &TipcAddr::service(1000, 1),
            SocketKind::Datagram,
            &NetConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
