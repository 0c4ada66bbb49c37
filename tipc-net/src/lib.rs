//! # tipc-net
//!
//! Async sockets over the Linux TIPC address family: service-addressed
//! listeners, dialers for every socket kind, and connections with
//! deadlines and cached peer identities.

pub mod address;
pub mod conn;
pub mod dial;
pub mod listener;
mod sys;

pub use address::{
    AddrKind, PeerAddress, Scope, ServiceAddress, ServiceRange, SockaddrHeader, TipcAddr,
    AF_TIPC, SOCKADDR_LEN, TOPOLOGY_SERVICE,
};
pub use conn::{Connection, SocketKind};
pub use dial::{
    dial_datagram, dial_sequential_packet, dial_service, dial_stream, listen_datagram,
    listen_reliable_datagram, socket_pair, Dialer,
};
pub use listener::{listen, Listener};
