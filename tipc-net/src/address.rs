//! TIPC socket address types
//!
//! `sockaddr_tipc` is the kernel's own in-memory structure, so it is laid out
//! in host byte order: a 4-byte header (family, address kind, scope) followed
//! by a 12-byte union whose interpretation depends on the kind.

use std::fmt;

use tipc_core::{Error, Result};

pub use tipc_core::Scope;

/// The TIPC address family number
pub const AF_TIPC: u16 = 30;

/// Size of `sockaddr_tipc`
pub const SOCKADDR_LEN: usize = 16;

/// Service type (and instance) of the topology service
pub const TOPOLOGY_SERVICE: u32 = 1;

/// Address kind tag of `sockaddr_tipc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddrKind {
    ServiceRange = 1,
    ServiceAddr = 2,
    SocketAddr = 3,
}

impl TryFrom<u8> for AddrKind {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(AddrKind::ServiceRange),
            2 => Ok(AddrKind::ServiceAddr),
            3 => Ok(AddrKind::SocketAddr),
            other => Err(Error::InvalidField {
                what: "address kind",
                value: u64::from(other),
            }),
        }
    }
}

/// The fixed 4-byte header shared by every TIPC socket address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockaddrHeader {
    pub family: u16,
    pub kind: AddrKind,
    /// Raw scope; the kernel leaves it zero on socket addresses
    pub scope: i8,
}

impl SockaddrHeader {
    pub const LEN: usize = 4;

    pub fn new(kind: AddrKind, scope: i8) -> Self {
        Self {
            family: AF_TIPC,
            kind,
            scope,
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let family = self.family.to_ne_bytes();
        [family[0], family[1], self.kind as u8, self.scope as u8]
    }

    /// Decode a header, rejecting foreign families and unknown kinds
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::LEN {
            return Err(Error::malformed("socket address header", Self::LEN, buf.len()));
        }

        let family = u16::from_ne_bytes([buf[0], buf[1]]);
        if family != AF_TIPC {
            return Err(Error::InvalidField {
                what: "address family",
                value: u64::from(family),
            });
        }

        Ok(Self {
            family,
            kind: AddrKind::try_from(buf[2])?,
            scope: buf[3] as i8,
        })
    }

    pub fn scope(&self) -> Option<Scope> {
        Scope::from_raw(self.scope)
    }
}

/// A service name: type and instance, optionally pinned to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    pub service_type: u32,
    pub instance: u32,
    /// 0 resolves on any node
    pub domain: u32,
}

impl ServiceAddress {
    pub fn new(service_type: u32, instance: u32) -> Self {
        Self {
            service_type,
            instance,
            domain: 0,
        }
    }

    pub fn on_node(mut self, node: u32) -> Self {
        self.domain = node;
        self
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.service_type, self.instance)?;
        if self.domain != 0 {
            write!(f, "@{:x}", self.domain)?;
        }
        Ok(())
    }
}

/// A contiguous instance range within one service type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceRange {
    pub service_type: u32,
    pub lower: u32,
    pub upper: u32,
}

impl ServiceRange {
    pub fn new(service_type: u32, lower: u32, upper: u32) -> Self {
        Self {
            service_type,
            lower,
            upper,
        }
    }

    /// A range covering exactly one instance
    pub fn single(service_type: u32, instance: u32) -> Self {
        Self::new(service_type, instance, instance)
    }

    pub fn contains(&self, instance: u32) -> bool {
        self.lower <= instance && instance <= self.upper
    }
}

impl fmt::Display for ServiceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{},{}}}", self.service_type, self.lower, self.upper)
    }
}

/// Identity of a live socket: port reference and node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerAddress {
    pub reference: u32,
    pub node: u32,
}

impl PeerAddress {
    pub fn new(reference: u32, node: u32) -> Self {
        Self { reference, node }
    }

    pub fn encode(&self) -> [u8; SOCKADDR_LEN] {
        TipcAddr::Socket(*self).encode()
    }

    /// Decode the result of an address query.
    ///
    /// Only a full 16-byte socket address of the TIPC family is accepted.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match TipcAddr::decode(buf)? {
            TipcAddr::Socket(peer) => Ok(peer),
            other => Err(Error::InvalidField {
                what: "address kind",
                value: u64::from(other.kind() as u8),
            }),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:x},{:x}}}", self.reference, self.node)
    }
}

/// Any address the TIPC family can bind, connect or send to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TipcAddr {
    Service { addr: ServiceAddress, scope: Scope },
    Range { range: ServiceRange, scope: Scope },
    Socket(PeerAddress),
}

impl TipcAddr {
    /// Service address on any node, at cluster scope
    pub fn service(service_type: u32, instance: u32) -> Self {
        TipcAddr::Service {
            addr: ServiceAddress::new(service_type, instance),
            scope: Scope::Cluster,
        }
    }

    pub fn range(service_type: u32, lower: u32, upper: u32, scope: Scope) -> Self {
        TipcAddr::Range {
            range: ServiceRange::new(service_type, lower, upper),
            scope,
        }
    }

    /// The topology service of `node` (0 for the local node)
    pub fn topology(node: u32) -> Self {
        TipcAddr::Service {
            addr: ServiceAddress::new(TOPOLOGY_SERVICE, TOPOLOGY_SERVICE).on_node(node),
            scope: Scope::Cluster,
        }
    }

    pub fn kind(&self) -> AddrKind {
        match self {
            TipcAddr::Service { .. } => AddrKind::ServiceAddr,
            TipcAddr::Range { .. } => AddrKind::ServiceRange,
            TipcAddr::Socket(_) => AddrKind::SocketAddr,
        }
    }

    pub fn encode(&self) -> [u8; SOCKADDR_LEN] {
        let (scope, words) = match self {
            TipcAddr::Service { addr, scope } => (
                scope.as_raw(),
                [addr.service_type, addr.instance, addr.domain],
            ),
            TipcAddr::Range { range, scope } => {
                (scope.as_raw(), [range.service_type, range.lower, range.upper])
            }
            TipcAddr::Socket(peer) => (0, [peer.reference, peer.node, 0]),
        };

        let mut buf = [0u8; SOCKADDR_LEN];
        buf[..SockaddrHeader::LEN].copy_from_slice(&SockaddrHeader::new(self.kind(), scope).encode());
        for (chunk, word) in buf[SockaddrHeader::LEN..].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != SOCKADDR_LEN {
            return Err(Error::malformed("socket address", SOCKADDR_LEN, buf.len()));
        }

        let header = SockaddrHeader::decode(&buf[..SockaddrHeader::LEN])?;
        let word = |i: usize| {
            let at = SockaddrHeader::LEN + 4 * i;
            u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        };

        let scope = || {
            header.scope().ok_or(Error::InvalidField {
                what: "address scope",
                value: header.scope as u8 as u64,
            })
        };

        Ok(match header.kind {
            AddrKind::ServiceAddr => TipcAddr::Service {
                addr: ServiceAddress {
                    service_type: word(0),
                    instance: word(1),
                    domain: word(2),
                },
                scope: scope()?,
            },
            AddrKind::ServiceRange => TipcAddr::Range {
                range: ServiceRange::new(word(0), word(1), word(2)),
                scope: scope()?,
            },
            AddrKind::SocketAddr => TipcAddr::Socket(PeerAddress::new(word(0), word(1))),
        })
    }
}

impl From<PeerAddress> for TipcAddr {
    fn from(peer: PeerAddress) -> Self {
        TipcAddr::Socket(peer)
    }
}

impl fmt::Display for TipcAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TipcAddr::Service { addr, scope } => write!(f, "{}/{}", addr, scope),
            TipcAddr::Range { range, scope } => write!(f, "{}/{}", range, scope),
            TipcAddr::Socket(peer) => fmt::Display::fmt(peer, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipc_core::ErrorCode;

    fn ne(word: u32) -> [u8; 4] {
        word.to_ne_bytes()
    }

    #[test]
    fn test_service_layout_matches_kernel_struct() {
        let buf = TipcAddr::service(999, 7).encode();

        assert_eq!(&buf[0..2], &AF_TIPC.to_ne_bytes());
        assert_eq!(buf[2], AddrKind::ServiceAddr as u8);
        assert_eq!(buf[3], 2);
        assert_eq!(&buf[4..8], &ne(999));
        assert_eq!(&buf[8..12], &ne(7));
        assert_eq!(&buf[12..16], &ne(0));
    }

    #[test]
    fn test_range_layout() {
        let buf = TipcAddr::range(999, 0, u32::MAX, Scope::Node).encode();

        assert_eq!(buf[2], AddrKind::ServiceRange as u8);
        assert_eq!(buf[3], 3);
        assert_eq!(&buf[8..12], &ne(0));
        assert_eq!(&buf[12..16], &[0xff; 4]);
    }

    #[test]
    fn test_peer_decode() {
        let mut buf = [0u8; SOCKADDR_LEN];
        buf[0..2].copy_from_slice(&AF_TIPC.to_ne_bytes());
        buf[2] = AddrKind::SocketAddr as u8;
        buf[4..8].copy_from_slice(&ne(0x8000_1234));
        buf[8..12].copy_from_slice(&ne(0x0100_1001));
        buf[12..16].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let peer = PeerAddress::decode(&buf).unwrap();
        assert_eq!(peer, PeerAddress::new(0x8000_1234, 0x0100_1001));
        assert_eq!(peer.encode()[..12], buf[..12]);
        assert_eq!(peer.encode()[12..], [0; 4]);
    }

    #[test]
    fn test_peer_decode_rejects_every_other_length() {
        let full = PeerAddress::new(1, 2).encode();
        let long = [0u8; 40];
        for len in 0..40 {
            if len == SOCKADDR_LEN {
                continue;
            }
            let buf = if len <= SOCKADDR_LEN { &full[..len] } else { &long[..len] };
            let err = PeerAddress::decode(buf).unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::MalformedMessage, "len {}", len);
            assert!(matches!(err, Error::MalformedMessage { actual, .. } if actual == len));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_family() {
        let mut buf = PeerAddress::new(1, 2).encode();
        buf[0..2].copy_from_slice(&(libc::AF_UNIX as u16).to_ne_bytes());

        let err = PeerAddress::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::InvalidField { what: "address family", .. }));
    }

    #[test]
    fn test_peer_decode_rejects_service_kind() {
        let buf = TipcAddr::service(5, 6).encode();
        let err = PeerAddress::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::InvalidField { what: "address kind", value: 2 }));
    }

    #[test]
    fn test_service_decode_requires_valid_scope() {
        let mut buf = TipcAddr::service(5, 6).encode();
        assert_eq!(TipcAddr::decode(&buf).unwrap(), TipcAddr::service(5, 6));

        buf[3] = 9;
        assert!(matches!(
            TipcAddr::decode(&buf),
            Err(Error::InvalidField { what: "address scope", value: 9 })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(PeerAddress::new(0xabc, 0x1001001).to_string(), "{abc,1001001}");
        assert_eq!(TipcAddr::service(999, 0).to_string(), "{999,0}/cluster");
        assert_eq!(
            TipcAddr::range(18888, 17, 17, Scope::Zone).to_string(),
            "{18888,17,17}/zone"
        );
        assert_eq!(TipcAddr::topology(0x42).to_string(), "{1,1}@42/cluster");
    }

    #[test]
    fn test_range_contains() {
        let range = ServiceRange::new(1, 10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert!(ServiceRange::single(1, 5).contains(5));
    }
}
