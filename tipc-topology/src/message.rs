//! Topology service messages
//!
//! Both message shapes have a fixed size and carry every multi-byte field in
//! network (big-endian) byte order.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::{Buf, BufMut};
use tipc_core::{Error, Result};
use tipc_net::{PeerAddress, ServiceRange};

/// Wire size of a subscription request: five words and the user tag
pub const SUBSCRIPTION_LEN: usize = 28;

/// Wire size of an event notification: five words and the subscription
pub const EVENT_LEN: usize = 48;

/// Subscription timeout that never expires
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Which events a subscription asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Filter(u32);

impl Filter {
    /// One event per bound port
    pub const PORTS: Filter = Filter(0x1);
    /// Events only when the first port appears or the last one goes away
    pub const SERVICE: Filter = Filter(0x2);
    /// Cancel a previously sent, otherwise identical subscription
    pub const CANCEL: Filter = Filter(0x4);

    pub const fn from_bits(bits: u32) -> Self {
        Filter(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Filter) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        Filter(self.0 | rhs.0)
    }
}

impl BitOrAssign for Filter {
    fn bitor_assign(&mut self, rhs: Filter) {
        self.0 |= rhs.0;
    }
}

/// A request for availability events on a service range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub range: ServiceRange,
    /// Milliseconds until a `Timeout` event, or [`WAIT_FOREVER`]
    pub timeout_ms: u32,
    pub filter: Filter,
    /// Opaque bytes echoed back in every event for this subscription
    pub user_tag: [u8; 8],
}

impl Subscription {
    pub fn new(range: ServiceRange, timeout_ms: u32, filter: Filter) -> Self {
        Self {
            range,
            timeout_ms,
            filter,
            user_tag: [0; 8],
        }
    }

    pub fn with_user_tag(mut self, user_tag: [u8; 8]) -> Self {
        self.user_tag = user_tag;
        self
    }

    /// The same subscription with the cancel bit set
    pub fn cancellation(&self) -> Self {
        Self {
            filter: self.filter | Filter::CANCEL,
            ..*self
        }
    }

    pub fn encode(&self) -> [u8; SUBSCRIPTION_LEN] {
        let mut buf = [0u8; SUBSCRIPTION_LEN];
        let mut out = &mut buf[..];
        out.put_u32(self.range.service_type);
        out.put_u32(self.range.lower);
        out.put_u32(self.range.upper);
        out.put_u32(self.timeout_ms);
        out.put_u32(self.filter.bits());
        out.put_slice(&self.user_tag);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != SUBSCRIPTION_LEN {
            return Err(Error::malformed(
                "topology subscription",
                SUBSCRIPTION_LEN,
                buf.len(),
            ));
        }

        let mut buf = buf;
        let service_type = buf.get_u32();
        let lower = buf.get_u32();
        let upper = buf.get_u32();
        let timeout_ms = buf.get_u32();
        let filter = Filter::from_bits(buf.get_u32());
        let mut user_tag = [0u8; 8];
        buf.copy_to_slice(&mut user_tag);

        Ok(Self {
            range: ServiceRange::new(service_type, lower, upper),
            timeout_ms,
            filter,
            user_tag,
        })
    }
}

/// What happened to a subscribed range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventKind {
    Published = 1,
    Withdrawn = 2,
    Timeout = 3,
}

impl TryFrom<u32> for EventKind {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(EventKind::Published),
            2 => Ok(EventKind::Withdrawn),
            3 => Ok(EventKind::Timeout),
            other => Err(Error::InvalidField {
                what: "topology event kind",
                value: u64::from(other),
            }),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Published => "Published",
            EventKind::Withdrawn => "Withdrawn",
            EventKind::Timeout => "Timeout",
        })
    }
}

/// A notification from the topology service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub kind: EventKind,
    /// Instance range that changed, within the subscribed range
    pub lower: u32,
    pub upper: u32,
    /// Socket that published or withdrew the range
    pub port: PeerAddress,
    /// The subscription this event answers
    pub subscription: Subscription,
}

impl Event {
    pub fn encode(&self) -> [u8; EVENT_LEN] {
        let mut buf = [0u8; EVENT_LEN];
        let mut out = &mut buf[..];
        out.put_u32(self.kind as u32);
        out.put_u32(self.lower);
        out.put_u32(self.upper);
        out.put_u32(self.port.reference);
        out.put_u32(self.port.node);
        out.put_slice(&self.subscription.encode());
        buf
    }

    /// Decode one event. Any length other than [`EVENT_LEN`] is rejected
    /// before a field is read.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != EVENT_LEN {
            return Err(Error::malformed("topology event", EVENT_LEN, buf.len()));
        }

        let mut buf = buf;
        let kind = EventKind::try_from(buf.get_u32())?;
        let lower = buf.get_u32();
        let upper = buf.get_u32();
        let reference = buf.get_u32();
        let node = buf.get_u32();
        let subscription = Subscription::decode(buf)?;

        Ok(Self {
            kind,
            lower,
            upper,
            port: PeerAddress::new(reference, node),
            subscription,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {{{},{},{}}} port {}",
            self.kind, self.subscription.range.service_type, self.lower, self.upper, self.port
        )
    }
}
