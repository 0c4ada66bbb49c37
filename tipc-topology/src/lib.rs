//! # tipc-topology
//!
//! Subscriptions to the TIPC topology service: register interest in a range
//! of service instances and receive Published / Withdrawn / Timeout events
//! as sockets bind and unbind across the cluster.

pub mod client;
pub mod message;

pub use client::{ClientState, TopologyClient};
pub use message::{
    Event, EventKind, Filter, Subscription, EVENT_LEN, SUBSCRIPTION_LEN, WAIT_FOREVER,
};
