//! Transport Substrate Module
//!
//! The store does not manage sockets or group membership itself. It talks to a
//! [`Transport`] that can:
//! - join and leave a named group ([`Transport::connect`] / [`Transport::disconnect`]),
//! - deliver opaque payloads to one member, best effort ([`Transport::send`]),
//! - hand inbound payloads and membership views back through a [`Connection`].
//!
//! ## Implementations
//! - [`memory::MemoryNetwork`]: in-process groups with instant, ordered views.
//!   Used by tests and by [`StoreManager`](crate::storage::manager::StoreManager).
//! - [`udp::UdpTransport`]: gossip membership plus UDP datagrams, used by the node binary.

pub mod memory;
pub mod udp;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::error::TransportError;
use crate::membership::types::{MembershipView, NodeId};

/// A payload delivered to this node, tagged with its sender.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: NodeId,
    pub payload: Vec<u8>,
}

/// Handles returned when an endpoint joins its group.
pub struct Connection {
    /// Identity of this endpoint for as long as it stays connected.
    pub local_id: NodeId,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Always holds the latest view; intermediate views may be skipped.
    pub views: watch::Receiver<Arc<MembershipView>>,
}

pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> Result<Connection, TransportError>;

    /// Best-effort delivery. `Ok` does not mean the payload arrived.
    fn send(&self, dst: &NodeId, payload: Vec<u8>) -> Result<(), TransportError>;

    fn disconnect(&self);
}

/// Creates endpoints that join a named group.
pub trait TransportFactory: Send + Sync {
    fn endpoint(&self, group: &str) -> Arc<dyn Transport>;
}
