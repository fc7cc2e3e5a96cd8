//! Gossip-backed datagram transport.
//!
//! Membership comes from [`MembershipService`]; store payloads travel as
//! [`Datagram::Data`] on the same UDP socket. Sends never wait for socket
//! readiness, so a full send buffer surfaces as an `Io` error to the caller.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Connection, Transport};
use crate::error::TransportError;
use crate::membership::service::{MAX_DATAGRAM_SIZE, MembershipService};
use crate::membership::types::{Datagram, NodeId, NodeState};

pub struct UdpTransport {
    service: Arc<MembershipService>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Binds the gossip socket and sends join requests to `seed_nodes`.
    pub async fn bind(bind_addr: SocketAddr, seed_nodes: Vec<SocketAddr>) -> anyhow::Result<Self> {
        let service = MembershipService::new(bind_addr, seed_nodes).await?;
        Ok(Self::new(service))
    }

    pub fn new(service: Arc<MembershipService>) -> Self {
        Self {
            service,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.service
    }
}

impl Transport for UdpTransport {
    fn connect(&self) -> Result<Connection, TransportError> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(TransportError::AlreadyConnected);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        *tasks = self.service.start(inbound_tx);

        Ok(Connection {
            local_id: self.service.local_node.id.clone(),
            inbound: inbound_rx,
            views: self.service.subscribe(),
        })
    }

    fn send(&self, dst: &NodeId, payload: Vec<u8>) -> Result<(), TransportError> {
        let node = self
            .service
            .get_member(dst)
            .ok_or_else(|| TransportError::UnknownDestination(dst.clone()))?;
        if node.state == NodeState::Dead {
            return Err(TransportError::Disconnected(dst.clone()));
        }

        let datagram = Datagram::Data {
            from: self.service.local_node.id.clone(),
            payload,
        };
        let encoded = bincode::serialize(&datagram)?;
        if encoded.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: encoded.len(),
                limit: MAX_DATAGRAM_SIZE,
            });
        }

        self.service.try_send_bytes(&encoded, node.addr)?;
        Ok(())
    }

    fn disconnect(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return;
        }

        self.service.leave();
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}
