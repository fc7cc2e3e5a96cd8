//! In-process group substrate.
//!
//! Every named group keeps its members in join order. Joining or leaving
//! bumps the group version and pushes the new view to every member, so all
//! members observe the same sequence of views. A member can be isolated to
//! simulate a crashed node that the group has not noticed yet: it stays in
//! the view but everything sent to or from it is dropped.
//!
//! A network may also cap payload size, standing in for the frame limit of a
//! datagram transport.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::{Connection, Inbound, Transport, TransportFactory};
use crate::error::TransportError;
use crate::membership::types::{MembershipView, NodeId};

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    groups: HashMap<String, Group>,
    frame_limit: Option<usize>,
}

#[derive(Default)]
struct Group {
    version: u64,
    members: Vec<Member>,
}

struct Member {
    id: NodeId,
    inbound: mpsc::UnboundedSender<Inbound>,
    views: watch::Sender<Arc<MembershipView>>,
    isolated: bool,
}

impl Group {
    fn member(&self, id: &NodeId) -> Option<&Member> {
        self.members.iter().find(|member| &member.id == id)
    }

    fn member_mut(&mut self, id: &NodeId) -> Option<&mut Member> {
        self.members.iter_mut().find(|member| &member.id == id)
    }

    fn current_view(&self) -> MembershipView {
        MembershipView::new(
            self.version,
            self.members.iter().map(|member| member.id.clone()),
        )
    }

    fn publish(&mut self, group_name: &str) {
        self.version += 1;
        let view = Arc::new(self.current_view());
        tracing::debug!("Group {} installed view {}", group_name, view);

        for member in &self.members {
            member.views.send_replace(view.clone());
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A network that rejects payloads larger than `limit` bytes.
    pub fn with_frame_limit(limit: usize) -> Self {
        let network = Self::default();
        network.state.lock().frame_limit = Some(limit);
        network
    }

    /// Creates an endpoint with a fresh random identity.
    pub fn new_endpoint(&self, group: &str) -> MemoryEndpoint {
        self.endpoint_with_id(group, NodeId::new())
    }

    pub fn endpoint_with_id(&self, group: &str, id: NodeId) -> MemoryEndpoint {
        MemoryEndpoint {
            network: self.clone(),
            group: group.to_string(),
            id,
        }
    }

    pub fn members(&self, group: &str) -> Vec<NodeId> {
        self.state
            .lock()
            .groups
            .get(group)
            .map(|g| g.members.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn view(&self, group: &str) -> MembershipView {
        self.state
            .lock()
            .groups
            .get(group)
            .map(Group::current_view)
            .unwrap_or_default()
    }

    /// Silently drops all traffic to and from `id` until [`heal`](Self::heal).
    pub fn isolate(&self, group: &str, id: &NodeId) -> bool {
        self.set_isolated(group, id, true)
    }

    pub fn heal(&self, group: &str, id: &NodeId) -> bool {
        self.set_isolated(group, id, false)
    }

    fn set_isolated(&self, group: &str, id: &NodeId, isolated: bool) -> bool {
        let mut state = self.state.lock();
        match state.groups.get_mut(group).and_then(|g| g.member_mut(id)) {
            Some(member) => {
                member.isolated = isolated;
                tracing::info!("Node {} isolated={} in group {}", id, isolated, group);
                true
            }
            None => false,
        }
    }
}

impl TransportFactory for MemoryNetwork {
    fn endpoint(&self, group: &str) -> Arc<dyn Transport> {
        Arc::new(self.new_endpoint(group))
    }
}

/// One member's handle on a [`MemoryNetwork`] group.
pub struct MemoryEndpoint {
    network: MemoryNetwork,
    group: String,
    id: NodeId,
}

impl MemoryEndpoint {
    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

impl Transport for MemoryEndpoint {
    fn connect(&self) -> Result<Connection, TransportError> {
        let mut state = self.network.state.lock();
        let group = state.groups.entry(self.group.clone()).or_default();
        if group.member(&self.id).is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (views_tx, views_rx) = watch::channel(Arc::new(MembershipView::empty()));
        group.members.push(Member {
            id: self.id.clone(),
            inbound: inbound_tx,
            views: views_tx,
            isolated: false,
        });
        group.publish(&self.group);

        tracing::info!("Node {} joined group {}", self.id, self.group);

        Ok(Connection {
            local_id: self.id.clone(),
            inbound: inbound_rx,
            views: views_rx,
        })
    }

    fn send(&self, dst: &NodeId, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.network.state.lock();
        let group = state
            .groups
            .get(&self.group)
            .ok_or(TransportError::NotConnected)?;
        let me = group.member(&self.id).ok_or(TransportError::NotConnected)?;
        let target = group
            .member(dst)
            .ok_or_else(|| TransportError::UnknownDestination(dst.clone()))?;

        if let Some(limit) = state.frame_limit
            && payload.len() > limit
        {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        if me.isolated || target.isolated {
            tracing::trace!("Dropping {} bytes from {} to {}", payload.len(), self.id, dst);
            return Ok(());
        }

        target
            .inbound
            .send(Inbound {
                from: self.id.clone(),
                payload,
            })
            .map_err(|_| TransportError::Disconnected(dst.clone()))
    }

    fn disconnect(&self) {
        let mut state = self.network.state.lock();
        let Some(group) = state.groups.get_mut(&self.group) else {
            return;
        };

        let before = group.members.len();
        group.members.retain(|member| member.id != self.id);
        if group.members.len() != before {
            group.publish(&self.group);
            tracing::info!("Node {} left group {}", self.id, self.group);
        }
    }
}
