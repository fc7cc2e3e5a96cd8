use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use std::{net::SocketAddr, time::Duration};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use super::types::{Datagram, GossipMessage, MembershipView, Node, NodeId, NodeState};
use crate::transport::Inbound;

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Dead members are forgotten once silent this long.
pub(crate) const DEAD_RETENTION: Duration = Duration::from_secs(30);

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// SWIM-style gossip membership over UDP.
///
/// Keeps the member table current and publishes a new [`MembershipView`]
/// every time the set of non-dead members changes. View versions are a
/// local counter: two nodes agree on ownership because they agree on the
/// member set, not because their version numbers match.
pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    views: watch::Sender<Arc<MembershipView>>,
}

impl MembershipService {
    pub async fn new(bind_addr: SocketAddr, seed_nodes: Vec<SocketAddr>) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let incarnation_counter = Arc::new(RwLock::new(1));
        let current_inc = *incarnation_counter.read().await;
        let local_node = Node {
            id: NodeId::new(),
            addr: local_addr,
            state: NodeState::Alive,
            incarnation: current_inc,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        if !seed_nodes.is_empty() {
            info!("Joining cluster via {} seed node(s)", seed_nodes.len());

            for seed_node in seed_nodes.iter() {
                let msg = Datagram::Gossip(GossipMessage::Join {
                    node: local_node.clone(),
                });

                let encoded = bincode::serialize(&msg)?;
                socket.send_to(&encoded, seed_node).await?;
                info!("Sent join request to {}", seed_node);
            }
        }

        let (views, _) = watch::channel(Arc::new(MembershipView::new(
            1,
            [local_node.id.clone()],
        )));

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: incarnation_counter,
            views,
        }))
    }

    /// Spawns the gossip, receive and failure-detection loops.
    ///
    /// Store envelopes that arrive on the socket are handed to `inbound`.
    pub fn start(self: &Arc<Self>, inbound: mpsc::UnboundedSender<Inbound>) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting membership service...");

        let gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop(inbound).await;
            })
        };

        let failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        tracing::info!("All background tasks started");
        vec![gossip_handle, receive_handle, failure_detection_handle]
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MembershipView>> {
        self.views.subscribe()
    }

    pub fn current_view(&self) -> Arc<MembershipView> {
        self.views.borrow().clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_node.addr
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, node_id: &NodeId) -> Option<Node> {
        self.members.get(node_id).map(|entry| entry.value().clone())
    }

    /// Sends one datagram without waiting for socket readiness.
    pub fn try_send_datagram(&self, datagram: &Datagram, addr: SocketAddr) -> Result<usize> {
        let encoded = bincode::serialize(datagram)?;
        if encoded.len() > MAX_DATAGRAM_SIZE {
            anyhow::bail!(
                "datagram of {} bytes exceeds {} byte limit",
                encoded.len(),
                MAX_DATAGRAM_SIZE
            );
        }
        Ok(self.try_send_bytes(&encoded, addr)?)
    }

    pub(crate) fn try_send_bytes(&self, bytes: &[u8], addr: SocketAddr) -> std::io::Result<usize> {
        self.socket.try_send_to(bytes, addr)
    }

    /// Announces a clean departure to every live member.
    pub fn leave(&self) {
        let msg = Datagram::Gossip(GossipMessage::Leave {
            node_id: self.local_node.id.clone(),
        });

        for entry in self.members.iter() {
            let member = entry.value();
            if member.id == self.local_node.id || member.state == NodeState::Dead {
                continue;
            }
            if let Err(e) = self.try_send_datagram(&msg, member.addr) {
                tracing::warn!("Failed to send leave to {:?}: {}", member.id, e);
            }
        }

        tracing::info!("Left cluster as {}", self.local_node.id);
    }

    /// Publishes a new view if the set of non-dead members changed.
    pub(crate) fn refresh_view(&self) {
        let mut live: Vec<NodeId> = self
            .members
            .iter()
            .filter(|entry| entry.value().state != NodeState::Dead)
            .map(|entry| entry.key().clone())
            .collect();
        live.sort();

        self.views.send_if_modified(|current| {
            if current.members() == live.as_slice() {
                return false;
            }
            let next = MembershipView::new(current.version() + 1, live);
            tracing::info!("Membership view changed: {}", next);
            *current = Arc::new(next);
            true
        });
    }

    async fn send_gossip(&self, msg: GossipMessage, addr: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(&Datagram::Gossip(msg))?;
        self.socket.send_to(&encoded, addr).await?;
        Ok(())
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let alive_members: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && entry.value().state != NodeState::Dead
                })
                .map(|entry| entry.value().clone())
                .collect();

            if alive_members.is_empty() {
                continue;
            }

            let target = {
                use rand::Rng;
                let idx = rand::thread_rng().gen_range(0..alive_members.len());
                alive_members[idx].clone()
            };

            let incarnation = *self.incarnation.read().await;
            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation,
            };

            match self.send_gossip(msg, target.addr).await {
                Ok(()) => tracing::debug!("Sent ping to {:?}", target.id),
                Err(e) => tracing::warn!("Failed to send ping to {:?}: {}", target.id, e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, inbound: mpsc::UnboundedSender<Inbound>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<Datagram>(&buf[..len]) {
                    Ok(Datagram::Gossip(msg)) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                        self.refresh_view();
                    }
                    Ok(Datagram::Data { from, payload }) => {
                        if inbound.send(Inbound { from, payload }).is_err() {
                            tracing::debug!("Inbound receiver dropped, stopping receive loop");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                self.handle_ping(from, incarnation, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members).await?;
            }

            GossipMessage::Join { node } => {
                self.handle_join(node).await?;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await?;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation).await?;
            }

            GossipMessage::Leave { node_id } => {
                self.handle_leave(node_id);
            }
        }

        Ok(())
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        from_incarnation: u64,
        src: SocketAddr,
    ) -> Result<()> {
        tracing::debug!("Received ping from {:?}", from);

        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());

            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
        } else {
            tracing::info!("Discovered new member via ping: {:?} at {}", from, src);

            let new_node = Node {
                id: from.clone(),
                addr: src,
                state: NodeState::Alive,
                incarnation: from_incarnation,
                last_seen: Some(Instant::now()),
            };

            self.members.insert(new_node.id.clone(), new_node);
        }

        self.send_ack(src).await?;
        tracing::debug!("Sent ack to {:?} with {} members", from, self.members.len());

        Ok(())
    }

    async fn send_ack(&self, addr: SocketAddr) -> Result<()> {
        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let my_incarnation = *self.incarnation.read().await;
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };

        self.send_gossip(reply, addr).await
    }

    async fn handle_ack(
        &self,
        from: NodeId,
        from_incarnation: u64,
        members: Vec<Node>,
    ) -> Result<()> {
        tracing::debug!(
            "Received ack from {:?} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
        }

        for member in members {
            self.merge_member(member);
        }

        Ok(())
    }

    fn merge_member(&self, new_member: Node) {
        if new_member.id == self.local_node.id {
            return;
        }

        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    existing.state = new_member.state;
                    existing.incarnation = new_member.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if new_member.incarnation == existing.incarnation
                    && new_member.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{:?} refuted suspicion", new_member.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                if new_member.state == NodeState::Dead {
                    return;
                }
                tracing::info!(
                    "Discovered new member: {:?} at {}",
                    new_member.id,
                    new_member.addr
                );

                let mut member_with_timestamp = new_member;
                member_with_timestamp.last_seen = Some(Instant::now());

                self.members
                    .insert(member_with_timestamp.id.clone(), member_with_timestamp);
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        if node_id == self.local_node.id {
            let my_incarnation = {
                let mut inc = self.incarnation.write().await;
                *inc = (*inc).max(incarnation) + 1;
                *inc
            };
            tracing::info!("Refuting suspicion about self (inc={})", my_incarnation);

            if let Some(mut me) = self.members.get_mut(&node_id) {
                me.incarnation = my_incarnation;
            }

            let msg = GossipMessage::Alive {
                node_id,
                incarnation: my_incarnation,
            };
            self.broadcast_message(msg).await;
            return Ok(());
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Node {:?} at {} suspected", existing.id, existing.addr);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                }
            }
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
            }
        }

        Ok(())
    }

    async fn handle_alive(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    tracing::info!(
                        "Node {:?} at {} is now Alive (inc={})",
                        existing.id,
                        existing.addr,
                        incarnation
                    );
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!(
                        "Node {:?} at {} successfully refuted suspicion",
                        existing.id,
                        existing.addr,
                    );
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {:?}", node_id);
            }
        }

        Ok(())
    }

    async fn handle_join(&self, mut node: Node) -> Result<()> {
        tracing::info!("Node {:?} joining cluster at {}", node.id, node.addr);

        node.last_seen = Some(Instant::now());
        let addr = node.addr;
        self.members.insert(node.id.clone(), node);

        tracing::info!("Cluster size now: {}", self.members.len());

        self.send_ack(addr).await
    }

    fn handle_leave(&self, node_id: NodeId) {
        if let Some(mut member) = self.members.get_mut(&node_id) {
            tracing::info!("Node {:?} at {} left the cluster", member.id, member.addr);
            member.state = NodeState::Dead;
            member.last_seen = Some(Instant::now());
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive if elapsed > SUSPECT_TIMEOUT => {
                        tracing::warn!(
                            "Node {:?} suspected (no contact for {:?})",
                            member.id,
                            elapsed
                        );

                        member.state = NodeState::Suspect;
                        messages_to_broadcast.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    NodeState::Suspect if elapsed > DEAD_TIMEOUT => {
                        tracing::info!(
                            "Node {:?} declared DEAD (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = NodeState::Dead;
                    }
                    _ => {}
                }
            }

            for msg in messages_to_broadcast {
                self.broadcast_message(msg).await;
            }

            self.prune_dead(now);
            self.refresh_view();
        }
    }

    /// Drops members that have been dead for longer than [`DEAD_RETENTION`].
    pub(crate) fn prune_dead(&self, now: Instant) -> usize {
        let expired: Vec<NodeId> = self
            .members
            .iter()
            .filter(|entry| {
                let member = entry.value();
                member.state == NodeState::Dead
                    && member
                        .last_seen
                        .is_none_or(|seen| now.duration_since(seen) > DEAD_RETENTION)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            self.members.remove(id);
            tracing::debug!("Forgot dead member {:?}", id);
        }
        expired.len()
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        let targets: Vec<(NodeId, SocketAddr)> = self
            .members
            .iter()
            .filter(|entry| {
                entry.value().id != self.local_node.id && entry.value().state != NodeState::Dead
            })
            .map(|entry| (entry.value().id.clone(), entry.value().addr))
            .collect();

        for (id, addr) in targets {
            if let Err(e) = self.send_gossip(msg.clone(), addr).await {
                tracing::warn!("Failed to broadcast to {:?}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_membership_creation() {
        let bind_addr = "127.0.0.1:0".parse().unwrap();
        let seed_nodes = vec![];

        let service = MembershipService::new(bind_addr, seed_nodes)
            .await
            .expect("Failed to create service");

        assert_eq!(service.members.len(), 1);

        let members = service.get_alive_members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].state, NodeState::Alive);

        let view = service.current_view();
        assert_eq!(view.version(), 1);
        assert_eq!(view.members(), &[service.local_node.id.clone()]);
    }
}
