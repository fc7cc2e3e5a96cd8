//! Membership Module Tests
//!
//! Validates the fundamental components of the cluster membership system.
//!
//! ## Test Scopes
//! - **Data Structures**: Ensures uniqueness of IDs and ordering guarantees of views.
//! - **Service Logic**: Verifies initialization, join/leave handling and view publication.
//! - **Gossip over UDP**: Two live services discover each other and exchange data datagrams.

#[cfg(test)]
mod tests {
    use crate::membership::service::{DEAD_RETENTION, MembershipService};
    use crate::membership::types::{
        Datagram, GossipMessage, MembershipView, Node, NodeId, NodeState,
    };
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    async fn wait_for_members(service: &MembershipService, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if service.current_view().len() == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        assert_ne!(id1, id2, "Each NodeId should be unique");
    }

    #[test]
    fn test_node_id_hash_and_order() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(NodeId::from("node-1"));
        set.insert(NodeId::from("node-1"));
        set.insert(NodeId::from("node-2"));
        assert_eq!(set.len(), 2, "HashSet should have 2 unique NodeIds");

        let mut ids = vec![NodeId::from("c"), NodeId::from("a"), NodeId::from("b")];
        ids.sort();
        assert_eq!(ids, vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]);
    }

    // ============================================================
    // MEMBERSHIP VIEW TESTS
    // ============================================================

    #[test]
    fn test_view_keeps_order_and_drops_duplicates() {
        let view = MembershipView::new(
            3,
            [
                NodeId::from("b"),
                NodeId::from("a"),
                NodeId::from("b"),
                NodeId::from("c"),
            ],
        );

        assert_eq!(view.version(), 3);
        assert_eq!(
            view.members(),
            &[NodeId::from("b"), NodeId::from("a"), NodeId::from("c")]
        );
        assert!(view.contains(&NodeId::from("a")));
        assert!(!view.contains(&NodeId::from("z")));
        assert_eq!(view.to_string(), "v3 [b, a, c]");
    }

    #[test]
    fn test_empty_view() {
        let view = MembershipView::empty();
        assert!(view.is_empty());
        assert_eq!(view.version(), 0);
        assert_eq!(view.to_string(), "v0 []");
    }

    // ============================================================
    // WIRE FORMAT
    // ============================================================

    #[test]
    fn test_leave_datagram_bincode() {
        let msg = Datagram::Gossip(GossipMessage::Leave {
            node_id: NodeId::from("leaving-node"),
        });

        let encoded = bincode::serialize(&msg).expect("Failed to serialize Leave");
        let decoded: Datagram = bincode::deserialize(&encoded).expect("Failed to deserialize");

        match decoded {
            Datagram::Gossip(GossipMessage::Leave { node_id }) => {
                assert_eq!(node_id.0, "leaving-node");
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_node_serialization_skips_last_seen() {
        let node = Node {
            id: NodeId::from("test-node"),
            addr: "192.168.1.1:5000".parse().unwrap(),
            state: NodeState::Alive,
            incarnation: 42,
            last_seen: Some(Instant::now()),
        };

        let json = serde_json::to_string(&node).expect("Serialization failed");
        let restored: Node = serde_json::from_str(&json).expect("Deserialization failed");

        assert_eq!(restored.id, node.id);
        assert_eq!(restored.addr, node.addr);
        assert_eq!(restored.incarnation, 42);
        assert!(restored.last_seen.is_none());
    }

    // ============================================================
    // MEMBERSHIP SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_membership_get_member() {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let service = MembershipService::new(bind_addr, vec![]).await.unwrap();

        let member = service.get_member(&service.local_node.id);
        assert!(member.is_some());
        assert_eq!(member.unwrap().id, service.local_node.id);

        assert!(service.get_member(&NodeId::from("non-existent")).is_none());
    }

    #[tokio::test]
    async fn test_join_and_leave_publish_views() {
        let service = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let other = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();

        let mut views = service.subscribe();
        let joiner = other.local_node.clone();

        service
            .handle_message(GossipMessage::Join { node: joiner.clone() }, joiner.addr)
            .await
            .unwrap();
        service.refresh_view();

        assert!(views.has_changed().unwrap());
        let view = views.borrow_and_update().clone();
        assert_eq!(view.version(), 2);
        assert_eq!(view.len(), 2);
        assert!(view.contains(&joiner.id));

        service
            .handle_message(
                GossipMessage::Leave {
                    node_id: joiner.id.clone(),
                },
                joiner.addr,
            )
            .await
            .unwrap();
        service.refresh_view();

        let view = views.borrow_and_update().clone();
        assert_eq!(view.version(), 3);
        assert_eq!(view.members(), &[service.local_node.id.clone()]);
    }

    #[tokio::test]
    async fn test_refresh_without_change_keeps_version() {
        let service = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();

        service.refresh_view();
        service.refresh_view();

        assert_eq!(service.current_view().version(), 1);
    }

    #[tokio::test]
    async fn test_departed_members_are_forgotten_after_retention() {
        let service = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let other = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let leaver = other.local_node.clone();

        service
            .handle_message(GossipMessage::Join { node: leaver.clone() }, leaver.addr)
            .await
            .unwrap();
        service
            .handle_message(
                GossipMessage::Leave {
                    node_id: leaver.id.clone(),
                },
                leaver.addr,
            )
            .await
            .unwrap();

        let now = Instant::now();
        assert_eq!(service.prune_dead(now), 0, "a fresh departure is retained");
        assert_eq!(
            service.get_member(&leaver.id).map(|node| node.state),
            Some(NodeState::Dead)
        );

        let later = now + DEAD_RETENTION + Duration::from_secs(1);
        assert_eq!(service.prune_dead(later), 1);
        assert!(service.get_member(&leaver.id).is_none());
        assert!(service.get_member(&service.local_node.id).is_some());
    }

    #[tokio::test]
    async fn test_two_services_discover_each_other() {
        let seed = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let (seed_tx, mut seed_rx) = mpsc::unbounded_channel();
        let seed_tasks = seed.start(seed_tx);

        let joiner = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![seed.local_addr()])
            .await
            .unwrap();
        let (joiner_tx, _joiner_rx) = mpsc::unbounded_channel();
        let joiner_tasks = joiner.start(joiner_tx);

        assert!(wait_for_members(&seed, 2).await, "seed never saw the joiner");
        assert!(wait_for_members(&joiner, 2).await, "joiner never saw the seed");
        assert_eq!(seed.current_view().members(), joiner.current_view().members());

        let datagram = Datagram::Data {
            from: joiner.local_node.id.clone(),
            payload: vec![1, 2, 3],
        };
        joiner.try_send_datagram(&datagram, seed.local_addr()).unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), seed_rx.recv())
            .await
            .expect("data datagram not delivered")
            .expect("inbound channel closed");
        assert_eq!(inbound.from, joiner.local_node.id);
        assert_eq!(inbound.payload, vec![1, 2, 3]);

        for handle in seed_tasks.into_iter().chain(joiner_tasks) {
            handle.abort();
        }
    }
}
