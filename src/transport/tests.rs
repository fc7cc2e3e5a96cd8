//! Transport Module Tests
//!
//! ## Test Scopes
//! - **MemoryNetwork**: view publication on join/leave, delivery, isolation, error cases.
//! - **UdpTransport**: two gossiping endpoints agree on a view and exchange payloads.

#[cfg(test)]
mod tests {
    use crate::error::TransportError;
    use crate::membership::service::MAX_DATAGRAM_SIZE;
    use crate::membership::types::NodeId;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::udp::UdpTransport;
    use crate::transport::{Transport, TransportFactory};
    use std::time::{Duration, Instant};

    // ============================================================
    // MEMORY NETWORK
    // ============================================================

    #[tokio::test]
    async fn test_join_publishes_ordered_views_to_everyone() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id("g", NodeId::from("a"));
        let b = network.endpoint_with_id("g", NodeId::from("b"));

        let mut conn_a = a.connect().unwrap();
        assert_eq!(conn_a.views.borrow_and_update().version(), 1);

        let mut conn_b = b.connect().unwrap();
        let view_a = conn_a.views.borrow_and_update().clone();
        let view_b = conn_b.views.borrow_and_update().clone();

        assert_eq!(view_a, view_b);
        assert_eq!(view_a.version(), 2);
        assert_eq!(view_a.members(), &[NodeId::from("a"), NodeId::from("b")]);
        assert_eq!(conn_b.local_id, NodeId::from("b"));
    }

    #[tokio::test]
    async fn test_disconnect_publishes_shrunk_view() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id("g", NodeId::from("a"));
        let b = network.endpoint_with_id("g", NodeId::from("b"));

        let mut conn_a = a.connect().unwrap();
        let _conn_b = b.connect().unwrap();
        b.disconnect();

        let view = conn_a.views.borrow_and_update().clone();
        assert_eq!(view.version(), 3);
        assert_eq!(view.members(), &[NodeId::from("a")]);
        assert_eq!(network.members("g"), vec![NodeId::from("a")]);

        b.disconnect();
        assert_eq!(network.view("g").version(), 3, "second disconnect is a no-op");
    }

    #[tokio::test]
    async fn test_send_delivers_with_sender_identity() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id("g", NodeId::from("a"));
        let b = network.endpoint_with_id("g", NodeId::from("b"));

        let _conn_a = a.connect().unwrap();
        let mut conn_b = b.connect().unwrap();

        a.send(&NodeId::from("b"), vec![7, 7]).unwrap();

        let inbound = conn_b.inbound.recv().await.unwrap();
        assert_eq!(inbound.from, NodeId::from("a"));
        assert_eq!(inbound.payload, vec![7, 7]);
    }

    #[tokio::test]
    async fn test_frame_limit_rejects_large_payloads() {
        let network = MemoryNetwork::with_frame_limit(8);
        let a = network.endpoint_with_id("g", NodeId::from("a"));
        let b = network.endpoint_with_id("g", NodeId::from("b"));

        let _conn_a = a.connect().unwrap();
        let mut conn_b = b.connect().unwrap();

        assert_eq!(
            a.send(&NodeId::from("b"), vec![0; 9]),
            Err(TransportError::PayloadTooLarge { size: 9, limit: 8 })
        );
        a.send(&NodeId::from("b"), vec![1; 8]).unwrap();
        assert_eq!(conn_b.inbound.recv().await.unwrap().payload, vec![1; 8]);
    }

    #[tokio::test]
    async fn test_isolated_member_drops_traffic() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id("g", NodeId::from("a"));
        let b = network.endpoint_with_id("g", NodeId::from("b"));

        let _conn_a = a.connect().unwrap();
        let mut conn_b = b.connect().unwrap();

        assert!(network.isolate("g", &NodeId::from("b")));
        a.send(&NodeId::from("b"), vec![1]).unwrap();
        assert!(conn_b.inbound.try_recv().is_err());

        assert!(network.heal("g", &NodeId::from("b")));
        a.send(&NodeId::from("b"), vec![2]).unwrap();
        assert_eq!(conn_b.inbound.try_recv().unwrap().payload, vec![2]);

        assert!(!network.isolate("g", &NodeId::from("nobody")));
    }

    #[tokio::test]
    async fn test_send_errors() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id("g", NodeId::from("a"));

        assert_eq!(
            a.send(&NodeId::from("b"), vec![]),
            Err(TransportError::NotConnected)
        );

        let _conn = a.connect().unwrap();
        assert_eq!(
            a.send(&NodeId::from("b"), vec![]),
            Err(TransportError::UnknownDestination(NodeId::from("b")))
        );
        assert!(matches!(a.connect(), Err(TransportError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let network = MemoryNetwork::new();
        let first = TransportFactory::endpoint(&network, "first");
        let second = TransportFactory::endpoint(&network, "second");

        let conn_first = first.connect().unwrap();
        let conn_second = second.connect().unwrap();

        assert_eq!(conn_first.views.borrow().len(), 1);
        assert_eq!(conn_second.views.borrow().len(), 1);
        assert_eq!(
            first.send(&conn_second.local_id, vec![]),
            Err(TransportError::UnknownDestination(conn_second.local_id.clone()))
        );
    }

    // ============================================================
    // UDP TRANSPORT
    // ============================================================

    #[tokio::test]
    async fn test_udp_endpoints_converge_and_exchange_payloads() {
        let seed = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let seed_conn = seed.connect().unwrap();

        let joiner = UdpTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            vec![seed.membership().local_addr()],
        )
        .await
        .unwrap();
        let mut joiner_conn = joiner.connect().unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline
            && (seed_conn.views.borrow().len() < 2 || joiner_conn.views.borrow().len() < 2)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(seed_conn.views.borrow().len(), 2);
        assert_eq!(joiner_conn.views.borrow().len(), 2);

        seed.send(&joiner_conn.local_id, b"hello".to_vec()).unwrap();
        let inbound = tokio::time::timeout(Duration::from_secs(2), joiner_conn.inbound.recv())
            .await
            .expect("payload not delivered")
            .expect("inbound closed");
        assert_eq!(inbound.from, seed_conn.local_id);
        assert_eq!(inbound.payload, b"hello".to_vec());

        let oversized = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            seed.send(&joiner_conn.local_id, oversized),
            Err(TransportError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            seed.send(&NodeId::from("ghost"), vec![]),
            Err(TransportError::UnknownDestination(_))
        ));

        joiner.disconnect();
        seed.disconnect();
    }
}
