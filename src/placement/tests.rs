//! Placement Module Tests
//!
//! ## Test Scopes
//! - **Determinism**: identical views produce identical ownership on independent instances.
//! - **Ring semantics**: successor rule with wrap-around, movement only towards a new node.
//! - **Round robin**: modulo indexing and spread across members.
//! - **Comparison**: consistent hashing moves fewer keys than round robin on a join.

#[cfg(test)]
mod tests {
    use crate::error::StoreError;
    use crate::membership::types::{MembershipView, NodeId};
    use crate::placement::{
        ConsistentHashRing, Placement, RoundRobin, Strategy, StrategyType, key_hash,
    };
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn view(version: u64, names: &[&str]) -> Arc<MembershipView> {
        Arc::new(MembershipView::new(
            version,
            names.iter().map(|name| NodeId::from(*name)),
        ))
    }

    fn owners(placement: &Placement, keys: impl Iterator<Item = u64>) -> HashMap<u64, NodeId> {
        keys.map(|k| (k, placement.lookup(&k).unwrap().clone()))
            .collect()
    }

    // ============================================================
    // SHARED CONTRACT
    // ============================================================

    #[test]
    fn test_empty_view_fails_for_both_strategies() {
        let empty = Arc::new(MembershipView::empty());

        for kind in [StrategyType::ConsistentHash, StrategyType::RoundRobin] {
            let placement = Placement::build(kind, empty.clone(), 1);
            assert_eq!(placement.lookup(&42u64), Err(StoreError::EmptyView));
        }
    }

    #[test]
    fn test_same_view_same_owner_on_every_instance() {
        for kind in [StrategyType::ConsistentHash, StrategyType::RoundRobin] {
            let a = Placement::build(kind, view(7, &["n1", "n2", "n3"]), 1);
            let b = Placement::build(kind, view(7, &["n1", "n2", "n3"]), 1);

            assert_eq!(a.kind(), kind);
            assert_eq!(a.version(), 7);
            assert_eq!(owners(&a, 0..1000), owners(&b, 0..1000));
        }
    }

    #[test]
    fn test_single_member_owns_everything() {
        for kind in [StrategyType::ConsistentHash, StrategyType::RoundRobin] {
            let placement = Placement::build(kind, view(1, &["solo"]), 4);
            for key in 0..100u64 {
                assert_eq!(placement.lookup(&key).unwrap(), &NodeId::from("solo"));
            }
        }
    }

    #[test]
    fn test_strategy_type_names() {
        assert_eq!(StrategyType::ConsistentHash.to_string(), "consistent-hash");
        assert_eq!(StrategyType::RoundRobin.to_string(), "round-robin");
        assert_eq!(StrategyType::default(), StrategyType::ConsistentHash);
    }

    // ============================================================
    // CONSISTENT HASH RING
    // ============================================================

    #[test]
    fn test_ring_has_one_position_per_virtual_node() {
        let ring = ConsistentHashRing::new(&view(1, &["n1", "n2", "n3"]), 8);
        assert_eq!(ring.len(), 24);

        let ring = ConsistentHashRing::new(&view(1, &["n1", "n2"]), 0);
        assert_eq!(ring.len(), 2, "zero virtual nodes still places each member once");
    }

    #[test]
    fn test_ring_wraps_past_highest_position() {
        let ring = ConsistentHashRing::new(&view(1, &["n1", "n2", "n3"]), 1);
        let (_, lowest_owner) = ring.positions().next().unwrap();

        assert_eq!(ring.lookup_hash(u64::MAX).unwrap(), lowest_owner);
    }

    #[test]
    fn test_ring_join_only_moves_keys_to_new_node() {
        let before = Placement::build(StrategyType::ConsistentHash, view(1, &["n1", "n2", "n3"]), 1);
        let after = Placement::build(
            StrategyType::ConsistentHash,
            view(2, &["n1", "n2", "n3", "n4"]),
            1,
        );

        for key in 0..2000u64 {
            let old = before.lookup(&key).unwrap();
            let new = after.lookup(&key).unwrap();
            if old != new {
                assert_eq!(new, &NodeId::from("n4"), "key {} moved between old members", key);
            }
        }
    }

    #[test]
    fn test_ring_moves_fewer_keys_than_round_robin() {
        let moved = |kind: StrategyType| {
            let before = Placement::build(kind, view(1, &["n1", "n2", "n3"]), 64);
            let after = Placement::build(kind, view(2, &["n1", "n2", "n3", "n4"]), 64);
            (0..1000u64)
                .filter(|k| before.lookup(k).unwrap() != after.lookup(k).unwrap())
                .count()
        };

        let ring_moved = moved(StrategyType::ConsistentHash);
        let round_robin_moved = moved(StrategyType::RoundRobin);

        assert!(
            ring_moved < round_robin_moved,
            "ring moved {} keys, round robin moved {}",
            ring_moved,
            round_robin_moved
        );
    }

    // ============================================================
    // ROUND ROBIN
    // ============================================================

    #[test]
    fn test_round_robin_follows_view_order() {
        let forward = RoundRobin::new(&view(1, &["a", "b", "c"]));
        let reversed = RoundRobin::new(&view(1, &["c", "b", "a"]));

        assert_eq!(forward.lookup_hash(0).unwrap(), &NodeId::from("a"));
        assert_eq!(reversed.lookup_hash(0).unwrap(), &NodeId::from("c"));
        assert_eq!(forward.lookup_hash(4).unwrap(), &NodeId::from("b"));
    }

    #[test]
    fn test_round_robin_spreads_keys() {
        let placement = Placement::build(StrategyType::RoundRobin, view(1, &["a", "b", "c", "d"]), 1);

        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for key in 0..10_000u64 {
            *counts.entry(placement.lookup(&key).unwrap().clone()).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 4);
        for (node, count) in counts {
            assert!(
                (2000..3000).contains(&count),
                "{} received {} of 10000 keys",
                node,
                count
            );
        }
    }

    // ============================================================
    // PROPERTIES
    // ============================================================

    proptest! {
        #[test]
        fn prop_ring_lookup_is_successor(hash in any::<u64>(), vnodes in 1usize..8) {
            let ring = ConsistentHashRing::new(&view(1, &["n1", "n2", "n3", "n4"]), vnodes);

            let expected = ring
                .positions()
                .find(|(position, _)| **position >= hash)
                .or_else(|| ring.positions().next())
                .map(|(_, node)| node.clone())
                .unwrap();

            prop_assert_eq!(ring.lookup_hash(hash).unwrap(), &expected);
        }

        #[test]
        fn prop_round_robin_is_modulo(key in any::<u64>(), size in 1usize..10) {
            let names: Vec<String> = (0..size).map(|i| format!("n{}", i)).collect();
            let members: Vec<NodeId> = names.iter().map(|n| NodeId::from(n.as_str())).collect();
            let placement = Placement::build(
                StrategyType::RoundRobin,
                Arc::new(MembershipView::new(1, members.clone())),
                1,
            );

            let expected = &members[(key_hash(&key) % size as u64) as usize];
            prop_assert_eq!(placement.lookup(&key).unwrap(), expected);
        }
    }
}
