use std::collections::BTreeMap;

use super::{Strategy, StrategyType, key_hash};
use crate::error::{Result, StoreError};
use crate::membership::types::{MembershipView, NodeId};

/// Consistent-hash ring: ring position -> owning node.
#[derive(Debug, Clone, Default)]
pub struct ConsistentHashRing {
    ring: BTreeMap<u64, NodeId>,
}

impl ConsistentHashRing {
    /// Places every member of `view` on the ring `virtual_nodes` times
    /// (at least once).
    ///
    /// Two positions that hash to the same slot go to the smaller node id so
    /// the result does not depend on member order.
    pub fn new(view: &MembershipView, virtual_nodes: usize) -> Self {
        let mut ring = BTreeMap::new();
        for member in view.members() {
            for replica in 0..virtual_nodes.max(1) {
                let position = key_hash(&(member, replica as u32));
                ring.entry(position)
                    .and_modify(|owner: &mut NodeId| {
                        if *member < *owner {
                            *owner = member.clone();
                        }
                    })
                    .or_insert_with(|| member.clone());
            }
        }
        Self { ring }
    }

    pub fn positions(&self) -> impl Iterator<Item = (&u64, &NodeId)> {
        self.ring.iter()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl Strategy for ConsistentHashRing {
    fn kind(&self) -> StrategyType {
        StrategyType::ConsistentHash
    }

    fn lookup_hash(&self, hash: u64) -> Result<&NodeId> {
        // successor rule, wrapping to the lowest position
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node)
            .ok_or(StoreError::EmptyView)
    }
}
