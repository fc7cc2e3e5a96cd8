use super::{Strategy, StrategyType};
use crate::error::{Result, StoreError};
use crate::membership::types::{MembershipView, NodeId};

/// Modulo placement over the members in view order.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    members: Vec<NodeId>,
}

impl RoundRobin {
    pub fn new(view: &MembershipView) -> Self {
        Self {
            members: view.members().to_vec(),
        }
    }
}

impl Strategy for RoundRobin {
    fn kind(&self) -> StrategyType {
        StrategyType::RoundRobin
    }

    fn lookup_hash(&self, hash: u64) -> Result<&NodeId> {
        if self.members.is_empty() {
            return Err(StoreError::EmptyView);
        }
        let index = (hash % self.members.len() as u64) as usize;
        Ok(&self.members[index])
    }
}
