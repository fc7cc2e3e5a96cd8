//! Key Placement Module
//!
//! Maps a key to the node that owns it under a given [`MembershipView`].
//!
//! ## Strategies
//! - **Consistent hashing** ([`ConsistentHashRing`]): nodes and keys share one `u64`
//!   ring; a key belongs to the first node position at or after its hash.
//!   A membership change only moves keys on the arc next to the changed node.
//! - **Round robin** ([`RoundRobin`]): `members[hash(key) % len]`. Nearly every key
//!   moves on a membership change; kept for comparison.
//!
//! A [`Placement`] is built wholesale from a view and never mutated afterwards,
//! so it can be shared behind an atomically swapped pointer.

pub mod ring;
pub mod round_robin;

#[cfg(test)]
mod tests;

pub use ring::ConsistentHashRing;
pub use round_robin::RoundRobin;

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::Result;
use crate::membership::types::{MembershipView, NodeId};

/// Hashes a key or node identifier into the shared placement space.
///
/// Uses the zero-keyed std hasher, so every node running the same build
/// computes the same value.
pub fn key_hash<H: Hash + ?Sized>(value: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyType {
    #[default]
    ConsistentHash,
    RoundRobin,
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyType::ConsistentHash => f.write_str("consistent-hash"),
            StrategyType::RoundRobin => f.write_str("round-robin"),
        }
    }
}

/// A placement function derived from one membership view.
pub trait Strategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyType;

    /// Owner of a pre-hashed key. Fails with `EmptyView` when there are no members.
    fn lookup_hash(&self, hash: u64) -> Result<&NodeId>;
}

/// The installed strategy together with the view it was built from.
#[derive(Debug)]
pub struct Placement {
    view: Arc<MembershipView>,
    strategy: Box<dyn Strategy>,
}

impl Placement {
    pub fn build(kind: StrategyType, view: Arc<MembershipView>, virtual_nodes: usize) -> Self {
        let strategy: Box<dyn Strategy> = match kind {
            StrategyType::ConsistentHash => {
                Box::new(ConsistentHashRing::new(&view, virtual_nodes))
            }
            StrategyType::RoundRobin => Box::new(RoundRobin::new(&view)),
        };
        Self { view, strategy }
    }

    pub fn view(&self) -> &Arc<MembershipView> {
        &self.view
    }

    pub fn version(&self) -> u64 {
        self.view.version()
    }

    pub fn kind(&self) -> StrategyType {
        self.strategy.kind()
    }

    pub fn lookup<K: Hash + ?Sized>(&self, key: &K) -> Result<&NodeId> {
        self.strategy.lookup_hash(key_hash(key))
    }
}
