//! Distributed Storage Module
//!
//! Implements a partitioned in-memory key-value store. Each key has exactly one
//! owner under the installed membership view; any node answers for any key.
//!
//! ## Core Concepts
//! - **Placement**: the installed [`Placement`](crate::placement::Placement) names the owner of a key.
//! - **Coordination**: [`Store`](store::Store) serves owned keys locally and forwards the
//!   rest as [`Command`](protocol::Command)s, parking the caller on a per-request promise.
//! - **Execution**: inbound Get/Put commands run one task each against the local map
//!   and answer with a Reply.
//! - **Rebalancing**: every new view rebuilds the placement and pushes entries this node
//!   no longer owns to their new owners, one Bulk-Transfer per destination.

pub mod coordinator;
pub mod executor;
pub mod handlers;
pub mod manager;
pub mod memory;
pub mod node;
pub mod pending;
pub mod protocol;
pub mod rebalancer;
pub mod store;


use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds every key type must satisfy.
pub trait StoreKey:
    Serialize + DeserializeOwned + Hash + Eq + Clone + Debug + Send + Sync + 'static
{
}

impl<T> StoreKey for T where
    T: Serialize + DeserializeOwned + Hash + Eq + Clone + Debug + Send + Sync + 'static
{
}

/// Bounds every value type must satisfy.
pub trait StoreValue: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{}
