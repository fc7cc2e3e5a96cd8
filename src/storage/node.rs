use arc_swap::ArcSwap;
use std::sync::Arc;

use super::memory::LocalStore;
use super::pending::PendingRequests;
use super::protocol::Command;
use super::{StoreKey, StoreValue};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::membership::types::{MembershipView, NodeId};
use crate::placement::Placement;
use crate::transport::Transport;

/// State shared by the coordinator, the executor and the rebalancer of one
/// open store.
pub struct NodeContext<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    pub(crate) local_id: NodeId,
    pub(crate) config: StoreConfig,
    pub(crate) data: LocalStore<K, V>,
    pub(crate) placement: ArcSwap<Placement>,
    pub(crate) pending: PendingRequests<V>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl<K, V> NodeContext<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    pub fn new(
        config: StoreConfig,
        local_id: NodeId,
        transport: Arc<dyn Transport>,
        initial_view: Arc<MembershipView>,
    ) -> Self {
        let placement = Placement::build(config.strategy, initial_view, config.virtual_nodes);
        tracing::info!(
            "Store {} on {} installed initial view {} ({})",
            config.name,
            local_id,
            placement.view(),
            placement.kind()
        );

        Self {
            local_id,
            config,
            data: LocalStore::new(),
            placement: ArcSwap::from_pointee(placement),
            pending: PendingRequests::new(),
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// The installed placement. Callers keep a consistent snapshot even if a
    /// newer view is installed while they hold it.
    pub fn placement(&self) -> Arc<Placement> {
        self.placement.load_full()
    }

    pub fn owner_of(&self, key: &K) -> Result<NodeId> {
        Ok(self.placement.load().lookup(key)?.clone())
    }

    pub fn send_command(&self, dst: &NodeId, command: &Command<K, V>) -> Result<()> {
        let payload = command.encode()?;
        self.transport.send(dst, payload)?;
        Ok(())
    }
}
