//! Store lifecycle and client API.
//!
//! A [`Store`] is closed until [`open`](Store::open) joins its group through the
//! transport. While open it owns two background tasks: the inbound command loop
//! and the view loop. Client calls take a snapshot of the running state and never
//! hold the lifecycle lock across a suspension point.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::executor::run_inbound_loop;
use super::node::NodeContext;
use super::rebalancer::{self, run_view_loop};
use super::{StoreKey, StoreValue};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::membership::types::{MembershipView, NodeId};
use crate::placement::StrategyType;
use crate::transport::Transport;

struct Running<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    ctx: Arc<NodeContext<K, V>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Store<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    config: StoreConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<Option<Running<K, V>>>,
}

/// Point-in-time description of one store node.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub local_id: NodeId,
    pub strategy: StrategyType,
    pub view_version: u64,
    pub members: Vec<NodeId>,
    pub local_entries: usize,
    pub pending_requests: usize,
}

impl<K, V> Store<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    pub fn new(config: StoreConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Joins the group and starts serving. Opening an open store does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            tracing::debug!("Store {} is already open", self.config.name);
            return Ok(());
        }

        let mut connection = self.transport.connect().map_err(StoreError::Join)?;
        let initial_view = connection.views.borrow_and_update().clone();

        let ctx = Arc::new(NodeContext::new(
            self.config.clone(),
            connection.local_id,
            Arc::clone(&self.transport),
            initial_view,
        ));

        let tasks = vec![
            tokio::spawn(run_inbound_loop(Arc::clone(&ctx), connection.inbound)),
            tokio::spawn(run_view_loop(Arc::clone(&ctx), connection.views)),
        ];

        tracing::info!("Store {} opened on {}", self.config.name, ctx.local_id);
        *state = Some(Running { ctx, tasks });
        Ok(())
    }

    /// Leaves the group. Idempotent.
    ///
    /// Local entries are handed to the remaining members first when
    /// `handoff_on_close` is set. Callers still waiting on a remote reply
    /// fail with `Closed`.
    pub fn close(&self) {
        let Some(running) = self.state.lock().take() else {
            return;
        };

        for task in &running.tasks {
            task.abort();
        }

        if self.config.handoff_on_close {
            rebalancer::handoff(&running.ctx);
        }

        self.transport.disconnect();
        running.ctx.pending.clear();
        tracing::info!(
            "Store {} closed on {}",
            self.config.name,
            running.ctx.local_id
        );
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_some()
    }

    fn context(&self) -> Result<Arc<NodeContext<K, V>>> {
        self.state
            .lock()
            .as_ref()
            .map(|running| Arc::clone(&running.ctx))
            .ok_or(StoreError::NotOpen)
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let ctx = self.context()?;
        ctx.get(key).await
    }

    /// Returns the value `key` held before this write.
    pub async fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let ctx = self.context()?;
        ctx.put(key, value).await
    }

    pub fn local_id(&self) -> Result<NodeId> {
        Ok(self.context()?.local_id.clone())
    }

    pub fn view(&self) -> Result<Arc<MembershipView>> {
        Ok(Arc::clone(self.context()?.placement().view()))
    }

    pub fn owner_of(&self, key: &K) -> Result<NodeId> {
        self.context()?.owner_of(key)
    }

    /// Entries held by this node. Zero while closed.
    pub fn local_len(&self) -> usize {
        self.context().map(|ctx| ctx.data.len()).unwrap_or(0)
    }

    pub fn contains_local(&self, key: &K) -> bool {
        self.context()
            .map(|ctx| ctx.data.contains(key))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let ctx = self.context()?;
        let placement = ctx.placement();

        Ok(StoreStats {
            name: self.config.name.clone(),
            local_id: ctx.local_id.clone(),
            strategy: placement.kind(),
            view_version: placement.version(),
            members: placement.view().members().to_vec(),
            local_entries: ctx.data.len(),
            pending_requests: ctx.pending.len(),
        })
    }
}

impl<K, V> Drop for Store<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    fn drop(&mut self) {
        self.close();
    }
}

/// `Store#name{k=v, ...}` over the entries held locally.
impl<K, V> fmt::Display for Store<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store#{}{{", self.config.name)?;
        if let Ok(ctx) = self.context() {
            for (i, (key, value)) in ctx.data.snapshot().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{:?}={:?}", key, value)?;
            }
        }
        f.write_str("}")
    }
}
