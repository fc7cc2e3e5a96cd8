//! Store configuration, loadable from TOML.
//!
//! ```toml
//! name = "__kvstore"
//! strategy = "round-robin"
//! request_timeout_ms = 500
//! transfer_batch_size = 256
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::placement::StrategyType;
use crate::storage::manager::DEFAULT_STORE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Group joined by every node of this store.
    pub name: String,
    pub strategy: StrategyType,
    /// Upper bound on the wait for a remote Reply.
    pub request_timeout_ms: u64,
    /// Ring positions per member for consistent hashing.
    pub virtual_nodes: usize,
    /// Maximum entries per Bulk-Transfer. `None` sends one message per destination.
    pub transfer_batch_size: Option<usize>,
    /// Push local entries to the remaining members on close.
    pub handoff_on_close: bool,
    /// Period of the pass that re-ships entries held by the wrong node. 0 disables it.
    pub reconcile_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE.to_string(),
            strategy: StrategyType::ConsistentHash,
            request_timeout_ms: 2000,
            virtual_nodes: 1,
            transfer_batch_size: None,
            handoff_on_close: true,
            reconcile_interval_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid store configuration")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_ms > 0).then(|| Duration::from_millis(self.reconcile_interval_ms))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyType) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_virtual_nodes(mut self, virtual_nodes: usize) -> Self {
        self.virtual_nodes = virtual_nodes.max(1);
        self
    }

    pub fn with_transfer_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.transfer_batch_size = batch_size;
        self
    }

    pub fn with_handoff_on_close(mut self, handoff: bool) -> Self {
        self.handoff_on_close = handoff;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconcile_interval_ms = interval.map_or(0, |period| period.as_millis() as u64);
        self
    }
}
