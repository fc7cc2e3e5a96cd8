use parking_lot::Mutex;
use std::sync::Arc;

use super::store::Store;
use super::{StoreKey, StoreValue};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::placement::StrategyType;
use crate::transport::TransportFactory;
use crate::transport::memory::MemoryNetwork;

/// Group joined by [`StoreManager::new_store`].
pub const DEFAULT_STORE: &str = "__kvstore";

/// Type-erased handle so one manager can close stores of any key/value types.
pub trait ManagedStore: Send + Sync {
    fn name(&self) -> &str;
    fn close(&self);
}

impl<K, V> ManagedStore for Store<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    fn name(&self) -> &str {
        Store::name(self)
    }

    fn close(&self) {
        Store::close(self)
    }
}

/// Creates stores on one substrate and closes all of them on [`stop`](Self::stop).
pub struct StoreManager {
    factory: Arc<dyn TransportFactory>,
    stores: Mutex<Vec<Arc<dyn ManagedStore>>>,
}

impl StoreManager {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            stores: Mutex::new(Vec::new()),
        }
    }

    /// A manager whose stores live on a private in-process network.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryNetwork::new()))
    }

    pub fn new_store<K, V>(&self) -> Result<Arc<Store<K, V>>>
    where
        K: StoreKey,
        V: StoreValue,
    {
        self.new_store_with(DEFAULT_STORE, StrategyType::ConsistentHash)
    }

    pub fn new_store_with<K, V>(
        &self,
        name: &str,
        strategy: StrategyType,
    ) -> Result<Arc<Store<K, V>>>
    where
        K: StoreKey,
        V: StoreValue,
    {
        let config = StoreConfig::default()
            .with_name(name)
            .with_strategy(strategy);
        self.open_store(config)
    }

    /// Opens a store joining the group named by `config.name`.
    pub fn open_store<K, V>(&self, config: StoreConfig) -> Result<Arc<Store<K, V>>>
    where
        K: StoreKey,
        V: StoreValue,
    {
        let transport = self.factory.endpoint(&config.name);
        let store = Arc::new(Store::new(config, transport));
        store.open()?;

        self.stores.lock().push(store.clone());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }

    /// Closes every store this manager created.
    pub fn stop(&self) {
        let stores: Vec<_> = self.stores.lock().drain(..).collect();
        for store in stores {
            tracing::info!("Stopping store {}", store.name());
            store.close();
        }
    }
}
