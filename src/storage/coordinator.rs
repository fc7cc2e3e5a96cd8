//! Request Coordinator
//!
//! Decides per key whether to answer from the Local Store or to proxy the
//! request to its owner. Remote calls park the caller on a oneshot promise
//! that the executor resolves when the matching Reply arrives.

use super::node::NodeContext;
use super::protocol::{Command, CommandTag, RequestId};
use super::{StoreKey, StoreValue};
use crate::error::{Result, StoreError};
use crate::membership::types::NodeId;

impl<K, V> NodeContext<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let owner = self.owner_of(key)?;

        if owner == self.local_id {
            tracing::debug!("GET {:?}: served locally", key);
            return Ok(self.data.get(key));
        }

        tracing::debug!("GET {:?}: forwarding to {}", key, owner);
        self.remote_call(owner, CommandTag::Get, |request_id| Command::Get {
            request_id,
            key: key.clone(),
        })
        .await
    }

    /// Stores `value` under `key` and returns the previous value.
    pub async fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let owner = self.owner_of(&key)?;

        if owner == self.local_id {
            tracing::debug!("PUT {:?}: stored locally", key);
            return Ok(self.data.insert(key, value));
        }

        tracing::debug!("PUT {:?}: forwarding to {}", key, owner);
        self.remote_call(owner, CommandTag::Put, move |request_id| Command::Put {
            request_id,
            key,
            value,
        })
        .await
    }

    async fn remote_call(
        &self,
        owner: NodeId,
        tag: CommandTag,
        build: impl FnOnce(RequestId) -> Command<K, V>,
    ) -> Result<Option<V>> {
        let timeout = self.config.request_timeout();
        let (request_id, reply) = self.pending.register(owner.clone(), tag);
        let command = build(request_id);

        match self.send_command(&owner, &command) {
            Ok(()) => {}
            Err(StoreError::Transport(e)) => {
                self.pending.discard(request_id);
                tracing::error!("Failed to send {} {} to {}: {}", tag, request_id, owner, e);
                return Err(StoreError::RequestTimeout {
                    owner,
                    request_id,
                    timeout,
                });
            }
            Err(e) => {
                self.pending.discard(request_id);
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => {
                self.pending.discard(request_id);
                tracing::warn!(
                    "{} {} to {} timed out after {:?}",
                    tag,
                    request_id,
                    owner,
                    timeout
                );
                Err(StoreError::RequestTimeout {
                    owner,
                    request_id,
                    timeout,
                })
            }
        }
    }
}
