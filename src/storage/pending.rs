//! Correlation of remote requests with their replies.
//!
//! Each outstanding Get/Put owns one slot keyed by its [`RequestId`]. A Reply
//! resolves exactly the slot it names, so concurrent requests from one node
//! never observe each other's answers.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;

use super::protocol::{CommandTag, RequestId};
use crate::error::{Result, StoreError};
use crate::membership::types::NodeId;

struct PendingSlot<V> {
    owner: NodeId,
    tag: CommandTag,
    issued_at: Instant,
    reply: oneshot::Sender<Option<V>>,
}

pub struct PendingRequests<V> {
    next_id: AtomicU64,
    slots: DashMap<RequestId, PendingSlot<V>>,
}

impl<V> Default for PendingRequests<V> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: DashMap::new(),
        }
    }
}

impl<V> PendingRequests<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id and parks a promise under it.
    pub fn register(
        &self,
        owner: NodeId,
        tag: CommandTag,
    ) -> (RequestId, oneshot::Receiver<Option<V>>) {
        let request_id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        self.slots.insert(
            request_id,
            PendingSlot {
                owner,
                tag,
                issued_at: Instant::now(),
                reply: tx,
            },
        );
        (request_id, rx)
    }

    /// Completes the request named by a Reply. Never blocks.
    pub fn resolve(&self, from: &NodeId, request_id: RequestId, value: Option<V>) -> Result<()> {
        let (_, slot) = self
            .slots
            .remove(&request_id)
            .ok_or(StoreError::UnmatchedReply(request_id))?;

        if &slot.owner != from {
            tracing::warn!(
                "Reply {} for {} came from {}, expected {}",
                request_id,
                slot.tag,
                from,
                slot.owner
            );
        }
        tracing::debug!(
            "Resolved {} {} after {:?}",
            slot.tag,
            request_id,
            slot.issued_at.elapsed()
        );

        // The caller may have timed out in the meantime.
        let _ = slot.reply.send(value);
        Ok(())
    }

    pub fn discard(&self, request_id: RequestId) -> bool {
        self.slots.remove(&request_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every promise; waiting callers observe `Closed`.
    pub fn clear(&self) {
        self.slots.clear();
    }
}
