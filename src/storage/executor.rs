//! Command Executor
//!
//! Drains the inbound queue of one store. Get and Put each run on their own
//! task; Reply and Bulk-Transfer are handled inline since neither suspends.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::node::NodeContext;
use super::protocol::Command;
use super::rebalancer;
use super::{StoreKey, StoreValue};
use crate::error::StoreError;
use crate::membership::types::NodeId;
use crate::transport::Inbound;

pub async fn run_inbound_loop<K, V>(
    ctx: Arc<NodeContext<K, V>>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) where
    K: StoreKey,
    V: StoreValue,
{
    while let Some(Inbound { from, payload }) = inbound.recv().await {
        dispatch(&ctx, from, &payload);
    }
    tracing::debug!("Inbound queue of store {} closed", ctx.name());
}

pub fn dispatch<K, V>(ctx: &Arc<NodeContext<K, V>>, from: NodeId, payload: &[u8])
where
    K: StoreKey,
    V: StoreValue,
{
    let command = match Command::<K, V>::decode(payload) {
        Ok(command) => command,
        Err(StoreError::UnsupportedCommand(tag)) => {
            tracing::warn!("Dropping command with unsupported tag {} from {}", tag, from);
            return;
        }
        Err(e) => {
            tracing::warn!("Dropping undecodable payload from {}: {}", from, e);
            return;
        }
    };

    match command {
        request @ (Command::Get { .. } | Command::Put { .. }) => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                execute(&ctx, from, request);
            });
        }
        other => execute(ctx, from, other),
    }
}

/// Applies one command to the local node, replying to `from` where the
/// command asks for an answer.
pub fn execute<K, V>(ctx: &NodeContext<K, V>, from: NodeId, command: Command<K, V>)
where
    K: StoreKey,
    V: StoreValue,
{
    let reply = match command {
        Command::Get { request_id, key } => Command::Reply {
            request_id,
            value: ctx.data.get(&key),
        },
        Command::Put {
            request_id,
            key,
            value,
        } => Command::Reply {
            request_id,
            value: ctx.data.insert(key, value),
        },
        Command::Reply { request_id, value } => {
            if let Err(e) = ctx.pending.resolve(&from, request_id, value) {
                tracing::warn!("Dropping reply from {}: {}", from, e);
            }
            return;
        }
        Command::BulkTransfer {
            view_version,
            members,
            entries,
        } => {
            rebalancer::merge_transfer(ctx, &from, view_version, &members, entries);
            return;
        }
    };

    if let Err(e) = ctx.send_command(&from, &reply) {
        tracing::error!("Failed to reply to {}: {}", from, e);
    }
}
