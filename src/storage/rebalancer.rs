//! Rebalancer
//!
//! Reacts to membership views. Every newer view replaces the placement
//! wholesale, then runs a two-phase pass over the Local Store:
//! 1. **Plan**: collect the keys whose owner changed, grouped by new owner.
//! 2. **Ship**: remove each planned key and send its *current* value to the new
//!    owner in Bulk-Transfer messages.
//!
//! Between views a periodic reconcile pass re-runs the same two phases against
//! the installed placement, which picks up entries left behind by failed or
//! partially forwarded transfers.
//!
//! Transfers are push-only. A key is absent from every node while its batch is
//! in flight, and callers are expected to retry.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use super::memory::LocalStore;
use super::node::NodeContext;
use super::protocol::Command;
use super::{StoreKey, StoreValue};
use crate::error::{StoreError, TransportError};
use crate::membership::types::{MembershipView, NodeId};
use crate::placement::Placement;

/// Outcome of one rebalance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    pub view_version: u64,
    pub retained: usize,
    /// Entries shipped per destination.
    pub moved: BTreeMap<NodeId, usize>,
    /// Entries kept back because their batch could not be sent.
    pub failed: usize,
}

impl RebalanceReport {
    pub fn total_moved(&self) -> usize {
        self.moved.values().sum()
    }
}

/// Keys this node must give away under a new placement.
#[derive(Debug)]
pub struct MigrationPlan<K> {
    pub view_version: u64,
    /// Member set the plan was computed against, sent along with every batch.
    pub members: Vec<NodeId>,
    pub retained: usize,
    pub moves: HashMap<NodeId, Vec<K>>,
}

/// Phase one: decides, without mutating anything, which keys leave this node.
pub fn plan_migration<K, V>(
    data: &LocalStore<K, V>,
    placement: &Placement,
    local_id: &NodeId,
) -> MigrationPlan<K>
where
    K: StoreKey,
    V: StoreValue,
{
    let mut plan = MigrationPlan {
        view_version: placement.version(),
        members: placement.view().members().to_vec(),
        retained: 0,
        moves: HashMap::new(),
    };

    for key in data.keys() {
        match placement.lookup(&key) {
            Ok(owner) if owner != local_id => {
                plan.moves.entry(owner.clone()).or_default().push(key);
            }
            Ok(_) => plan.retained += 1,
            Err(StoreError::EmptyView) => plan.retained += 1,
            Err(e) => {
                tracing::warn!("Keeping {:?}, lookup failed: {}", key, e);
                plan.retained += 1;
            }
        }
    }

    plan
}

/// Installs `view` if it is newer than the installed one and rebalances.
/// Returns `None` for stale or repeated views.
pub fn install_view<K, V>(
    ctx: &NodeContext<K, V>,
    view: Arc<MembershipView>,
) -> Option<RebalanceReport>
where
    K: StoreKey,
    V: StoreValue,
{
    let installed = ctx.placement();
    if view.version() <= installed.version() {
        tracing::debug!(
            "Ignoring view {} on {}, v{} already installed",
            view,
            ctx.local_id,
            installed.version()
        );
        return None;
    }

    let placement = Arc::new(Placement::build(
        ctx.config.strategy,
        view,
        ctx.config.virtual_nodes,
    ));
    ctx.placement.store(Arc::clone(&placement));
    tracing::info!("Store {} on {} installed view {}", ctx.name(), ctx.local_id, placement.view());

    let plan = plan_migration(&ctx.data, &placement, &ctx.local_id);
    Some(ship(ctx, plan))
}

/// Re-plans against the installed placement and ships whatever this node holds
/// but does not own: entries restored after a failed transfer, or kept back
/// from a transfer planned under a different member set.
pub fn reconcile<K, V>(ctx: &NodeContext<K, V>) -> Option<RebalanceReport>
where
    K: StoreKey,
    V: StoreValue,
{
    let placement = ctx.placement();
    let plan = plan_migration(&ctx.data, &placement, &ctx.local_id);
    if plan.moves.is_empty() {
        return None;
    }
    Some(ship(ctx, plan))
}

/// Phase two: removes every planned key and sends it to its new owner.
pub fn ship<K, V>(ctx: &NodeContext<K, V>, plan: MigrationPlan<K>) -> RebalanceReport
where
    K: StoreKey,
    V: StoreValue,
{
    let mut report = RebalanceReport {
        view_version: plan.view_version,
        retained: plan.retained,
        ..Default::default()
    };

    for (dst, keys) in plan.moves {
        // A key may have been overwritten since planning; ship what is there now.
        let entries: Vec<(K, V)> = keys
            .into_iter()
            .filter_map(|key| ctx.data.remove(&key).map(|value| (key, value)))
            .collect();
        if entries.is_empty() {
            continue;
        }

        let (sent, failed) = send_entries(ctx, &dst, plan.view_version, &plan.members, entries);
        if sent > 0 {
            report.moved.insert(dst, sent);
        }
        report.failed += failed;
    }

    tracing::info!(
        "Rebalance v{} on {}: retained {}, moved {} {:?}, failed {}",
        report.view_version,
        ctx.local_id,
        report.retained,
        report.total_moved(),
        report.moved,
        report.failed
    );
    report
}

/// Sends `entries` to `dst`, split into chunks of at most
/// `transfer_batch_size` entries. Returns (sent, failed) entry counts.
fn send_entries<K, V>(
    ctx: &NodeContext<K, V>,
    dst: &NodeId,
    view_version: u64,
    members: &[NodeId],
    mut entries: Vec<(K, V)>,
) -> (usize, usize)
where
    K: StoreKey,
    V: StoreValue,
{
    let chunk = ctx
        .config
        .transfer_batch_size
        .filter(|size| *size > 0)
        .unwrap_or(entries.len())
        .max(1);

    let mut sent = 0;
    let mut failed = 0;
    while !entries.is_empty() {
        let rest = entries.split_off(chunk.min(entries.len()));
        let batch = std::mem::replace(&mut entries, rest);

        let (batch_sent, batch_failed) = send_batch(ctx, dst, view_version, members, batch);
        sent += batch_sent;
        failed += batch_failed;
    }
    (sent, failed)
}

/// Sends one Bulk-Transfer. A batch the transport rejects as too large for a
/// single frame is halved until the pieces fit; any other failure puts the
/// entries back into the Local Store.
fn send_batch<K, V>(
    ctx: &NodeContext<K, V>,
    dst: &NodeId,
    view_version: u64,
    members: &[NodeId],
    entries: Vec<(K, V)>,
) -> (usize, usize)
where
    K: StoreKey,
    V: StoreValue,
{
    let count = entries.len();
    let command = Command::BulkTransfer {
        view_version,
        members: members.to_vec(),
        entries,
    };

    let error = match ctx.send_command(dst, &command) {
        Ok(()) => return (count, 0),
        Err(e) => e,
    };
    let Command::BulkTransfer { mut entries, .. } = command else {
        return (0, count);
    };

    let too_large = matches!(
        error,
        StoreError::Transport(TransportError::PayloadTooLarge { .. })
    );
    if too_large && count > 1 {
        tracing::debug!("Splitting {} entries bound for {}: {}", count, dst, error);
        let upper = entries.split_off(count / 2);
        let (low_sent, low_failed) = send_batch(ctx, dst, view_version, members, entries);
        let (high_sent, high_failed) = send_batch(ctx, dst, view_version, members, upper);
        return (low_sent + high_sent, low_failed + high_failed);
    }

    tracing::error!("Bulk transfer to {} failed: {}", dst, error);
    // Entries written locally since removal are newer; keep those.
    let mut restored = 0;
    for (key, value) in entries {
        if ctx.data.insert_if_absent(key, value) {
            restored += 1;
        }
    }
    tracing::warn!("Restored {} entries bound for {}", restored, dst);
    (0, count)
}

/// Merges a Bulk-Transfer into the Local Store, last writer wins.
///
/// View versions are per node, so the transfer is judged by the member set the
/// sender planned against. When that set covers every member this node knows
/// about, besides the sender, everything is merged. Otherwise entries owned by
/// a third member both sides know are passed on, and the rest is kept here for
/// the next rebalance or reconcile pass. Nothing is forwarded back to the
/// sender or to a node the sender has already dropped.
pub fn merge_transfer<K, V>(
    ctx: &NodeContext<K, V>,
    from: &NodeId,
    view_version: u64,
    members: &[NodeId],
    entries: Vec<(K, V)>,
) where
    K: StoreKey,
    V: StoreValue,
{
    let placement = ctx.placement();
    let planned: HashSet<&NodeId> = members.iter().collect();
    let covered = placement
        .view()
        .members()
        .iter()
        .filter(|member| *member != from)
        .all(|member| planned.contains(member));

    if covered {
        let merged = ctx.data.merge(entries);
        tracing::info!(
            "Received {} migrated entries from {} (v{})",
            merged,
            from,
            view_version
        );
        return;
    }

    let mut kept = 0;
    let mut forward: HashMap<NodeId, Vec<(K, V)>> = HashMap::new();
    for (key, value) in entries {
        match placement.lookup(&key) {
            Ok(owner) if owner != &ctx.local_id && owner != from && planned.contains(owner) => {
                forward.entry(owner.clone()).or_default().push((key, value));
            }
            _ => {
                ctx.data.insert(key, value);
                kept += 1;
            }
        }
    }

    tracing::info!(
        "Received {} migrated entries from {} planned under a different view (v{}), forwarding {} to {} owners",
        kept,
        from,
        view_version,
        forward.values().map(Vec::len).sum::<usize>(),
        forward.len()
    );
    let installed = placement.view().members();
    for (dst, batch) in forward {
        send_entries(ctx, &dst, placement.version(), installed, batch);
    }
}

/// Hands every local entry to the remaining members before this node leaves.
///
/// Plans against the installed view without this node. Receivers that still
/// list this node accept the whole transfer because the planned set covers
/// everyone else they know.
pub fn handoff<K, V>(ctx: &NodeContext<K, V>) -> Option<RebalanceReport>
where
    K: StoreKey,
    V: StoreValue,
{
    if ctx.data.is_empty() {
        return None;
    }

    let installed = ctx.placement();
    let remaining = MembershipView::new(
        installed.version() + 1,
        installed
            .view()
            .members()
            .iter()
            .filter(|member| **member != ctx.local_id)
            .cloned(),
    );
    if remaining.is_empty() {
        tracing::warn!(
            "Store {} on {} has no peer to hand {} entries to",
            ctx.name(),
            ctx.local_id,
            ctx.data.len()
        );
        return None;
    }

    let placement = Placement::build(
        ctx.config.strategy,
        Arc::new(remaining),
        ctx.config.virtual_nodes,
    );
    let plan = plan_migration(&ctx.data, &placement, &ctx.local_id);
    Some(ship(ctx, plan))
}

/// Installs every view the substrate publishes until it goes away, and runs a
/// reconcile pass every `reconcile_interval` in between.
pub async fn run_view_loop<K, V>(
    ctx: Arc<NodeContext<K, V>>,
    mut views: watch::Receiver<Arc<MembershipView>>,
) where
    K: StoreKey,
    V: StoreValue,
{
    let mut ticker = ctx.config.reconcile_interval().map(|period| {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                install_view(&ctx, view);
            }
            _ = next_tick(&mut ticker) => {
                reconcile(&ctx);
            }
        }
    }
    tracing::debug!("View notifications for store {} ended", ctx.name());
}

async fn next_tick(ticker: &mut Option<time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
