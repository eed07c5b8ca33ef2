//! Remote sync — debounced, rate-limited, batched push of dirty conversations.
//!
//! DESIGN
//! ======
//! `SyncQueue` lives inside the conversation store and only records intent:
//! which ids are dirty, which were deleted, and when the next push is due.
//! A background task polls `sync_cycle_at`, which snapshots due work under
//! the store lock, releases it, performs network I/O lock-free, then
//! re-acquires the lock to re-queue whatever failed.
//!
//! Timing:
//! - every enqueue reschedules one debounce deadline, so a burst of
//!   mutations collapses into a single push
//! - a cooldown enforces the minimum interval between pushes
//! - an incremental push sends at most `batch_size` conversations, most
//!   recently updated first; the rest stay pending for the next window
//! - a periodic full sweep pushes every conversation in batch-sized chunks
//!
//! ERROR HANDLING
//! ==============
//! A failed batch stops the cycle. Its ids and every unsent id return to
//! the queue; the remote wrapper marks itself unavailable, and the next
//! cycle pings before pushing again. Nothing propagates to store callers.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::schedule::{Cooldown, ScheduledTask};
use crate::services::remote::RemoteSync;
use crate::state::{Conversation, EngineState};

// =============================================================================
// QUEUE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Incremental,
    FullSweep,
    Immediate,
}

/// Work taken off the queue for one cycle. Conversations are clones.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub kind: SyncKind,
    pub batches: Vec<Vec<Conversation>>,
    pub deletions: Vec<Uuid>,
}

impl SyncPlan {
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SyncQueue {
    pending: HashSet<Uuid>,
    deletions: Vec<Uuid>,
    debounce: ScheduledTask,
    cooldown: Cooldown,
    full_sweep: Cooldown,
    batch_size: usize,
    immediate: bool,
}

impl SyncQueue {
    /// A queue whose first full sweep falls one interval after `now`.
    #[must_use]
    pub fn new(config: SyncConfig, now: Instant) -> Self {
        Self {
            pending: HashSet::new(),
            deletions: Vec::new(),
            debounce: ScheduledTask::new(config.debounce),
            cooldown: Cooldown::new(config.cooldown),
            full_sweep: Cooldown::started_at(config.full_sync_interval, now),
            batch_size: config.batch_size.max(1),
            immediate: false,
        }
    }

    pub fn enqueue_at(&mut self, id: Uuid, now: Instant) {
        self.pending.insert(id);
        self.debounce.schedule_at(now);
    }

    pub fn enqueue_deletion_at(&mut self, id: Uuid, now: Instant) {
        self.pending.remove(&id);
        if !self.deletions.contains(&id) {
            self.deletions.push(id);
        }
        self.debounce.schedule_at(now);
    }

    /// Make the next `take_due_at` flush everything, ignoring debounce and
    /// cooldown.
    pub fn request_immediate(&mut self) {
        self.immediate = true;
    }

    /// Return failed work to the queue and reschedule it.
    pub fn requeue_at(&mut self, ids: impl IntoIterator<Item = Uuid>, deletions: impl IntoIterator<Item = Uuid>, now: Instant) {
        self.pending.extend(ids);
        for id in deletions {
            if !self.deletions.contains(&id) {
                self.deletions.push(id);
            }
        }
        if self.has_work() {
            self.debounce.schedule_at(now);
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, id: Uuid) -> bool {
        self.pending.contains(&id)
    }

    #[must_use]
    pub fn pending_deletions(&self) -> &[Uuid] {
        &self.deletions
    }

    fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.deletions.is_empty()
    }

    /// Take whatever is due at `now`.
    pub fn take_due_at(&mut self, now: Instant, conversations: &HashMap<Uuid, Conversation>) -> Option<SyncPlan> {
        if self.immediate {
            self.immediate = false;
            self.debounce.cancel();
            self.cooldown.record_at(now);
            let ids: Vec<Uuid> = self.pending.drain().collect();
            let batches = self.ordered_batches(ids, conversations);
            return self.plan(SyncKind::Immediate, batches);
        }

        if !self.cooldown.ready_at(now) {
            return None;
        }

        if self.full_sweep.ready_at(now) {
            self.full_sweep.record_at(now);
            self.cooldown.record_at(now);
            self.debounce.cancel();
            self.pending.clear();
            let batches = self.ordered_batches(conversations.keys().copied().collect(), conversations);
            return self.plan(SyncKind::FullSweep, batches);
        }

        if !self.debounce.fire_at(now) {
            return None;
        }
        self.cooldown.record_at(now);

        let mut ordered = self.ordered_batches(self.pending.iter().copied().collect(), conversations);
        let batch = if ordered.is_empty() { Vec::new() } else { ordered.remove(0) };
        self.pending.retain(|id| !batch.iter().any(|c| c.id == *id) && conversations.contains_key(id));
        if !self.pending.is_empty() {
            // EDGE: the remainder is due again as soon as the cooldown allows.
            self.debounce.trigger_at(now);
        }
        let batches = if batch.is_empty() { Vec::new() } else { vec![batch] };
        self.plan(SyncKind::Incremental, batches)
    }

    fn plan(&mut self, kind: SyncKind, batches: Vec<Vec<Conversation>>) -> Option<SyncPlan> {
        let deletions = std::mem::take(&mut self.deletions);
        if batches.is_empty() && deletions.is_empty() {
            return None;
        }
        Some(SyncPlan { kind, batches, deletions })
    }

    /// Clone the known ids, most recently updated first, in batch-sized chunks.
    fn ordered_batches(&self, ids: Vec<Uuid>, conversations: &HashMap<Uuid, Conversation>) -> Vec<Vec<Conversation>> {
        let mut selected: Vec<&Conversation> = ids.iter().filter_map(|id| conversations.get(id)).collect();
        selected.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        selected
            .chunks(self.batch_size)
            .map(|chunk| chunk.iter().map(|c| (*c).clone()).collect())
            .collect()
    }
}

// =============================================================================
// CYCLE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub kind: Option<SyncKind>,
    pub pushed: usize,
    pub deleted: usize,
    pub requeued: usize,
    /// The remote was unreachable and nothing was attempted.
    pub unavailable: bool,
}

/// Run one sync cycle at `now`.
pub async fn sync_cycle_at(state: &EngineState, now: Instant) -> CycleReport {
    let Some(remote) = &state.remote else {
        return CycleReport::default();
    };

    // PHASE: SNAPSHOT DUE WORK
    // WHY: clone under the lock, then perform network I/O lock-free.
    let plan = state.store.write().await.take_sync_plan_at(now);
    match plan {
        Some(plan) => run_plan(state, remote, plan, now).await,
        None => CycleReport::default(),
    }
}

async fn run_plan(state: &EngineState, remote: &RemoteSync, plan: SyncPlan, now: Instant) -> CycleReport {
    let mut report = CycleReport { kind: Some(plan.kind), ..CycleReport::default() };

    // PHASE: AVAILABILITY GATE
    if !remote.ensure_available().await {
        let ids: Vec<Uuid> = plan.batches.iter().flatten().map(|c| c.id).collect();
        report.requeued = ids.len() + plan.deletions.len();
        report.unavailable = true;
        state.store.write().await.requeue_sync(ids, plan.deletions, now);
        debug!(requeued = report.requeued, "remote unavailable; sync deferred");
        return report;
    }

    // PHASE: PUSH BATCHES IN PRIORITY ORDER
    let mut failed: Vec<Uuid> = Vec::new();
    let mut batches = plan.batches.into_iter();
    for batch in batches.by_ref() {
        if remote.push(&batch).await {
            report.pushed += batch.len();
        } else {
            failed.extend(batch.iter().map(|c| c.id));
            break;
        }
    }
    failed.extend(batches.flatten().map(|c| c.id));

    // PHASE: DELETIONS
    let mut failed_deletions: Vec<Uuid> = Vec::new();
    for id in plan.deletions {
        if remote.is_available() && remote.delete(id).await {
            report.deleted += 1;
        } else {
            failed_deletions.push(id);
        }
    }

    // PHASE: REQUEUE FAILURES
    report.requeued = failed.len() + failed_deletions.len();
    if report.requeued > 0 {
        state.store.write().await.requeue_sync(failed, failed_deletions, now);
        warn!(kind = ?plan.kind, pushed = report.pushed, requeued = report.requeued, "sync cycle incomplete");
    } else {
        debug!(kind = ?plan.kind, pushed = report.pushed, deleted = report.deleted, "sync cycle complete");
    }
    report
}

/// Push everything pending right now, bypassing debounce and cooldown.
pub async fn sync_now(state: &EngineState) -> CycleReport {
    let Some(remote) = &state.remote else {
        return CycleReport::default();
    };
    let now = Instant::now();
    // EDGE: flag and take under one guard so the background task cannot
    // consume the immediate plan in between.
    let plan = state.store.write().await.take_immediate_sync_plan_at(now);
    match plan {
        Some(plan) => run_plan(state, remote, plan, now).await,
        None => CycleReport::default(),
    }
}

/// Pull the user's conversations and merge the unknown, non-tombstoned ones.
/// Returns how many were admitted.
pub async fn pull_remote(state: &EngineState) -> usize {
    let Some(remote) = &state.remote else {
        return 0;
    };
    let incoming = remote.pull().await;
    if incoming.is_empty() {
        return 0;
    }
    state.store.write().await.merge_remote(incoming)
}

/// Session startup: pull from the remote once (tombstone filter, unknown ids
/// only), then spawn the background sync task.
pub async fn start_sync(state: EngineState) -> JoinHandle<()> {
    // PHASE: STARTUP PULL
    // WHY: the local snapshot is already hydrated; remote-only conversations
    // join before the first push.
    let admitted = pull_remote(&state).await;
    info!(admitted, "startup pull complete");
    spawn_sync_task(state)
}

/// Spawn the background sync task. Returns a handle for shutdown.
pub fn spawn_sync_task(state: EngineState) -> JoinHandle<()> {
    let tick = state.config.sync.tick;
    let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
    info!(tick_ms, remote = state.remote.is_some(), "remote sync task configured");
    tokio::spawn(async move {
        loop {
            sync_cycle_at(&state, Instant::now()).await;
            tokio::time::sleep(tick).await;
        }
    })
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
