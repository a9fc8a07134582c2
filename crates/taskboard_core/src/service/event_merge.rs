//! Merge of pushed `TaskChanged` events and authoritative refreshes.
//!
//! # Responsibility
//! - Route every pushed event through the consistency policy.
//! - Upsert admitted events into the store.
//! - Replace store content with a full refresh, which is the only remote
//!   deletion signal.
//!
//! # Invariants
//! - Merging the same event twice equals merging it once.
//! - A known task keeps its owning board; an unknown one joins the scoped board.
//! - Ids removed by a confirmed local delete are not re-inserted by events
//!   while they are among the last `TOMBSTONE_CAPACITY` deletes and no
//!   refresh has listed them again.

use crate::model::board::{Board, Task, TaskId};
use crate::model::event::ScopedEvent;
use crate::policy::consistency::{Admission, ConsistencyPolicy, PendingKey};
use crate::store::board_store::BoardStore;
use crate::store::patch::{NoopReason, Patch, PatchEffect};
use log::{debug, info};
use std::collections::{BTreeSet, VecDeque};

/// Confirmed deletes remembered for stale-event detection.
pub const TOMBSTONE_CAPACITY: usize = 1024;

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// Store already held exactly these values.
    Duplicate,
    /// Waiting for an unresolved local mutation on this key.
    Buffered(PendingKey),
    /// Target board vanished or the task was deleted locally.
    Stale,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub applied: u64,
    pub duplicates: u64,
    pub buffered: u64,
    pub stale: u64,
}

#[derive(Debug, Default)]
pub struct EventMergeHandler {
    stats: MergeStats,
    deleted: BTreeSet<TaskId>,
    /// Tombstones oldest first.
    deleted_order: VecDeque<TaskId>,
}

impl EventMergeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    pub fn tombstones(&self) -> usize {
        self.deleted.len()
    }

    /// Merges one event, or buffers it behind a pending mutation.
    pub fn merge(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        scoped: ScopedEvent,
    ) -> MergeOutcome {
        let task_id = scoped.event.id;
        if self.deleted.contains(&task_id) {
            self.stats.stale += 1;
            debug!("event=task_changed module=merge status=stale reason=deleted task_id={task_id}");
            return MergeOutcome::Stale;
        }

        let snapshot = store.read();
        let scoped = match policy.admit(scoped, &snapshot) {
            Admission::Apply(scoped) => scoped,
            Admission::Deferred { key, queued } => {
                self.stats.buffered += 1;
                debug!(
                    "event=task_changed module=merge status=buffered task_id={task_id} key={key} queued={queued}"
                );
                return MergeOutcome::Buffered(key);
            }
        };

        let patch = Patch::MergeTask(Task::new(
            task_id,
            scoped.board_id,
            scoped.event.title,
            scoped.event.status,
        ));
        match store.apply(&patch).effect {
            PatchEffect::Changed => {
                self.stats.applied += 1;
                debug!(
                    "event=task_changed module=merge status=ok task_id={task_id} board_id={}",
                    scoped.board_id
                );
                MergeOutcome::Applied
            }
            PatchEffect::Noop(NoopReason::Unchanged) => {
                self.stats.duplicates += 1;
                MergeOutcome::Duplicate
            }
            PatchEffect::Noop(reason) => {
                self.stats.stale += 1;
                debug!(
                    "event=task_changed module=merge status=stale reason={} task_id={task_id}",
                    reason.as_str()
                );
                MergeOutcome::Stale
            }
        }
    }

    /// Merges events handed back by the policy, preserving their order.
    pub fn merge_released(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        released: Vec<ScopedEvent>,
    ) -> Vec<MergeOutcome> {
        released
            .into_iter()
            .map(|scoped| self.merge(store, policy, scoped))
            .collect()
    }

    /// Replaces store content with an authoritative refresh.
    ///
    /// Tasks missing from the refresh are treated as deleted remotely. Listed
    /// ids lose their tombstone.
    pub fn resync(&mut self, store: &mut BoardStore, boards: Vec<Board>, tasks: Vec<Task>) -> PatchEffect {
        if !self.deleted.is_empty() {
            for task in &tasks {
                self.deleted.remove(&task.id);
            }
            let deleted = &self.deleted;
            self.deleted_order.retain(|id| deleted.contains(id));
        }
        let before = store.read().task_count();
        let applied = store.apply(&Patch::ReplaceAll { boards, tasks });
        info!(
            "event=resync module=merge status={} tasks_before={} tasks_after={} tombstones={}",
            if applied.effect.is_changed() { "ok" } else { "noop" },
            before,
            applied.snapshot.task_count(),
            self.deleted.len()
        );
        applied.effect
    }

    /// Records a confirmed local delete so late events cannot resurrect it.
    pub fn record_deleted(&mut self, task_id: TaskId) {
        if !self.deleted.insert(task_id) {
            return;
        }
        self.deleted_order.push_back(task_id);
        while self.deleted_order.len() > TOMBSTONE_CAPACITY {
            if let Some(oldest) = self.deleted_order.pop_front() {
                self.deleted.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventMergeHandler, MergeOutcome, TOMBSTONE_CAPACITY};
    use crate::model::board::{Board, BoardId, Task, TaskId, TaskStatus};
    use crate::model::event::{ScopedEvent, TaskChanged};
    use crate::policy::consistency::ConsistencyPolicy;
    use crate::store::board_store::BoardStore;

    fn event(id: i64) -> ScopedEvent {
        ScopedEvent::new(
            BoardId::new(1),
            TaskChanged {
                id: TaskId::new(id),
                title: "t".to_string(),
                status: TaskStatus::Todo,
            },
        )
    }

    #[test]
    fn tombstones_keep_only_the_latest_deletes() {
        let mut handler = EventMergeHandler::new();
        for id in 0..=TOMBSTONE_CAPACITY as i64 {
            handler.record_deleted(TaskId::new(id));
        }
        handler.record_deleted(TaskId::new(5));
        assert_eq!(handler.tombstones(), TOMBSTONE_CAPACITY);
        assert!(!handler.deleted.contains(&TaskId::new(0)));
        assert!(handler.deleted.contains(&TaskId::new(TOMBSTONE_CAPACITY as i64)));
        assert_eq!(handler.deleted_order.len(), TOMBSTONE_CAPACITY);
    }

    #[test]
    fn refresh_listing_a_deleted_id_clears_its_tombstone() {
        let mut store = BoardStore::new();
        let mut policy = ConsistencyPolicy::new();
        let mut handler = EventMergeHandler::new();
        let board = Board::new(BoardId::new(1), "Sprint");
        handler.resync(&mut store, vec![board.clone()], Vec::new());
        handler.record_deleted(TaskId::new(7));
        handler.record_deleted(TaskId::new(8));

        assert_eq!(
            handler.merge(&mut store, &mut policy, event(7)),
            MergeOutcome::Stale
        );

        handler.resync(
            &mut store,
            vec![board],
            vec![Task::new(TaskId::new(7), BoardId::new(1), "back", TaskStatus::Done)],
        );
        assert_eq!(handler.tombstones(), 1);
        assert_eq!(
            handler.merge(&mut store, &mut policy, event(7)),
            MergeOutcome::Applied
        );
        assert_eq!(
            handler.merge(&mut store, &mut policy, event(8)),
            MergeOutcome::Stale
        );
    }
}
