//! Synchronous reconciliation core.
//!
//! # Responsibility
//! - Own the store, the consistency policy, pending mutations and the merge
//!   handler, and wire them together for each entry point.
//! - Stay free of I/O so every ordering rule is testable without a runtime.
//!
//! # Invariants
//! - Every store change goes through one of the methods below.
//! - Events queued behind a mutation are merged right after it settles,
//!   whichever way it settles.

use crate::model::board::{Board, BoardId, Task, TaskId, TaskStatus};
use crate::model::event::{ScopedEvent, TaskChanged};
use crate::model::mutation::{IssuedMutation, MutationResponse, MutationToken};
use crate::policy::consistency::ConsistencyPolicy;
use crate::service::event_merge::{EventMergeHandler, MergeOutcome, MergeStats};
use crate::service::mutation_applier::{
    MutationApplier, MutationError, PendingKind, Settlement, StagedMove,
};
use crate::store::board_store::BoardStore;
use crate::store::patch::PatchEffect;
use crate::store::snapshot::{BoardSnapshot, BoardView};
use crate::sync::wire::{normalize_boards, BoardPayload};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Default)]
pub struct Reconciler {
    store: BoardStore,
    policy: ConsistencyPolicy,
    applier: MutationApplier,
    merge: EventMergeHandler,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Arc<BoardSnapshot> {
        self.store.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<BoardSnapshot>> {
        self.store.subscribe()
    }

    pub fn board_view(&self, board_id: BoardId) -> Option<BoardView> {
        self.store.read().board_view(board_id)
    }

    pub fn pending_count(&self) -> usize {
        self.applier.pending_count()
    }

    pub fn queued_events(&self) -> usize {
        self.policy.queued_len()
    }

    pub fn merge_stats(&self) -> MergeStats {
        self.merge.stats()
    }

    /// Stages `createTask`; the placeholder is visible immediately.
    pub fn create_task(
        &mut self,
        board_id: BoardId,
        title: &str,
    ) -> Result<IssuedMutation, MutationError> {
        self.applier
            .stage_create(&mut self.store, &mut self.policy, board_id, title)
    }

    pub fn move_task(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<StagedMove, MutationError> {
        self.applier
            .stage_move(&mut self.store, &mut self.policy, task_id, status)
    }

    /// Same as `move_task` with a status name as received from the UI.
    pub fn move_task_named(
        &mut self,
        task_id: TaskId,
        status: &str,
    ) -> Result<StagedMove, MutationError> {
        let status = TaskStatus::parse(status)?;
        self.move_task(task_id, status)
    }

    pub fn delete_task(&mut self, task_id: TaskId) -> Result<IssuedMutation, MutationError> {
        self.applier
            .stage_delete(&mut self.store, &mut self.policy, task_id)
    }

    /// Stages `createBoard`; the board shows up when the server confirms it.
    pub fn create_board(&mut self, title: &str) -> Result<IssuedMutation, MutationError> {
        self.applier.stage_create_board(title)
    }

    /// Stages `deleteBoard`; the board and its tasks disappear immediately.
    pub fn delete_board(&mut self, board_id: BoardId) -> Result<IssuedMutation, MutationError> {
        self.applier
            .stage_delete_board(&mut self.store, &mut self.policy, board_id)
    }

    /// Feeds a network result back, then merges whatever it released.
    pub fn settle(
        &mut self,
        token: MutationToken,
        result: Result<MutationResponse, MutationError>,
    ) -> Settlement {
        let settlement = self
            .applier
            .settle(&mut self.store, &mut self.policy, token, result);
        match &settlement {
            Settlement::Committed { kind, released, .. } => {
                if let PendingKind::Delete { task_id } = kind {
                    self.merge.record_deleted(*task_id);
                }
                self.merge
                    .merge_released(&mut self.store, &mut self.policy, released.clone());
            }
            Settlement::RolledBack { released, .. } => {
                self.merge
                    .merge_released(&mut self.store, &mut self.policy, released.clone());
            }
            Settlement::Superseded { .. } | Settlement::Unknown { .. } => {}
        }
        settlement
    }

    /// Merges one pushed event from the subscription of `board_id`.
    pub fn merge_event(&mut self, board_id: BoardId, event: TaskChanged) -> MergeOutcome {
        self.merge.merge(
            &mut self.store,
            &mut self.policy,
            ScopedEvent::new(board_id, event),
        )
    }

    /// Replaces content with an authoritative refresh and lays unresolved
    /// optimistic edits back on top.
    pub fn resync(&mut self, boards: Vec<Board>, tasks: Vec<Task>) -> PatchEffect {
        let effect = self.merge.resync(&mut self.store, boards, tasks);
        self.applier.reapply_pending(&mut self.store);
        effect
    }

    /// `resync` from a raw `boards` query payload.
    pub fn load_payload(&mut self, payload: Vec<BoardPayload>) -> PatchEffect {
        let (boards, tasks) = normalize_boards(payload);
        self.resync(boards, tasks)
    }
}
