//! Optimistic mutation staging and reconciliation.
//!
//! # Responsibility
//! - Validate task and board intents before any network call.
//! - Apply the optimistic patch and remember how to invert it.
//! - Commit or roll back when the network result arrives.
//!
//! # Invariants
//! - A pending mutation exists only between staging and settlement.
//! - At most one pending move per task; a second move re-targets it.
//! - Rollback restores only the entity the mutation touched, with the value
//!   the server holds once every overlapping mutation has settled.
//! - Board creation is confirmed-only; nothing is shown before the server id.

use crate::model::board::{
    normalize_title, Board, BoardId, Task, TaskId, TaskStatus, TaskValidationError,
};
use crate::model::event::ScopedEvent;
use crate::model::mutation::{
    EntityId, IssuedMutation, MutationRequest, MutationResponse, MutationToken,
};
use crate::policy::consistency::{ConsistencyPolicy, PendingKey};
use crate::store::board_store::BoardStore;
use crate::store::patch::Patch;
use crate::store::snapshot::{BoardSnapshot, TaskEntry};
use crate::sync::transport::TransportError;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors surfaced to callers of mutation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Input rejected before any network call.
    Validation(TaskValidationError),
    /// Task id absent from the store.
    TaskNotFound(TaskId),
    /// Board id absent from the store.
    BoardNotFound(BoardId),
    /// Round-trip failed; the optimistic patch was rolled back.
    Network(TransportError),
    /// No response within the configured timeout; rolled back.
    Timeout { elapsed_ms: u64 },
    /// Server answered but declined the mutation; rolled back.
    Rejected(String),
}

impl MutationError {
    /// Whether this error was raised after an optimistic patch was undone.
    pub fn rolled_back(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::Rejected(_)
        )
    }
}

impl Display for MutationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::BoardNotFound(id) => write!(f, "board not found: {id}"),
            Self::Network(err) => write!(f, "mutation failed: {err}"),
            Self::Timeout { elapsed_ms } => {
                write!(f, "mutation timed out after {elapsed_ms} ms")
            }
            Self::Rejected(reason) => write!(f, "mutation rejected: {reason}"),
        }
    }
}

impl Error for MutationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Network(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for MutationError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<TransportError> for MutationError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Rejected(reason) => Self::Rejected(reason),
            other => Self::Network(other),
        }
    }
}

/// Which intent a pending mutation stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    Create {
        board_id: BoardId,
        draft_title: String,
        placeholder: TaskId,
    },
    Move {
        task_id: TaskId,
        from_status: TaskStatus,
        to_status: TaskStatus,
    },
    Delete {
        task_id: TaskId,
    },
    CreateBoard {
        title: String,
    },
    DeleteBoard {
        board_id: BoardId,
    },
}

/// Local optimistic edit awaiting its network result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub token: MutationToken,
    pub kind: PendingKind,
    /// Entries removed by a task or board delete; restored on rollback.
    removed: Vec<TaskEntry>,
    /// Board header removed by a board delete.
    removed_board: Option<Board>,
    /// Staging order; kept across re-targets, so it also names a move chain.
    order: u64,
}

impl PendingMutation {
    /// Key whose events wait until this mutation settles.
    pub fn key(&self) -> Option<PendingKey> {
        match &self.kind {
            PendingKind::Create { board_id, .. } => Some(PendingKey::BoardCreate(*board_id)),
            PendingKind::Move { task_id, .. } | PendingKind::Delete { task_id } => {
                Some(PendingKey::Task(*task_id))
            }
            PendingKind::DeleteBoard { board_id } => Some(PendingKey::Board(*board_id)),
            PendingKind::CreateBoard { .. } => None,
        }
    }

    fn optimistic_patch(&self) -> Option<Patch> {
        match &self.kind {
            PendingKind::Create {
                board_id,
                draft_title,
                placeholder,
            } => Some(Patch::InsertTask(Task::new(
                *placeholder,
                *board_id,
                draft_title.clone(),
                TaskStatus::Todo,
            ))),
            PendingKind::Move {
                task_id, to_status, ..
            } => Some(Patch::SetStatus {
                task_id: *task_id,
                status: *to_status,
            }),
            PendingKind::Delete { task_id } => Some(Patch::RemoveTask { task_id: *task_id }),
            PendingKind::DeleteBoard { board_id } => Some(Patch::RemoveBoard {
                board_id: *board_id,
            }),
            PendingKind::CreateBoard { .. } => None,
        }
    }

    fn request(&self) -> MutationRequest {
        match &self.kind {
            PendingKind::Create {
                board_id,
                draft_title,
                ..
            } => MutationRequest::CreateTask {
                board_id: *board_id,
                title: draft_title.clone(),
            },
            PendingKind::Move {
                task_id, to_status, ..
            } => MutationRequest::MoveTask {
                task_id: *task_id,
                status: *to_status,
            },
            PendingKind::Delete { task_id } => MutationRequest::DeleteTask { task_id: *task_id },
            PendingKind::CreateBoard { title } => MutationRequest::CreateBoard {
                title: title.clone(),
            },
            PendingKind::DeleteBoard { board_id } => MutationRequest::DeleteBoard {
                board_id: *board_id,
            },
        }
    }

    /// Refreshes rollback data from `snapshot` before the optimistic patch is
    /// laid on it again.
    fn capture(&mut self, snapshot: &BoardSnapshot) {
        match &mut self.kind {
            PendingKind::Move {
                task_id,
                from_status,
                ..
            } => {
                if let Some(task) = snapshot.task(*task_id) {
                    *from_status = task.status;
                }
            }
            PendingKind::Delete { task_id } => {
                self.removed = snapshot.entry(*task_id).cloned().into_iter().collect();
            }
            PendingKind::DeleteBoard { board_id } => {
                self.removed_board = snapshot.board(*board_id).cloned();
                self.removed = snapshot
                    .entries_of(*board_id)
                    .into_iter()
                    .cloned()
                    .collect();
            }
            PendingKind::Create { .. } | PendingKind::CreateBoard { .. } => {}
        }
    }
}

/// Result of staging a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedMove {
    /// Network call required.
    Issued(IssuedMutation),
    /// Task already sits in the target column; nothing to send.
    Unchanged,
}

/// Result of feeding a network outcome back into the applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Committed {
        token: MutationToken,
        /// Authoritative id (server id for creates).
        target: EntityId,
        kind: PendingKind,
        /// Events that waited on this mutation, in arrival order.
        released: Vec<ScopedEvent>,
    },
    RolledBack {
        token: MutationToken,
        error: MutationError,
        released: Vec<ScopedEvent>,
    },
    /// Response for a move that was re-targeted later. A successful one
    /// becomes the rollback value of its chain.
    Superseded { token: MutationToken },
    /// Token not issued by this applier or already settled.
    Unknown { token: MutationToken },
}

/// Earlier network call of a re-targeted move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SupersededMove {
    task_id: TaskId,
    to_status: TaskStatus,
    chain: u64,
}

/// Pending-mutation bookkeeping.
#[derive(Debug)]
pub struct MutationApplier {
    pending: BTreeMap<MutationToken, PendingMutation>,
    moves: BTreeMap<TaskId, MutationToken>,
    superseded: BTreeMap<MutationToken, SupersededMove>,
    /// Move chains whose latest call rolled back while earlier calls were
    /// still unanswered.
    failed_chains: BTreeSet<u64>,
    next_placeholder: i64,
    next_order: u64,
}

impl Default for MutationApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationApplier {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            moves: BTreeMap::new(),
            superseded: BTreeMap::new(),
            failed_chains: BTreeSet::new(),
            next_placeholder: -1,
            next_order: 0,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, token: MutationToken) -> Option<&PendingMutation> {
        self.pending.get(&token)
    }

    /// Stages `createTask` with a placeholder id.
    pub fn stage_create(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        board_id: BoardId,
        title: &str,
    ) -> Result<IssuedMutation, MutationError> {
        let draft_title = normalize_title(title)?;
        if store.read().board(board_id).is_none() {
            return Err(MutationError::BoardNotFound(board_id));
        }

        let placeholder = TaskId::new(self.next_placeholder);
        self.next_placeholder -= 1;
        let pending = self.open(PendingKind::Create {
            board_id,
            draft_title,
            placeholder,
        });
        hold_and_apply(store, policy, &pending);

        info!(
            "event=mutation_stage module=applier status=ok op=create_task token={} board_id={} placeholder={}",
            pending.token, board_id, placeholder
        );
        Ok(self.issue(pending, Some(placeholder), None))
    }

    /// Stages `moveTask`, re-targeting an unresolved move of the same task.
    pub fn stage_move(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        task_id: TaskId,
        to_status: TaskStatus,
    ) -> Result<StagedMove, MutationError> {
        if task_id.is_placeholder() {
            return Err(TaskValidationError::PlaceholderTask(task_id).into());
        }
        let current_status = store
            .read()
            .task(task_id)
            .map(|task| task.status)
            .ok_or(MutationError::TaskNotFound(task_id))?;

        if let Some(previous) = self.moves.get(&task_id).copied() {
            if let Some(mut pending) = self.pending.remove(&previous) {
                if let PendingKind::Move {
                    to_status: target, ..
                } = &mut pending.kind
                {
                    self.superseded.insert(
                        previous,
                        SupersededMove {
                            task_id,
                            to_status: *target,
                            chain: pending.order,
                        },
                    );
                    *target = to_status;
                }
                pending.token = MutationToken::new();
                if let Some(patch) = pending.optimistic_patch() {
                    store.apply(&patch);
                }
                info!(
                    "event=mutation_stage module=applier status=retarget op=move_task token={} supersedes={} task_id={} to={}",
                    pending.token, previous, task_id, to_status
                );
                return Ok(StagedMove::Issued(self.issue(pending, None, Some(previous))));
            }
        }

        if current_status == to_status {
            return Ok(StagedMove::Unchanged);
        }

        let pending = self.open(PendingKind::Move {
            task_id,
            from_status: current_status,
            to_status,
        });
        hold_and_apply(store, policy, &pending);
        info!(
            "event=mutation_stage module=applier status=ok op=move_task token={} task_id={} from={} to={}",
            pending.token, task_id, current_status, to_status
        );
        Ok(StagedMove::Issued(self.issue(pending, None, None)))
    }

    /// Stages `deleteTask`, removing the task immediately.
    pub fn stage_delete(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        task_id: TaskId,
    ) -> Result<IssuedMutation, MutationError> {
        if task_id.is_placeholder() {
            return Err(TaskValidationError::PlaceholderTask(task_id).into());
        }
        let snapshot = store.read();
        if !snapshot.contains_task(task_id) {
            return Err(MutationError::TaskNotFound(task_id));
        }

        let mut pending = self.open(PendingKind::Delete { task_id });
        pending.capture(&snapshot);
        hold_and_apply(store, policy, &pending);
        info!(
            "event=mutation_stage module=applier status=ok op=delete_task token={} task_id={}",
            pending.token, task_id
        );
        Ok(self.issue(pending, None, None))
    }

    /// Stages `createBoard`. The board appears only once the server confirms.
    pub fn stage_create_board(&mut self, title: &str) -> Result<IssuedMutation, MutationError> {
        let title = normalize_title(title)?;
        let pending = self.open(PendingKind::CreateBoard { title });
        info!(
            "event=mutation_stage module=applier status=ok op=create_board token={}",
            pending.token
        );
        Ok(self.issue(pending, None, None))
    }

    /// Stages `deleteBoard`, removing the board and its tasks immediately.
    pub fn stage_delete_board(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        board_id: BoardId,
    ) -> Result<IssuedMutation, MutationError> {
        let snapshot = store.read();
        if snapshot.board(board_id).is_none() {
            return Err(MutationError::BoardNotFound(board_id));
        }

        let mut pending = self.open(PendingKind::DeleteBoard { board_id });
        pending.capture(&snapshot);
        hold_and_apply(store, policy, &pending);
        info!(
            "event=mutation_stage module=applier status=ok op=delete_board token={} board_id={} tasks={}",
            pending.token,
            board_id,
            pending.removed.len()
        );
        Ok(self.issue(pending, None, None))
    }

    /// Commits or rolls back the mutation identified by `token`.
    pub fn settle(
        &mut self,
        store: &mut BoardStore,
        policy: &mut ConsistencyPolicy,
        token: MutationToken,
        result: Result<MutationResponse, MutationError>,
    ) -> Settlement {
        if let Some(superseded) = self.superseded.remove(&token) {
            self.settle_superseded(store, token, superseded, &result);
            return Settlement::Superseded { token };
        }
        let Some(pending) = self.pending.remove(&token) else {
            warn!("event=mutation_settle module=applier status=unknown token={token}");
            return Settlement::Unknown { token };
        };
        if let PendingKind::Move { task_id, .. } = &pending.kind {
            self.moves.remove(task_id);
        }

        let outcome = match (result, &pending.kind) {
            (Ok(MutationResponse::Created { id, title }), PendingKind::Create { placeholder, .. }) => {
                store.apply(&Patch::ConfirmPlaceholder {
                    placeholder: *placeholder,
                    id,
                    title: title.clone(),
                });
                self.confirm_removed_placeholder(*placeholder, id, &title);
                Ok(EntityId::Task(id))
            }
            (Ok(MutationResponse::BoardCreated { id, title }), PendingKind::CreateBoard { .. }) => {
                store.apply(&Patch::UpsertBoard(Board::new(id, title)));
                Ok(EntityId::Board(id))
            }
            (Ok(MutationResponse::Acknowledged(true)), PendingKind::Move { task_id, .. })
            | (Ok(MutationResponse::Acknowledged(true)), PendingKind::Delete { task_id }) => {
                Ok(EntityId::Task(*task_id))
            }
            (Ok(MutationResponse::Acknowledged(true)), PendingKind::DeleteBoard { board_id }) => {
                Ok(EntityId::Board(*board_id))
            }
            (Ok(MutationResponse::Acknowledged(false)), _) => Err(MutationError::Rejected(
                format!("server declined {}", pending.request().operation()),
            )),
            (Ok(_), _) => Err(MutationError::Rejected(format!(
                "unexpected response to {}",
                pending.request().operation()
            ))),
            (Err(err), _) => Err(err),
        };

        let released = pending
            .key()
            .map(|key| policy.release(key))
            .unwrap_or_default();
        match outcome {
            Ok(target) => {
                info!(
                    "event=mutation_settle module=applier status=ok op={} token={} target={} released={}",
                    pending.request().operation(),
                    token,
                    target,
                    released.len()
                );
                Settlement::Committed {
                    token,
                    target,
                    kind: pending.kind,
                    released,
                }
            }
            Err(error) => {
                self.roll_back(store, &pending);
                warn!(
                    "event=mutation_settle module=applier status=rolled_back op={} token={} released={} error={}",
                    pending.request().operation(),
                    token,
                    released.len(),
                    error
                );
                Settlement::RolledBack {
                    token,
                    error,
                    released,
                }
            }
        }
    }

    /// Re-applies every unresolved optimistic patch after an authoritative
    /// refresh, refreshing rollback data from the new content first.
    pub fn reapply_pending(&mut self, store: &mut BoardStore) {
        let mut ordered = self.pending.values_mut().collect::<Vec<_>>();
        ordered.sort_by_key(|pending| pending.order);
        for pending in ordered {
            pending.capture(&store.read());
            if let Some(patch) = pending.optimistic_patch() {
                store.apply(&patch);
            }
        }
    }

    fn roll_back(&mut self, store: &mut BoardStore, pending: &PendingMutation) {
        match &pending.kind {
            PendingKind::Create { placeholder, .. } => {
                store.apply(&Patch::RemoveTask {
                    task_id: *placeholder,
                });
                self.drop_removed(*placeholder);
            }
            PendingKind::Move {
                task_id,
                from_status,
                ..
            } => {
                store.apply(&Patch::SetStatus {
                    task_id: *task_id,
                    status: *from_status,
                });
                self.rewrite_removed_status(*task_id, *from_status);
                if self
                    .superseded
                    .values()
                    .any(|superseded| superseded.chain == pending.order)
                {
                    self.failed_chains.insert(pending.order);
                }
            }
            PendingKind::Delete { .. } => {
                for entry in &pending.removed {
                    self.restore_entry(store, entry.clone());
                }
            }
            PendingKind::DeleteBoard { .. } => {
                if let Some(board) = &pending.removed_board {
                    store.apply(&Patch::RestoreBoard {
                        board: board.clone(),
                        tasks: pending.removed.clone(),
                    });
                }
            }
            PendingKind::CreateBoard { .. } => {}
        }
    }

    /// A superseded call answered. When it succeeded, its target is what the
    /// server holds unless a later call of the chain lands too.
    fn settle_superseded(
        &mut self,
        store: &mut BoardStore,
        token: MutationToken,
        superseded: SupersededMove,
        result: &Result<MutationResponse, MutationError>,
    ) {
        let SupersededMove {
            task_id,
            to_status,
            chain,
        } = superseded;
        let landed = matches!(result, Ok(MutationResponse::Acknowledged(true)));
        let mut adopted = false;
        if landed {
            let chain_failed = self.failed_chains.contains(&chain);
            let current = self
                .moves
                .get(&task_id)
                .and_then(|current| self.pending.get_mut(current))
                .filter(|current| current.order == chain || chain_failed);
            if let Some(PendingMutation {
                kind: PendingKind::Move { from_status, .. },
                ..
            }) = current
            {
                // A newer move owns the optimistic status; only its rollback
                // value changes.
                *from_status = to_status;
                adopted = true;
            } else if chain_failed {
                store.apply(&Patch::SetStatus {
                    task_id,
                    status: to_status,
                });
                self.rewrite_removed_status(task_id, to_status);
                adopted = true;
            }
        }
        if !self.superseded.values().any(|other| other.chain == chain) {
            self.failed_chains.remove(&chain);
        }
        info!(
            "event=mutation_settle module=applier status=superseded token={token} task_id={task_id} landed={landed} adopted={adopted}"
        );
    }

    /// Puts a removed entry back, or hands it to a pending delete of its
    /// board so that delete restores it.
    fn restore_entry(&mut self, store: &mut BoardStore, entry: TaskEntry) {
        let board_id = entry.task.board_id;
        let board_delete = self.pending.values_mut().find(|pending| {
            matches!(pending.kind, PendingKind::DeleteBoard { board_id: pending_board } if pending_board == board_id)
        });
        match board_delete {
            Some(pending) => pending.removed.push(entry),
            None => {
                store.apply(&Patch::RestoreTask(entry));
            }
        }
    }

    fn rewrite_removed_status(&mut self, task_id: TaskId, status: TaskStatus) {
        for entry in self.removed_entries_mut(task_id) {
            entry.task.status = status;
        }
    }

    fn confirm_removed_placeholder(&mut self, placeholder: TaskId, id: TaskId, title: &str) {
        for entry in self.removed_entries_mut(placeholder) {
            entry.task.id = id;
            entry.task.title = title.to_string();
        }
    }

    fn drop_removed(&mut self, task_id: TaskId) {
        for pending in self.pending.values_mut() {
            pending.removed.retain(|entry| entry.task.id != task_id);
        }
    }

    fn removed_entries_mut(&mut self, task_id: TaskId) -> impl Iterator<Item = &mut TaskEntry> {
        self.pending
            .values_mut()
            .flat_map(|pending| pending.removed.iter_mut())
            .filter(move |entry| entry.task.id == task_id)
    }

    fn open(&mut self, kind: PendingKind) -> PendingMutation {
        let order = self.next_order;
        self.next_order += 1;
        PendingMutation {
            token: MutationToken::new(),
            kind,
            removed: Vec::new(),
            removed_board: None,
            order,
        }
    }

    fn issue(
        &mut self,
        pending: PendingMutation,
        placeholder: Option<TaskId>,
        supersedes: Option<MutationToken>,
    ) -> IssuedMutation {
        let issued = IssuedMutation {
            token: pending.token,
            request: pending.request(),
            placeholder,
            supersedes,
        };
        if let PendingKind::Move { task_id, .. } = &pending.kind {
            self.moves.insert(*task_id, pending.token);
        }
        self.pending.insert(pending.token, pending);
        issued
    }
}

fn hold_and_apply(store: &mut BoardStore, policy: &mut ConsistencyPolicy, pending: &PendingMutation) {
    if let Some(key) = pending.key() {
        policy.hold(key);
    }
    if let Some(patch) = pending.optimistic_patch() {
        store.apply(&patch);
    }
}
